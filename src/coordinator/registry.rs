//! Worker slot registry
//!
//! The registry is a fixed array of N slots plus an endpoint → slot index. A
//! slot's id is its index and never changes; only the endpoint bound to it and
//! its status do. Binding, rebinding and resetting keep the index and the slots
//! in agreement, so exactly one slot maps to any bound endpoint.

use crate::bus::{codec, Endpoint, Topic, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Slot status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// No worker has announced for this slot yet
    Unbound,
    /// Bound and idle
    Ready,
    /// Bound and executing `active_task_label`
    Busy,
    /// Failed its liveness probe; rebound before the probe handler returns
    SuspectedDead,
}

/// One stable worker identity
#[derive(Debug, Clone)]
pub struct WorkerSlot {
    id: usize,
    endpoint: Option<Endpoint>,
    status: SlotStatus,
    active_task_label: Option<u64>,
    task_started: Option<Instant>,
}

impl WorkerSlot {
    fn unbound(id: usize) -> Self {
        Self {
            id,
            endpoint: None,
            status: SlotStatus::Unbound,
            active_task_label: None,
            task_started: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint
    }

    pub fn status(&self) -> SlotStatus {
        self.status
    }

    pub fn active_task_label(&self) -> Option<u64> {
        self.active_task_label
    }
}

/// Coordinator-side handle used to send commands to one worker
///
/// A proxy is a read-only snapshot of a slot's binding. It is created on demand
/// from the registry, so it never outlives a replacement.
pub struct WorkerProxy {
    slot: usize,
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
}

impl WorkerProxy {
    pub fn new(slot: usize, endpoint: Endpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            slot,
            endpoint,
            transport,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn start_task(&self, label: u64) {
        self.transport
            .send(self.endpoint, Topic::StartTask, codec::encode_label(label));
    }

    pub fn echo(&self, payload: &str) {
        self.transport
            .send(self.endpoint, Topic::EchoRequest, codec::encode_echo(payload));
    }

    pub fn stop(&self) {
        self.transport.send(self.endpoint, Topic::Stop, Vec::new());
    }
}

/// Fixed-size slot table
#[derive(Debug)]
pub struct SlotRegistry {
    slots: Vec<WorkerSlot>,
    by_endpoint: HashMap<Endpoint, usize>,
}

impl SlotRegistry {
    /// Create `size` unbound slots
    pub fn new(size: usize) -> Self {
        Self {
            slots: (0..size).map(WorkerSlot::unbound).collect(),
            by_endpoint: HashMap::new(),
        }
    }

    /// Number of slots (bound or not)
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[WorkerSlot] {
        &self.slots
    }

    pub fn slot(&self, id: usize) -> Option<&WorkerSlot> {
        self.slots.get(id)
    }

    /// Number of slots with a bound endpoint
    pub fn bound_count(&self) -> usize {
        self.by_endpoint.len()
    }

    /// Every slot has a bound endpoint
    pub fn is_full(&self) -> bool {
        self.bound_count() == self.slots.len()
    }

    pub fn contains(&self, endpoint: Endpoint) -> bool {
        self.by_endpoint.contains_key(&endpoint)
    }

    /// Slot currently bound to `endpoint`
    pub fn lookup(&self, endpoint: Endpoint) -> Option<usize> {
        self.by_endpoint.get(&endpoint).copied()
    }

    /// (slot id, endpoint) for every bound slot, ordered by slot id
    pub fn bound(&self) -> Vec<(usize, Endpoint)> {
        self.slots
            .iter()
            .filter_map(|s| s.endpoint.map(|ep| (s.id, ep)))
            .collect()
    }

    /// Ready slot ids, ordered by slot id
    pub fn ready_ids(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|s| s.status == SlotStatus::Ready)
            .map(|s| s.id)
            .collect()
    }

    pub fn ready_count(&self) -> usize {
        self.count(SlotStatus::Ready)
    }

    pub fn busy_count(&self) -> usize {
        self.count(SlotStatus::Busy)
    }

    fn count(&self, status: SlotStatus) -> usize {
        self.slots.iter().filter(|s| s.status == status).count()
    }

    /// Bind `endpoint` to the first unbound slot and mark it Ready
    ///
    /// Returns None if the endpoint is already bound or every slot is taken.
    pub fn bind_next(&mut self, endpoint: Endpoint) -> Option<usize> {
        if self.contains(endpoint) {
            return None;
        }

        let slot = self.slots.iter_mut().find(|s| s.status == SlotStatus::Unbound)?;
        slot.endpoint = Some(endpoint);
        slot.status = SlotStatus::Ready;
        self.by_endpoint.insert(endpoint, slot.id);

        Some(slot.id)
    }

    /// Replace the endpoint of a bound slot and mark it Ready
    ///
    /// The old mapping is removed in the same call that installs the new one.
    /// Returns the previous endpoint, or None if the slot is not bound or the new
    /// endpoint already belongs to a slot.
    pub fn rebind(&mut self, id: usize, endpoint: Endpoint) -> Option<Endpoint> {
        if self.contains(endpoint) {
            return None;
        }

        let slot = self.slots.get_mut(id)?;
        let old = slot.endpoint?;

        self.by_endpoint.remove(&old);
        self.by_endpoint.insert(endpoint, id);

        slot.endpoint = Some(endpoint);
        slot.status = SlotStatus::Ready;
        slot.active_task_label = None;
        slot.task_started = None;

        Some(old)
    }

    /// Assign a task to a Ready slot
    pub fn mark_busy(&mut self, id: usize, label: u64, now: Instant) -> bool {
        match self.slots.get_mut(id) {
            Some(slot) if slot.status == SlotStatus::Ready => {
                slot.status = SlotStatus::Busy;
                slot.active_task_label = Some(label);
                slot.task_started = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Complete the task of a Busy slot
    ///
    /// Returns the finished label and when it was dispatched.
    pub fn mark_ready(&mut self, id: usize) -> Option<(u64, Instant)> {
        let slot = self.slots.get_mut(id)?;
        if slot.status != SlotStatus::Busy {
            return None;
        }

        slot.status = SlotStatus::Ready;
        let label = slot.active_task_label.take()?;
        let started = slot.task_started.take()?;

        Some((label, started))
    }

    /// Flag a bound slot as failing its liveness probe
    ///
    /// Returns the label it was executing, if any; that task is lost.
    pub fn mark_suspect(&mut self, id: usize) -> Option<u64> {
        let slot = self.slots.get_mut(id)?;
        if slot.endpoint.is_none() {
            return None;
        }

        slot.status = SlotStatus::SuspectedDead;
        slot.task_started = None;
        slot.active_task_label.take()
    }

    /// Return every slot to Unbound
    pub fn reset(&mut self) {
        let size = self.slots.len();
        self.slots = (0..size).map(WorkerSlot::unbound).collect();
        self.by_endpoint.clear();
    }

    /// Proxy for sending to a bound slot
    pub fn proxy(&self, id: usize, transport: &Arc<dyn Transport>) -> Option<WorkerProxy> {
        let endpoint = self.slots.get(id)?.endpoint?;
        Some(WorkerProxy::new(id, endpoint, Arc::clone(transport)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::RecordingTransport;

    fn ep(port: u16) -> Endpoint {
        Endpoint::new(port)
    }

    #[test]
    fn test_bind_in_order_until_full() {
        let mut registry = SlotRegistry::new(2);
        assert_eq!(registry.bind_next(ep(5000)), Some(0));
        assert_eq!(registry.bind_next(ep(5000)), None);
        assert_eq!(registry.bind_next(ep(5001)), Some(1));
        assert!(registry.is_full());
        assert_eq!(registry.bind_next(ep(5002)), None);
        assert_eq!(registry.ready_ids(), vec![0, 1]);
    }

    #[test]
    fn test_rebind_moves_mapping() {
        let mut registry = SlotRegistry::new(2);
        registry.bind_next(ep(5000));
        registry.bind_next(ep(5001));
        registry.mark_busy(1, 7, Instant::now());

        assert_eq!(registry.rebind(1, ep(6000)), Some(ep(5001)));
        assert_eq!(registry.lookup(ep(6000)), Some(1));
        assert_eq!(registry.lookup(ep(5001)), None);
        assert_eq!(registry.len(), 2);

        let slot = registry.slot(1).unwrap();
        assert_eq!(slot.status(), SlotStatus::Ready);
        assert_eq!(slot.active_task_label(), None);

        // Cannot steal an endpoint bound elsewhere
        assert_eq!(registry.rebind(1, ep(5000)), None);
    }

    #[test]
    fn test_busy_ready_cycle() {
        let mut registry = SlotRegistry::new(1);
        registry.bind_next(ep(5000));

        assert!(registry.mark_busy(0, 3, Instant::now()));
        assert!(!registry.mark_busy(0, 4, Instant::now()));
        assert_eq!(registry.busy_count(), 1);

        let (label, _) = registry.mark_ready(0).unwrap();
        assert_eq!(label, 3);
        assert!(registry.mark_ready(0).is_none());
        assert_eq!(registry.ready_count(), 1);
    }

    #[test]
    fn test_suspect_returns_lost_label() {
        let mut registry = SlotRegistry::new(1);
        assert_eq!(registry.mark_suspect(0), None);

        registry.bind_next(ep(5000));
        registry.mark_busy(0, 9, Instant::now());
        assert_eq!(registry.mark_suspect(0), Some(9));
        assert_eq!(registry.slot(0).unwrap().status(), SlotStatus::SuspectedDead);
    }

    #[test]
    fn test_reset_unbinds_all() {
        let mut registry = SlotRegistry::new(3);
        registry.bind_next(ep(5000));
        registry.bind_next(ep(5001));
        registry.reset();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.bound_count(), 0);
        assert!(registry
            .slots()
            .iter()
            .all(|s| s.status() == SlotStatus::Unbound && s.endpoint().is_none()));
    }

    #[test]
    fn test_proxy_sends_to_bound_endpoint() {
        let recorder = RecordingTransport::new();
        let transport: Arc<dyn Transport> = Arc::new(recorder.clone());
        let mut registry = SlotRegistry::new(2);
        registry.bind_next(ep(5000));

        assert!(registry.proxy(1, &transport).is_none());

        let proxy = registry.proxy(0, &transport).unwrap();
        assert_eq!(proxy.slot(), 0);
        proxy.start_task(4);
        proxy.echo("5000");
        proxy.stop();

        assert_eq!(recorder.payloads_to(ep(5000), Topic::StartTask), vec!["4"]);
        assert_eq!(recorder.payloads_to(ep(5000), Topic::EchoRequest), vec!["5000"]);
        assert_eq!(recorder.count(Topic::Stop), 1);
    }
}
