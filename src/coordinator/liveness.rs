//! Liveness probing
//!
//! When a worker announces an endpoint the coordinator has never seen while the
//! pool is full, some previously bound worker has probably died and been
//! restarted. The prober sends every bound slot an echo request carrying that
//! slot's own endpoint, collects the echoes, and once the timeout fires names
//! the first slot that stayed silent.
//!
//! Several probes can be pending at once (two workers restarting close
//! together). Echo replies are credited to every pending probe.

use crate::bus::Endpoint;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Default probe window
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(2);

/// Identifier of a pending probe
pub type ProbeId = u64;

/// One outstanding probe
#[derive(Debug, Clone)]
pub struct PendingProbe {
    id: ProbeId,
    candidate: Endpoint,
    probed: Vec<(usize, Endpoint)>,
    echoed: HashSet<String>,
    started: Instant,
}

impl PendingProbe {
    pub fn id(&self) -> ProbeId {
        self.id
    }

    /// Provisional endpoint waiting for a dead slot
    pub fn candidate(&self) -> Endpoint {
        self.candidate
    }

    /// (slot id, endpoint) pairs probed, ordered by slot id
    pub fn probed(&self) -> &[(usize, Endpoint)] {
        &self.probed
    }

    pub fn has_echoed(&self, endpoint: Endpoint) -> bool {
        self.echoed.contains(&endpoint.to_string())
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Probed slots that never echoed, in slot-id order
    pub fn silent(&self) -> impl Iterator<Item = (usize, Endpoint)> + '_ {
        self.probed
            .iter()
            .copied()
            .filter(|(_, ep)| !self.has_echoed(*ep))
    }
}

/// Tracks pending probes for the coordinator
#[derive(Debug)]
pub struct LivenessProber {
    timeout: Duration,
    next_id: ProbeId,
    pending: Vec<PendingProbe>,
}

impl LivenessProber {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            next_id: 0,
            pending: Vec::new(),
        }
    }

    /// Probe window
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open a probe for `candidate` over the given bound slots
    pub fn start(&mut self, candidate: Endpoint, probed: Vec<(usize, Endpoint)>) -> ProbeId {
        let id = self.next_id;
        self.next_id += 1;

        self.pending.push(PendingProbe {
            id,
            candidate,
            probed,
            echoed: HashSet::new(),
            started: Instant::now(),
        });

        id
    }

    /// Credit an echo reply to every pending probe
    pub fn record_echo(&mut self, payload: &str) {
        for probe in &mut self.pending {
            probe.echoed.insert(payload.to_string());
        }
    }

    /// Whether `endpoint` is the candidate of a pending probe
    pub fn is_candidate(&self, endpoint: Endpoint) -> bool {
        self.pending.iter().any(|p| p.candidate == endpoint)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Close a probe, handing it back for resolution
    pub fn take(&mut self, id: ProbeId) -> Option<PendingProbe> {
        let index = self.pending.iter().position(|p| p.id == id)?;
        Some(self.pending.remove(index))
    }

    /// Drop all pending probes
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
