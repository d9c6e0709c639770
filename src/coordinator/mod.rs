//! Coordinator
//!
//! The coordinator owns the worker slot registry, the task counters and the
//! liveness prober. All of its state lives in one [`Coordinator`] value that is
//! mutated by one handler at a time; the async plumbing that feeds it inbound
//! messages, probe expiries and control commands lives in [`service`].
//!
//! # Run Lifecycle
//!
//! ```text
//! register × N ──► PoolReady
//! dispatch(T)  ──► start-task to min(T, ready, launch_cap) slots
//! on_result    ──► TaskCompleted, next label to the same slot
//!              ──► RunFinished once completed == T
//! stop_all     ──► stop to every slot, registry back to N unbound slots
//! ```
//!
//! # Replacement
//!
//! A worker that dies and is restarted comes back on a new endpoint. When an
//! unknown endpoint announces itself to a full pool, the coordinator echoes
//! every bound slot and, once the probe window closes, rebinds the first silent
//! slot to the new endpoint. If that slot was Busy its task is lost; the unit is
//! issued again to the rebound slot under a fresh label so the run still
//! completes.
//!
//! # Example
//!
//! ```
//! use svcpool::bus::{Endpoint, Topic};
//! use svcpool::bus::mock::RecordingTransport;
//! use svcpool::coordinator::{events, Coordinator, CoordinatorSettings};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let transport = RecordingTransport::new();
//! let (tx, _rx) = events::channel();
//! let settings = CoordinatorSettings {
//!     pool_size: 2,
//!     launch_cap: 8,
//!     liveness_timeout: Duration::from_secs(2),
//! };
//! let mut coordinator = Coordinator::new(settings, Arc::new(transport.clone()), tx);
//!
//! coordinator.register(Endpoint::new(5000));
//! coordinator.register(Endpoint::new(5001));
//! assert_eq!(coordinator.dispatch(3).unwrap(), 2);
//! assert_eq!(transport.count(Topic::StartTask), 2);
//! ```

pub mod events;
pub mod liveness;
pub mod registry;
pub mod service;

use crate::bus::{codec, DispatchTable, Endpoint, Envelope, Topic, Transport};
use crate::config::Config;
use crate::error::{PoolError, PoolResult};
use crate::stats::histogram::LatencyHistogram;
use crate::stats::{LatencySummary, RunSummary, Throughput};
use events::{EventSender, PoolEvent};
use liveness::{LivenessProber, ProbeId};
use registry::SlotRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Coordinator tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Number of worker slots
    pub pool_size: usize,
    /// Maximum number of tasks in flight at once
    pub launch_cap: usize,
    /// Probe window for liveness checks
    pub liveness_timeout: Duration,
}

impl From<&Config> for CoordinatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            pool_size: config.pool.pool_size,
            launch_cap: config.pool.launch_cap,
            liveness_timeout: Duration::from_millis(config.liveness.timeout_ms),
        }
    }
}

/// Per-run counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskCounters {
    pub total_tasks: u64,
    /// Units handed out so far; a re-issued unit is not counted twice
    pub dispatched_count: u64,
    pub completed_count: u64,
    pub aggregate_magnitude: u64,
    /// Next label to hand out; labels are never reused within a run
    pub next_label: u64,
    pub start_time: Option<Instant>,
    /// Units re-issued after their worker was replaced mid-task
    pub reissued: u64,
}

/// Result of an announce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Bound to a previously unbound slot
    Bound { slot: usize },
    /// Endpoint is already bound or already waiting on a probe
    Duplicate,
    /// Pool is full; a liveness probe was started for the endpoint
    Probing { probe: ProbeId },
}

/// Coordinator state
pub struct Coordinator {
    settings: CoordinatorSettings,
    registry: SlotRegistry,
    counters: TaskCounters,
    latency: LatencyHistogram,
    prober: LivenessProber,
    /// Probes started since the last `take_armed_probes` call
    armed: Vec<(ProbeId, Duration)>,
    transport: Arc<dyn Transport>,
    events: EventSender,
}

impl Coordinator {
    pub fn new(
        settings: CoordinatorSettings,
        transport: Arc<dyn Transport>,
        events: EventSender,
    ) -> Self {
        Self {
            registry: SlotRegistry::new(settings.pool_size),
            counters: TaskCounters::default(),
            latency: LatencyHistogram::new(),
            prober: LivenessProber::new(settings.liveness_timeout),
            armed: Vec::new(),
            settings,
            transport,
            events,
        }
    }

    /// Topic table for the coordinator's endpoint
    pub fn dispatch_table() -> DispatchTable<Coordinator> {
        DispatchTable::new()
            .on(Topic::AnnounceEndpoint, handle_announce)
            .on(Topic::Result, handle_result)
            .on(Topic::EchoReply, handle_echo_reply)
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &SlotRegistry {
        &self.registry
    }

    pub fn counters(&self) -> &TaskCounters {
        &self.counters
    }

    pub fn pending_probes(&self) -> usize {
        self.prober.pending_count()
    }

    /// Every slot has a bound endpoint
    pub fn is_pool_ready(&self) -> bool {
        !self.registry.is_empty() && self.registry.is_full()
    }

    /// A run has been dispatched and has tasks in flight
    pub fn run_active(&self) -> bool {
        self.counters.completed_count < self.counters.total_tasks
            && self.registry.busy_count() > 0
    }

    /// Handle a worker announcing its endpoint
    pub fn register(&mut self, endpoint: Endpoint) -> RegisterOutcome {
        if self.registry.contains(endpoint) || self.prober.is_candidate(endpoint) {
            debug!("Duplicate announce from {}", endpoint);
            return RegisterOutcome::Duplicate;
        }

        if self.registry.is_full() {
            let probe = self.probe_liveness(endpoint);
            return RegisterOutcome::Probing { probe };
        }

        let Some(slot) = self.registry.bind_next(endpoint) else {
            return RegisterOutcome::Duplicate;
        };
        info!(
            "Worker {} bound to slot {} ({}/{})",
            endpoint,
            slot,
            self.registry.bound_count(),
            self.registry.len()
        );

        if self.registry.is_full() {
            info!("Pool ready: {} workers", self.registry.len());
            self.emit(PoolEvent::PoolReady {
                pool_size: self.registry.len(),
            });
        }

        RegisterOutcome::Bound { slot }
    }

    /// Start a run of `total` tasks
    ///
    /// Returns how many tasks were started right away.
    pub fn dispatch(&mut self, total: u64) -> PoolResult<usize> {
        if total == 0 {
            return Err(PoolError::EmptyRun);
        }
        if self.run_active() {
            return Err(PoolError::RunInProgress {
                completed: self.counters.completed_count,
                total: self.counters.total_tasks,
            });
        }

        let ready = self.registry.ready_ids();
        if ready.is_empty() {
            return Err(PoolError::NoWorkersAvailable {
                pool_size: self.registry.len(),
            });
        }

        let initial = (total.min(ready.len() as u64) as usize).min(self.settings.launch_cap);

        self.counters = TaskCounters {
            total_tasks: total,
            start_time: Some(Instant::now()),
            ..TaskCounters::default()
        };
        self.latency.reset();

        for slot in ready.into_iter().take(initial) {
            self.issue(slot);
            self.counters.dispatched_count += 1;
        }

        info!(
            "Dispatched {} of {} tasks ({} ready, launch cap {})",
            initial,
            total,
            self.registry.ready_count() + initial,
            self.settings.launch_cap
        );

        Ok(initial)
    }

    /// Handle a task result sent from `from`
    pub fn on_result(&mut self, from: Endpoint, label: u64, magnitude: u64) -> PoolResult<()> {
        let slot = self
            .registry
            .lookup(from)
            .ok_or(PoolError::UnknownSlotResult {
                endpoint: from,
                label,
            })?;

        let active = self
            .registry
            .slot(slot)
            .and_then(|s| s.active_task_label());
        if active != Some(label) {
            return Err(PoolError::StaleResult {
                slot,
                label,
                active,
            });
        }

        let (_, started) = self
            .registry
            .mark_ready(slot)
            .ok_or(PoolError::StaleResult {
                slot,
                label,
                active,
            })?;

        self.latency.record(started.elapsed());
        self.counters.completed_count += 1;
        self.counters.aggregate_magnitude = self.counters.aggregate_magnitude.saturating_add(magnitude);

        debug!(
            "Slot {} finished label {} (magnitude {}), {}/{}",
            slot, label, magnitude, self.counters.completed_count, self.counters.total_tasks
        );
        self.emit(PoolEvent::TaskCompleted {
            slot,
            label,
            magnitude,
            completed: self.counters.completed_count,
            total: self.counters.total_tasks,
        });

        if self.counters.dispatched_count < self.counters.total_tasks {
            self.issue(slot);
            self.counters.dispatched_count += 1;
        }

        if self.counters.completed_count == self.counters.total_tasks {
            self.finish_run();
        }

        Ok(())
    }

    /// Echo every bound slot to find out which one died
    ///
    /// The probe window is not waited on here: the probe is queued in the armed
    /// list and the owner of the coordinator arranges for `on_probe_timeout` to
    /// be called once it expires.
    pub fn probe_liveness(&mut self, candidate: Endpoint) -> ProbeId {
        let probed = self.registry.bound();

        for &(slot, endpoint) in &probed {
            if let Some(proxy) = self.registry.proxy(slot, &self.transport) {
                proxy.echo(&endpoint.to_string());
            }
        }

        let id = self.prober.start(candidate, probed);
        self.armed.push((id, self.prober.timeout()));

        info!(
            "Unknown worker {} announced to a full pool, probing {} slots (probe {})",
            candidate,
            self.registry.bound_count(),
            id
        );

        id
    }

    /// Handle an echo reply
    pub fn on_echo(&mut self, payload: &str) {
        debug!("Echo reply {:?}", payload);
        self.prober.record_echo(payload);
    }

    /// Resolve a probe whose window has closed
    ///
    /// Returns the slot that was rebound, if any.
    pub fn on_probe_timeout(&mut self, id: ProbeId) -> Option<usize> {
        let probe = self.prober.take(id)?;
        let candidate = probe.candidate();
        debug!(
            "Probe {} closed after {:?} ({} slots probed)",
            id,
            probe.started().elapsed(),
            probe.probed().len()
        );

        if self.registry.contains(candidate) {
            debug!("Probe {} candidate {} already bound", id, candidate);
            self.emit(PoolEvent::ProbeDiscarded {
                endpoint: candidate,
            });
            return None;
        }

        // A slot rebound by an earlier probe no longer answers to its old endpoint
        let silent = probe
            .silent()
            .find(|&(slot, endpoint)| self.registry.lookup(endpoint) == Some(slot));

        let Some((slot, old_endpoint)) = silent else {
            info!("All workers answered probe {}, discarding {}", id, candidate);
            self.emit(PoolEvent::ProbeDiscarded {
                endpoint: candidate,
            });
            return None;
        };

        warn!(
            "{}",
            PoolError::WorkerUnresponsive {
                slot,
                endpoint: old_endpoint
            }
        );
        self.emit(PoolEvent::WorkerUnresponsive {
            slot,
            endpoint: old_endpoint,
        });

        let lost_label = self.registry.mark_suspect(slot);
        self.registry.rebind(slot, candidate)?;

        let reissued_label = if lost_label.is_some() {
            // Already counted in dispatched_count when first handed out
            self.counters.reissued += 1;
            Some(self.issue(slot))
        } else if self.counters.dispatched_count < self.counters.total_tasks
            && self.registry.busy_count() < self.settings.launch_cap
        {
            self.counters.dispatched_count += 1;
            Some(self.issue(slot))
        } else {
            None
        };

        warn!(
            "Slot {} replaced: {} -> {} (lost {:?}, issued {:?})",
            slot, old_endpoint, candidate, lost_label, reissued_label
        );
        self.emit(PoolEvent::WorkerReplaced {
            slot,
            old_endpoint,
            new_endpoint: candidate,
            lost_label,
            reissued_label,
        });

        Some(slot)
    }

    /// Stop every worker and return the registry to its unpopulated state
    pub fn stop_all(&mut self) {
        let bound = self.registry.bound();
        for &(slot, _) in &bound {
            if let Some(proxy) = self.registry.proxy(slot, &self.transport) {
                debug!("Stopping slot {} ({})", proxy.slot(), proxy.endpoint());
                proxy.stop();
            }
        }

        self.registry.reset();
        self.counters = TaskCounters::default();
        self.latency.reset();
        self.prober.clear();
        self.armed.clear();

        info!("Pool stopped ({} workers signalled)", bound.len());
        self.emit(PoolEvent::PoolStopped);
    }

    /// Drain probes that need a timer
    pub fn take_armed_probes(&mut self) -> Vec<(ProbeId, Duration)> {
        std::mem::take(&mut self.armed)
    }

    /// Hand the next label to a Ready slot
    fn issue(&mut self, slot: usize) -> u64 {
        let label = self.counters.next_label;
        self.counters.next_label += 1;

        if self.registry.mark_busy(slot, label, Instant::now()) {
            if let Some(proxy) = self.registry.proxy(slot, &self.transport) {
                debug!("Label {} -> slot {} ({})", label, slot, proxy.endpoint());
                proxy.start_task(label);
            }
        }

        label
    }

    fn finish_run(&mut self) {
        let elapsed = self
            .counters
            .start_time
            .map(|t| t.elapsed())
            .unwrap_or_default();
        let throughput = Throughput::compute(elapsed, self.counters.aggregate_magnitude);

        if throughput == Throughput::Undefined {
            warn!("{}", PoolError::DegenerateAggregate);
        }
        info!(
            "Run finished: {} tasks in {:.3}s, {}",
            self.counters.completed_count,
            elapsed.as_secs_f64(),
            throughput
        );

        let summary = RunSummary {
            total_tasks: self.counters.total_tasks,
            completed: self.counters.completed_count,
            aggregate_magnitude: self.counters.aggregate_magnitude,
            elapsed,
            throughput,
            latency: LatencySummary::from_histogram(&self.latency),
            reissued: self.counters.reissued,
        };
        self.emit(PoolEvent::RunFinished(summary));
    }

    fn emit(&self, event: PoolEvent) {
        // Observer may have gone away; the pool keeps working without one
        let _ = self.events.send(event);
    }
}

fn handle_announce(coordinator: &mut Coordinator, envelope: &Envelope) -> PoolResult<()> {
    let endpoint = codec::decode_endpoint(&envelope.payload)?;
    coordinator.register(endpoint);
    Ok(())
}

fn handle_result(coordinator: &mut Coordinator, envelope: &Envelope) -> PoolResult<()> {
    let (label, magnitude) = codec::decode_result(&envelope.payload)?;
    coordinator.on_result(envelope.reply_to, label, magnitude)
}

fn handle_echo_reply(coordinator: &mut Coordinator, envelope: &Envelope) -> PoolResult<()> {
    let payload = codec::decode_echo(Topic::EchoReply, &envelope.payload)?;
    coordinator.on_echo(&payload);
    Ok(())
}
