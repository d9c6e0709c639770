//! Observer events emitted by the coordinator
//!
//! The coordinator never prints. Everything a user might want to see (progress,
//! replacements, the final throughput) is pushed onto an unbounded channel and
//! rendered by whoever holds the receiving end.

use crate::bus::Endpoint;
use crate::stats::RunSummary;
use tokio::sync::mpsc;

/// Sending half handed to the coordinator
pub type EventSender = mpsc::UnboundedSender<PoolEvent>;

/// Receiving half handed to the observer
pub type EventReceiver = mpsc::UnboundedReceiver<PoolEvent>;

/// Something the observer may want to report
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// Every slot has a bound endpoint
    PoolReady { pool_size: usize },

    /// One task result was accepted
    TaskCompleted {
        slot: usize,
        label: u64,
        magnitude: u64,
        completed: u64,
        total: u64,
    },

    /// A slot failed its liveness probe
    WorkerUnresponsive { slot: usize, endpoint: Endpoint },

    /// A slot was rebound to a newly announced endpoint
    WorkerReplaced {
        slot: usize,
        old_endpoint: Endpoint,
        new_endpoint: Endpoint,
        /// Label that was in flight on the old endpoint
        lost_label: Option<u64>,
        /// Label issued to the new endpoint right after rebinding
        reissued_label: Option<u64>,
    },

    /// Every probed slot echoed; the announced endpoint was dropped
    ProbeDiscarded { endpoint: Endpoint },

    /// All tasks of a run completed
    RunFinished(RunSummary),

    /// The pool was torn down with `stop_all`
    PoolStopped,
}

/// Create an event channel
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
