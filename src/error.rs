//! Error types for the worker pool
//!
//! Every condition here is recoverable: the coordinator logs or surfaces it as an
//! event and keeps running. Plumbing errors (config files, sockets, process
//! spawning) use `anyhow` instead.

use crate::bus::{Endpoint, Topic};
use thiserror::Error;

/// Domain errors raised by coordinator and bus handlers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Dispatch requested while no slot is Ready
    #[error("No workers available: 0 of {pool_size} slots are ready")]
    NoWorkersAvailable { pool_size: usize },

    /// Result arrived from an endpoint that is not bound to any slot
    #[error("Result from unknown endpoint {endpoint} (label {label})")]
    UnknownSlotResult { endpoint: Endpoint, label: u64 },

    /// Result label does not match the task currently assigned to the sender's slot
    #[error("Stale result for label {label} from slot {slot} (active: {active:?})")]
    StaleResult {
        slot: usize,
        label: u64,
        active: Option<u64>,
    },

    /// Payload could not be decoded into the shape its topic requires
    #[error("Malformed {topic} message: {reason}")]
    MalformedMessage { topic: Topic, reason: String },

    /// A slot did not answer its liveness probe in time
    #[error("Worker in slot {slot} ({endpoint}) is unresponsive")]
    WorkerUnresponsive { slot: usize, endpoint: Endpoint },

    /// All results summed to zero magnitude, so throughput is undefined
    #[error("Aggregate magnitude is zero; throughput is undefined")]
    DegenerateAggregate,

    /// Dispatch requested while tasks from a previous run are still in flight
    #[error("A run is already in progress ({completed}/{total} tasks completed)")]
    RunInProgress { completed: u64, total: u64 },

    /// Dispatch requested with zero tasks
    #[error("Task count must be at least 1")]
    EmptyRun,
}

impl PoolError {
    /// Shorthand for building a [`PoolError::MalformedMessage`]
    pub fn malformed(topic: Topic, reason: impl Into<String>) -> Self {
        PoolError::MalformedMessage {
            topic,
            reason: reason.into(),
        }
    }
}

/// Result type for domain operations
pub type PoolResult<T> = std::result::Result<T, PoolError>;
