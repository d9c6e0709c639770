//! svcpool - local worker pool with liveness-based replacement
//!
//! A coordinator keeps a fixed number of worker slots filled, hands out
//! CPU-bound tasks, and aggregates their results into a throughput figure.
//! Workers that stop answering are detected with an echo probe and their
//! slot is rebound to whichever new worker announced itself.
//!
//! # Architecture
//!
//! - **Bus**: length-prefixed MessagePack envelopes over loopback TCP
//! - **Coordinator**: slot registry, task accounting, liveness probing
//! - **Workers**: one task at a time, stop flag polled on a fixed interval
//! - **Launchers**: child processes or in-process tokio tasks
//! - **Stats**: throughput plus HDR latency percentiles per run

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod launcher;
pub mod output;
pub mod stats;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use error::{PoolError, PoolResult};

/// Result type used throughout svcpool
pub type Result<T> = anyhow::Result<T>;
