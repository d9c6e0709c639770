//! Run statistics
//!
//! A run's headline number is its throughput: wall-clock time per unit of
//! aggregate result magnitude. Task cost is randomized, so dividing elapsed time
//! by the summed magnitudes normalizes runs with different draws against each
//! other.
//!
//! # Example
//!
//! ```
//! use svcpool::stats::Throughput;
//! use std::time::Duration;
//!
//! let t = Throughput::compute(Duration::from_secs(2), 1_000_000);
//! assert_eq!(t, Throughput::MicrosPerUnit(2.0));
//!
//! // Zero aggregate magnitude is reported as undefined, never divided
//! assert_eq!(Throughput::compute(Duration::from_secs(2), 0), Throughput::Undefined);
//! ```

pub mod histogram;

use histogram::LatencyHistogram;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Microseconds per second: throughput is reported in µs per unit of magnitude
pub const SCALE_FACTOR: f64 = 1_000_000.0;

/// Time per unit of aggregate magnitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Throughput {
    /// Microseconds of wall-clock time per unit of magnitude
    MicrosPerUnit(f64),
    /// Aggregate magnitude was zero
    Undefined,
}

impl Throughput {
    pub fn compute(elapsed: Duration, aggregate_magnitude: u64) -> Self {
        if aggregate_magnitude == 0 {
            return Throughput::Undefined;
        }
        Throughput::MicrosPerUnit(elapsed.as_secs_f64() * SCALE_FACTOR / aggregate_magnitude as f64)
    }

    pub fn micros_per_unit(&self) -> Option<f64> {
        match self {
            Throughput::MicrosPerUnit(v) => Some(*v),
            Throughput::Undefined => None,
        }
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Sub-microsecond rates would otherwise print as 0
            Throughput::MicrosPerUnit(v) if *v < 10.0 => {
                write!(f, "{:.3} micro seconds per unit of magnitude", v)
            }
            Throughput::MicrosPerUnit(v) => write!(f, "{:.0} micro seconds per unit of magnitude", v),
            Throughput::Undefined => write!(f, "undefined (aggregate magnitude is zero)"),
        }
    }
}

/// Percentile summary of task latencies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatencySummary {
    pub samples: u64,
    pub min: Option<Duration>,
    pub mean: Option<Duration>,
    pub p50: Option<Duration>,
    pub p90: Option<Duration>,
    pub p99: Option<Duration>,
    pub max: Option<Duration>,
}

impl LatencySummary {
    pub fn from_histogram(hist: &LatencyHistogram) -> Self {
        Self {
            samples: hist.len(),
            min: hist.min(),
            mean: hist.mean(),
            p50: hist.percentile(50.0),
            p90: hist.percentile(90.0),
            p99: hist.percentile(99.0),
            max: hist.max(),
        }
    }
}

/// Outcome of one completed run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub total_tasks: u64,
    pub completed: u64,
    pub aggregate_magnitude: u64,
    pub elapsed: Duration,
    pub throughput: Throughput,
    pub latency: LatencySummary,
    /// Tasks re-issued because their worker was replaced mid-task
    pub reissued: u64,
}
