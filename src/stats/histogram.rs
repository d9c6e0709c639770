//! Task latency histogram using HdrHistogram
//!
//! Records the time from a task's dispatch to the arrival of its result. Task
//! latencies range from microseconds (tiny inputs) to minutes (a worker being
//! replaced mid-task), so the histogram tracks 1µs to 1 hour with 3 significant
//! digits.
//!
//! # Example
//!
//! ```
//! use svcpool::stats::histogram::LatencyHistogram;
//! use std::time::Duration;
//!
//! let mut hist = LatencyHistogram::new();
//! hist.record(Duration::from_millis(12));
//! hist.record(Duration::from_millis(40));
//!
//! assert_eq!(hist.len(), 2);
//! assert!(hist.percentile(50.0).is_some());
//! ```

use hdrhistogram::Histogram;
use std::time::Duration;

const MAX_MICROS: u64 = 3_600_000_000;

/// Latency histogram in microseconds
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    histogram: Option<Histogram<u64>>,
}

impl LatencyHistogram {
    /// Create an empty histogram
    ///
    /// Construction only fails for invalid bounds; the bounds here are
    /// constants, but a failure still degrades to a histogram that records
    /// nothing instead of panicking.
    pub fn new() -> Self {
        Self {
            histogram: Histogram::new_with_bounds(1, MAX_MICROS, 3).ok(),
        }
    }

    /// Record one latency sample, clamped to [1µs, 1h]
    #[inline]
    pub fn record(&mut self, latency: Duration) {
        if let Some(histogram) = self.histogram.as_mut() {
            let micros = (latency.as_micros() as u64).clamp(1, MAX_MICROS);
            let _ = histogram.record(micros);
        }
    }

    /// Value at `percentile` (0.0 - 100.0), or None if empty
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        self.non_empty()
            .map(|h| Duration::from_micros(h.value_at_percentile(percentile)))
    }

    pub fn min(&self) -> Option<Duration> {
        self.non_empty().map(|h| Duration::from_micros(h.min()))
    }

    pub fn max(&self) -> Option<Duration> {
        self.non_empty().map(|h| Duration::from_micros(h.max()))
    }

    pub fn mean(&self) -> Option<Duration> {
        self.non_empty().map(|h| Duration::from_micros(h.mean() as u64))
    }

    /// Number of samples recorded
    pub fn len(&self) -> u64 {
        self.histogram.as_ref().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all samples
    pub fn reset(&mut self) {
        if let Some(histogram) = self.histogram.as_mut() {
            histogram.reset();
        }
    }

    fn non_empty(&self) -> Option<&Histogram<u64>> {
        self.histogram.as_ref().filter(|h| h.len() > 0)
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}
