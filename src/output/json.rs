//! JSON run report
//!
//! One report per coordinator invocation: host and pool settings, then one
//! entry per run. Durations carry both raw microseconds and a human string.

use crate::config::Config;
use crate::stats::{LatencySummary, RunSummary};
use crate::util::time::format_duration;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        let micros = d.as_micros() as u64;
        let human = format_duration(d);
        Self { micros, human }
    }
}

/// Task latency percentiles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonLatency {
    pub samples: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<JsonDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<JsonDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p50: Option<JsonDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p90: Option<JsonDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p99: Option<JsonDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<JsonDuration>,
}

impl From<&LatencySummary> for JsonLatency {
    fn from(summary: &LatencySummary) -> Self {
        let conv = |d: Option<Duration>| d.map(JsonDuration::from_duration);
        Self {
            samples: summary.samples,
            min: conv(summary.min),
            mean: conv(summary.mean),
            p50: conv(summary.p50),
            p90: conv(summary.p90),
            p99: conv(summary.p99),
            max: conv(summary.max),
        }
    }
}

/// Pool settings the runs were made with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonPoolConfig {
    pub pool_size: usize,
    pub launch_cap: usize,
    pub launcher: String,
    pub task_count: u64,
    pub task_bound: u64,
    pub liveness_timeout_ms: u64,
}

impl From<&Config> for JsonPoolConfig {
    fn from(config: &Config) -> Self {
        Self {
            pool_size: config.pool.pool_size,
            launch_cap: config.pool.launch_cap,
            launcher: config.pool.launcher.to_string(),
            task_count: config.tasks.task_count,
            task_bound: config.tasks.task_bound,
            liveness_timeout_ms: config.liveness.timeout_ms,
        }
    }
}

/// One finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRun {
    pub run: u32,
    pub total_tasks: u64,
    pub completed: u64,
    pub aggregate_magnitude: u64,
    pub elapsed: JsonDuration,
    /// None when the aggregate magnitude was zero
    pub micros_per_unit: Option<f64>,
    pub reissued: u64,
    pub latency: JsonLatency,
}

impl JsonRun {
    pub fn from_summary(run: u32, summary: &RunSummary) -> Self {
        Self {
            run,
            total_tasks: summary.total_tasks,
            completed: summary.completed,
            aggregate_magnitude: summary.aggregate_magnitude,
            elapsed: JsonDuration::from_duration(summary.elapsed),
            micros_per_unit: summary.throughput.micros_per_unit(),
            reissued: summary.reissued,
            latency: JsonLatency::from(&summary.latency),
        }
    }
}

/// Complete report for one coordinator invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub config: JsonPoolConfig,
    /// Workers replaced after failing a liveness probe, across all runs
    pub replacements: u64,
    pub runs: Vec<JsonRun>,
}

impl RunReport {
    pub fn new(config: &Config) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: local_hostname(),
            generated_at: Utc::now(),
            config: JsonPoolConfig::from(config),
            replacements: 0,
            runs: Vec::new(),
        }
    }

    pub fn add_run(&mut self, summary: &RunSummary) {
        let run = self.runs.len() as u32 + 1;
        self.runs.push(JsonRun::from_summary(run, summary));
    }

    pub fn record_replacement(&mut self) {
        self.replacements += 1;
    }
}

fn local_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().into_owned())
}

/// Write JSON report to file
pub fn write_json_output(output_path: &Path, report: &RunReport, pretty: bool) -> Result<()> {
    let file = BufWriter::new(File::create(output_path)?);

    if pretty {
        serde_json::to_writer_pretty(file, report)?;
    } else {
        serde_json::to_writer(file, report)?;
    }

    Ok(())
}
