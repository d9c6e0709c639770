//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//!
//! Settings are layered: built-in defaults, then an optional TOML file
//! (`--config`), then CLI flags. The merged result is validated once.
//!
//! # Example
//!
//! ```toml
//! [pool]
//! pool_size = 4
//! launch_cap = 8
//! launcher = "process"
//!
//! [tasks]
//! task_count = 40
//! task_bound = 40000
//!
//! [liveness]
//! timeout_ms = 2000
//! ```

pub mod cli;
pub mod toml;
pub mod validator;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Build the effective configuration for a CLI invocation
    pub fn load(cli: &cli::Cli) -> Result<Self> {
        let base = match &cli.config {
            Some(path) => toml::parse_toml_file(path)?,
            None => Config::default(),
        };

        let config = toml::merge_cli_with_config(cli, base);
        validator::validate_config(&config)
            .and_then(|()| validator::validate_for_mode(&config, cli.mode))
            .context("Configuration validation failed")?;

        Ok(config)
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker slots (1-256)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Maximum number of tasks in flight at once
    #[serde(default = "default_launch_cap")]
    pub launch_cap: usize,
    /// How workers are started
    #[serde(default)]
    pub launcher: LauncherKind,
    /// Restart workers that exit while the pool is running
    #[serde(default = "default_true")]
    pub restart_on_exit: bool,
}

fn default_pool_size() -> usize {
    num_cpus::get().clamp(1, 6)
}

fn default_launch_cap() -> usize {
    8
}

fn default_true() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            launch_cap: default_launch_cap(),
            launcher: LauncherKind::default(),
            restart_on_exit: true,
        }
    }
}

/// Worker launcher type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LauncherKind {
    /// One child process per slot
    #[default]
    Process,
    /// One tokio task per slot in the coordinator process
    InProcess,
}

impl fmt::Display for LauncherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LauncherKind::Process => write!(f, "process"),
            LauncherKind::InProcess => write!(f, "in-process"),
        }
    }
}

/// Task run configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Tasks per run
    #[serde(default = "default_task_count")]
    pub task_count: u64,
    /// Upper limit for each task's random bound
    #[serde(default = "default_task_bound")]
    pub task_bound: u64,
}

fn default_task_count() -> u64 {
    20
}

fn default_task_bound() -> u64 {
    crate::worker::task::DEFAULT_TASK_BOUND
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            task_count: default_task_count(),
            task_bound: default_task_bound(),
        }
    }
}

/// Liveness probe configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Probe window in milliseconds
    #[serde(default = "default_liveness_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_liveness_timeout_ms() -> u64 {
    2000
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_liveness_timeout_ms(),
        }
    }
}

/// Worker-side configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Stop-flag poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Bus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Coordinator's loopback port (0 picks a free port in coordinator mode)
    #[serde(default = "default_coordinator_port")]
    pub coordinator_port: u16,
}

fn default_coordinator_port() -> u16 {
    3002
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            coordinator_port: default_coordinator_port(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// JSON report path
    pub json_output: Option<PathBuf>,
    /// Suppress per-task progress
    #[serde(default)]
    pub quiet: bool,
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Verbose diagnostics
    #[serde(default)]
    pub debug: bool,
    /// Number of task runs on the same pool
    #[serde(default = "default_runs")]
    pub runs: u32,
}

fn default_runs() -> u32 {
    1
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            debug: false,
            runs: default_runs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.pool.pool_size >= 1 && config.pool.pool_size <= 6);
        assert_eq!(config.pool.launch_cap, 8);
        assert_eq!(config.pool.launcher, LauncherKind::Process);
        assert!(config.pool.restart_on_exit);
        assert_eq!(config.tasks.task_count, 20);
        assert_eq!(config.tasks.task_bound, 40_000);
        assert_eq!(config.liveness.timeout_ms, 2000);
        assert_eq!(config.worker.poll_interval_ms, 1000);
        assert_eq!(config.bus.coordinator_port, 3002);
        assert_eq!(config.runtime.runs, 1);
        assert!(validator::validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_rejects_worker_port_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bus]\ncoordinator_port = 0").unwrap();

        let worker = cli::Cli {
            mode: cli::ExecutionMode::Worker,
            config: Some(file.path().to_path_buf()),
            ..cli::Cli::default()
        };
        assert!(Config::load(&worker).is_err());

        let coordinator = cli::Cli {
            config: Some(file.path().to_path_buf()),
            ..cli::Cli::default()
        };
        assert_eq!(Config::load(&coordinator).unwrap().bus.coordinator_port, 0);
    }

    #[test]
    fn test_launcher_kind_display() {
        assert_eq!(LauncherKind::Process.to_string(), "process");
        assert_eq!(LauncherKind::InProcess.to_string(), "in-process");
    }
}
