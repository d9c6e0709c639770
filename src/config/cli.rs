//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ExecutionMode {
    /// Coordinator mode (default) - build the pool and run tasks
    #[default]
    Coordinator,
    /// Worker mode - one pool worker (normally started by the coordinator)
    Worker,
}

/// Worker launcher type
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LauncherArg {
    /// One child process per slot
    Process,
    /// One task per slot inside the coordinator process
    InProcess,
}

/// svcpool - worker pool coordinator with liveness-based replacement
#[derive(Parser, Debug, Default)]
#[command(name = "svcpool")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: coordinator or worker
    #[arg(long, value_enum, default_value = "coordinator")]
    pub mode: ExecutionMode,

    // === Pool Options ===
    /// Number of worker slots
    #[arg(short = 'n', long)]
    pub pool_size: Option<usize>,

    /// Maximum number of tasks in flight at once
    #[arg(long)]
    pub launch_cap: Option<usize>,

    /// How workers are started
    #[arg(long, value_enum)]
    pub launcher: Option<LauncherArg>,

    /// Do not restart workers that exit
    #[arg(long)]
    pub no_restart: bool,

    // === Task Options ===
    /// Tasks per run
    #[arg(short = 't', long)]
    pub tasks: Option<u64>,

    /// Upper limit for each task's random bound
    #[arg(long)]
    pub task_bound: Option<u64>,

    /// Number of runs on the same pool
    #[arg(long)]
    pub runs: Option<u32>,

    // === Liveness Options ===
    /// Liveness probe window in milliseconds
    #[arg(long)]
    pub liveness_timeout_ms: Option<u64>,

    /// Worker stop-flag poll interval in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    // === Bus Options ===
    /// Coordinator's loopback port
    #[arg(long, env = "SVCPOOL_COORDINATOR_PORT")]
    pub coordinator_port: Option<u16>,

    // === Output Options ===
    /// Write a JSON run report to this path
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    /// Suppress per-task progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    // === Configuration File ===
    /// TOML configuration file
    #[arg(short = 'c', long, env = "SVCPOOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_coordinator_flags() {
        let cli = Cli::try_parse_from([
            "svcpool",
            "--pool-size",
            "4",
            "--tasks",
            "30",
            "--launcher",
            "in-process",
            "--no-restart",
            "--liveness-timeout-ms",
            "500",
        ])
        .unwrap();

        assert_eq!(cli.mode, ExecutionMode::Coordinator);
        assert_eq!(cli.pool_size, Some(4));
        assert_eq!(cli.tasks, Some(30));
        assert_eq!(cli.launcher, Some(LauncherArg::InProcess));
        assert!(cli.no_restart);
        assert_eq!(cli.liveness_timeout_ms, Some(500));
    }

    #[test]
    fn test_parse_worker_mode() {
        let cli = Cli::try_parse_from([
            "svcpool",
            "--mode",
            "worker",
            "--coordinator-port",
            "4000",
            "--task-bound",
            "100",
        ])
        .unwrap();

        assert_eq!(cli.mode, ExecutionMode::Worker);
        assert_eq!(cli.coordinator_port, Some(4000));
        assert_eq!(cli.task_bound, Some(100));
    }

    #[test]
    fn test_rejects_unknown_launcher() {
        assert!(Cli::try_parse_from(["svcpool", "--launcher", "thread"]).is_err());
    }
}
