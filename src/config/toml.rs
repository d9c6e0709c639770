//! TOML configuration file parsing

use super::cli::{Cli, LauncherArg};
use super::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Config {
    // Pool
    if let Some(pool_size) = cli.pool_size {
        config.pool.pool_size = pool_size;
    }
    if let Some(launch_cap) = cli.launch_cap {
        config.pool.launch_cap = launch_cap;
    }
    if let Some(launcher) = cli.launcher {
        config.pool.launcher = match launcher {
            LauncherArg::Process => LauncherKind::Process,
            LauncherArg::InProcess => LauncherKind::InProcess,
        };
    }
    if cli.no_restart {
        config.pool.restart_on_exit = false;
    }

    // Tasks
    if let Some(tasks) = cli.tasks {
        config.tasks.task_count = tasks;
    }
    if let Some(bound) = cli.task_bound {
        config.tasks.task_bound = bound;
    }

    // Timing
    if let Some(timeout) = cli.liveness_timeout_ms {
        config.liveness.timeout_ms = timeout;
    }
    if let Some(interval) = cli.poll_interval_ms {
        config.worker.poll_interval_ms = interval;
    }

    if let Some(port) = cli.coordinator_port {
        config.bus.coordinator_port = port;
    }

    // Output
    if let Some(ref path) = cli.json_output {
        config.output.json_output = Some(path.clone());
    }
    if cli.quiet {
        config.output.quiet = true;
    }

    // Runtime
    if cli.debug {
        config.runtime.debug = true;
    }
    if let Some(runs) = cli.runs {
        config.runtime.runs = runs;
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_parse_toml_basic() {
        let toml = r#"
[pool]
pool_size = 4
launch_cap = 2
launcher = "in-process"

[tasks]
task_count = 50

[liveness]
timeout_ms = 750
"#;

        let config = parse_toml_string(toml).unwrap();
        assert_eq!(config.pool.pool_size, 4);
        assert_eq!(config.pool.launch_cap, 2);
        assert_eq!(config.pool.launcher, LauncherKind::InProcess);
        assert!(config.pool.restart_on_exit);
        assert_eq!(config.tasks.task_count, 50);
        assert_eq!(config.tasks.task_bound, 40_000);
        assert_eq!(config.liveness.timeout_ms, 750);
        assert_eq!(config.bus.coordinator_port, 3002);
    }

    #[test]
    fn test_parse_toml_empty_is_default() {
        assert_eq!(parse_toml_string("").unwrap(), Config::default());
    }

    #[test]
    fn test_parse_toml_rejects_bad_launcher() {
        let toml = r#"
[pool]
launcher = "thread"
"#;
        assert!(parse_toml_string(toml).is_err());
    }

    #[test]
    fn test_parse_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[output]\nquiet = true\n\n[runtime]\nruns = 3").unwrap();

        let config = parse_toml_file(file.path()).unwrap();
        assert!(config.output.quiet);
        assert_eq!(config.runtime.runs, 3);
    }

    #[test]
    fn test_parse_toml_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_toml_file(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_cli_overrides_file() {
        let base = parse_toml_string("[pool]\npool_size = 4\nlaunch_cap = 2\n").unwrap();
        let cli = Cli::try_parse_from([
            "svcpool",
            "--pool-size",
            "2",
            "--no-restart",
            "--tasks",
            "9",
            "--runs",
            "2",
        ])
        .unwrap();

        let config = merge_cli_with_config(&cli, base);
        assert_eq!(config.pool.pool_size, 2);
        assert_eq!(config.pool.launch_cap, 2);
        assert!(!config.pool.restart_on_exit);
        assert_eq!(config.tasks.task_count, 9);
        assert_eq!(config.runtime.runs, 2);
    }
}
