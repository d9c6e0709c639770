//! Configuration validation

use super::cli::ExecutionMode;
use super::*;
use anyhow::Result;
use tracing::warn;

/// Largest supported pool
pub const MAX_POOL_SIZE: usize = 256;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_pool(&config.pool)?;
    validate_tasks(&config.tasks)?;
    validate_timing(config)?;
    validate_runtime(&config.runtime)?;

    Ok(())
}

/// Validate settings that only make sense in one execution mode
pub fn validate_for_mode(config: &Config, mode: ExecutionMode) -> Result<()> {
    if mode == ExecutionMode::Worker {
        // Port 0 means "any free port" for the coordinator, never a peer address
        if config.bus.coordinator_port == 0 {
            anyhow::bail!("worker mode requires a non-zero coordinator_port");
        }
        if config.output.json_output.is_some() {
            anyhow::bail!("json_output is only valid in coordinator mode");
        }
    }

    Ok(())
}

/// Validate pool configuration
pub fn validate_pool(pool: &PoolConfig) -> Result<()> {
    if pool.pool_size == 0 || pool.pool_size > MAX_POOL_SIZE {
        anyhow::bail!(
            "pool_size must be between 1 and {}, got {}",
            MAX_POOL_SIZE,
            pool.pool_size
        );
    }

    if pool.launch_cap == 0 {
        anyhow::bail!("launch_cap must be at least 1");
    }

    // Allowed, but the extra slots only run tasks after a replacement
    if pool.pool_size > pool.launch_cap {
        warn!(
            "pool_size ({}) exceeds launch_cap ({}); at most {} tasks run at once",
            pool.pool_size, pool.launch_cap, pool.launch_cap
        );
    }

    Ok(())
}

/// Validate task configuration
pub fn validate_tasks(tasks: &TaskConfig) -> Result<()> {
    if tasks.task_count == 0 {
        anyhow::bail!("task_count must be at least 1");
    }

    if tasks.task_bound < crate::worker::task::MIN_TASK_BOUND {
        anyhow::bail!(
            "task_bound must be at least {}, got {}",
            crate::worker::task::MIN_TASK_BOUND,
            tasks.task_bound
        );
    }

    Ok(())
}

/// Validate timeouts and intervals
pub fn validate_timing(config: &Config) -> Result<()> {
    if config.liveness.timeout_ms == 0 {
        anyhow::bail!("liveness timeout_ms must be greater than 0");
    }

    if config.worker.poll_interval_ms == 0 {
        anyhow::bail!("worker poll_interval_ms must be greater than 0");
    }

    Ok(())
}

/// Validate runtime configuration
pub fn validate_runtime(runtime: &RuntimeConfig) -> Result<()> {
    if runtime.runs == 0 {
        anyhow::bail!("runs must be at least 1");
    }

    Ok(())
}
