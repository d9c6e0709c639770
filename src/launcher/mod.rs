//! Worker launching
//!
//! The coordinator never starts workers itself; it asks a [`WorkerLauncher`] to
//! put one worker per slot on the bus and otherwise only sees the endpoints
//! those workers announce.
//!
//! Two launchers exist:
//! - [`ProcessLauncher`]: one child process per slot, running this binary in
//!   `--mode worker`. A supervisor restarts children that exit.
//! - [`InProcessLauncher`]: one tokio task per slot inside the coordinator
//!   process. Used by tests and for quick local runs.
//!
//! Either way, a restarted worker binds a fresh ephemeral endpoint, so the
//! coordinator sees it as an unknown endpoint and runs its liveness probe.

pub mod in_process;
pub mod process;

use crate::bus::Endpoint;
use crate::config::{Config, LauncherKind};
use crate::worker::WorkerSettings;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

pub use in_process::InProcessLauncher;
pub use process::ProcessLauncher;

/// Delay before a crashed worker is started again
pub const RESTART_DELAY: Duration = Duration::from_millis(200);

/// Capability to start one worker per slot
pub trait WorkerLauncher: Send + Sync {
    /// Start the worker for `slot`
    fn launch(&self, slot: usize) -> Result<()>;

    /// Stop restarting workers that exit
    fn stop_supervising(&self);

    /// Stop supervising and terminate whatever is still running
    fn shutdown(&self);
}

/// Build the launcher selected in the configuration
///
/// Must be called from within a tokio runtime.
pub fn build(config: &Config, coordinator: Endpoint) -> Result<Arc<dyn WorkerLauncher>> {
    let settings = WorkerSettings {
        coordinator,
        ..WorkerSettings::from(config)
    };

    let launcher: Arc<dyn WorkerLauncher> = match config.pool.launcher {
        LauncherKind::Process => Arc::new(ProcessLauncher::spawn(
            settings,
            config.pool.restart_on_exit,
            config.runtime.debug,
        )?),
        LauncherKind::InProcess => Arc::new(InProcessLauncher::new(
            settings,
            config.pool.restart_on_exit,
        )),
    };

    Ok(launcher)
}
