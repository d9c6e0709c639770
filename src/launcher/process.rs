//! Child-process worker launcher
//!
//! Each slot gets a child process running this same executable in worker mode:
//!
//! ```text
//! svcpool --mode worker --coordinator-port 3002 --poll-interval-ms 1000 --task-bound 40000
//! ```
//!
//! A supervisor task polls the children with `try_wait`. A child that exited
//! while supervision is on is started again after [`RESTART_DELAY`], which is
//! how a crashed worker comes back on a new endpoint.

use super::{WorkerLauncher, RESTART_DELAY};
use crate::worker::WorkerSettings;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often the supervisor checks for exited children
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(250);

struct Shared {
    exe: PathBuf,
    settings: WorkerSettings,
    restart_on_exit: bool,
    debug: bool,
    supervising: AtomicBool,
    shut_down: AtomicBool,
    children: Mutex<HashMap<usize, Child>>,
}

/// Launches workers as child processes of the coordinator
pub struct ProcessLauncher {
    shared: Arc<Shared>,
}

impl ProcessLauncher {
    /// Create the launcher and start its supervisor
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(settings: WorkerSettings, restart_on_exit: bool, debug: bool) -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to get current executable path")?;

        let shared = Arc::new(Shared {
            exe,
            settings,
            restart_on_exit,
            debug,
            supervising: AtomicBool::new(true),
            shut_down: AtomicBool::new(false),
            children: Mutex::new(HashMap::new()),
        });

        tokio::spawn(supervise(Arc::clone(&shared)));

        Ok(Self { shared })
    }
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<usize, Child>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn command(&self, slot: usize) -> Result<Command> {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("--mode").arg("worker");
        cmd.arg("--coordinator-port")
            .arg(self.settings.coordinator.port().to_string());
        cmd.arg("--poll-interval-ms")
            .arg(self.settings.poll_interval.as_millis().to_string());
        cmd.arg("--task-bound")
            .arg(self.settings.task_bound.to_string());

        // Worker output goes to a log file in debug mode, nowhere otherwise
        if self.debug {
            cmd.arg("--debug");
            let log_path = format!("/tmp/svcpool_worker_{}.log", slot);
            let log_file = std::fs::File::create(&log_path)
                .with_context(|| format!("Failed to create worker log file {}", log_path))?;
            cmd.stdout(Stdio::from(
                log_file.try_clone().context("Failed to clone log file handle")?,
            ));
            cmd.stderr(Stdio::from(log_file));
            debug!("Worker {} log: {}", slot, log_path);
        } else {
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());
        }

        Ok(cmd)
    }

    fn spawn_child(&self, slot: usize) -> Result<()> {
        let child = self
            .command(slot)?
            .spawn()
            .with_context(|| format!("Failed to spawn worker process for slot {}", slot))?;

        debug!("Worker for slot {} started (PID: {})", slot, child.id());

        let previous = self.lock().insert(slot, child);
        if let Some(mut previous) = previous {
            terminate(slot, &mut previous);
        }
        Ok(())
    }

    /// Children that have exited, removed from the table
    fn reap(&self) -> Vec<(usize, String)> {
        let mut children = self.lock();
        let mut exited = Vec::new();

        for (&slot, child) in children.iter_mut() {
            match child.try_wait() {
                Ok(Some(status)) => exited.push((slot, status.to_string())),
                Ok(None) => {}
                Err(e) => exited.push((slot, format!("unknown status ({})", e))),
            }
        }
        for (slot, _) in &exited {
            children.remove(slot);
        }

        exited
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, slot: usize) -> Result<()> {
        self.shared.spawn_child(slot)
    }

    fn stop_supervising(&self) {
        self.shared.supervising.store(false, Ordering::Relaxed);
    }

    fn shutdown(&self) {
        self.stop_supervising();
        self.shared.shut_down.store(true, Ordering::Relaxed);

        let children: Vec<(usize, Child)> = self.shared.lock().drain().collect();
        for (slot, mut child) in children {
            terminate(slot, &mut child);
        }
    }
}

impl Drop for ProcessLauncher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn supervise(shared: Arc<Shared>) {
    let mut tick = tokio::time::interval(SUPERVISE_INTERVAL);

    loop {
        tick.tick().await;
        if shared.shut_down.load(Ordering::Relaxed) {
            break;
        }
        restart_exited(&shared).await;
    }
}

/// Reap exited children and start them again while supervising
///
/// Returns the slots that got a new child.
async fn restart_exited(shared: &Shared) -> Vec<usize> {
    let mut restarted = Vec::new();

    for (slot, status) in shared.reap() {
        let restart = shared.restart_on_exit && shared.supervising.load(Ordering::Relaxed);
        if !restart {
            debug!("Worker for slot {} exited with {}", slot, status);
            continue;
        }

        warn!("Worker for slot {} exited with {}, restarting", slot, status);
        tokio::time::sleep(RESTART_DELAY).await;
        if shared.shut_down.load(Ordering::Relaxed) {
            break;
        }
        match shared.spawn_child(slot) {
            Ok(()) => {
                info!("Worker for slot {} restarted", slot);
                restarted.push(slot);
            }
            Err(e) => warn!("Failed to restart worker for slot {}: {:#}", slot, e),
        }
    }

    restarted
}

/// Kill a child that is still running and reap it
fn terminate(slot: usize, child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!("Worker for slot {} already exited with {}", slot, status);
        }
        _ => {
            debug!("Killing worker for slot {} (PID: {})", slot, child.id());
            if let Err(e) = child.kill() {
                warn!("Failed to kill worker for slot {}: {}", slot, e);
            }
            match child.wait() {
                Ok(status) => debug!("Worker for slot {} killed with {}", slot, status),
                Err(e) => warn!("Failed to reap worker for slot {}: {}", slot, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Endpoint;

    fn shared(debug: bool) -> Shared {
        Shared {
            exe: PathBuf::from("/usr/bin/svcpool"),
            settings: WorkerSettings {
                coordinator: Endpoint::new(3002),
                poll_interval: Duration::from_millis(1000),
                task_bound: 500,
            },
            restart_on_exit: true,
            debug,
            supervising: AtomicBool::new(true),
            shut_down: AtomicBool::new(false),
            children: Mutex::new(HashMap::new()),
        }
    }

    #[test]
    fn test_worker_command_line() {
        let cmd = shared(false).command(0).unwrap();
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(cmd.get_program(), "/usr/bin/svcpool");
        assert_eq!(
            args,
            vec![
                "--mode",
                "worker",
                "--coordinator-port",
                "3002",
                "--poll-interval-ms",
                "1000",
                "--task-bound",
                "500",
            ]
        );
    }

    #[test]
    fn test_reap_empty() {
        assert!(shared(false).reap().is_empty());
    }

    /// Launcher whose "worker" exits immediately
    #[cfg(unix)]
    fn short_lived() -> ProcessLauncher {
        ProcessLauncher {
            shared: Arc::new(Shared {
                exe: PathBuf::from("/bin/true"),
                ..shared(false)
            }),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reap_reports_exited_child() {
        let launcher = short_lived();
        launcher.launch(0).unwrap();

        let mut exited = Vec::new();
        for _ in 0..100 {
            exited = launcher.shared.reap();
            if !exited.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(exited.len(), 1);
        assert_eq!(exited[0].0, 0);
        assert!(exited[0].1.contains("exit status: 0"));
        assert!(launcher.shared.lock().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_relaunch_replaces_child() {
        let launcher = short_lived();
        launcher.launch(0).unwrap();
        launcher.launch(0).unwrap();

        // The first child was terminated and reaped outside the table lock
        assert_eq!(launcher.shared.lock().len(), 1);
        launcher.shutdown();
        assert!(launcher.shared.lock().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restarts_only_while_supervising() {
        let launcher = short_lived();
        launcher.launch(0).unwrap();

        let mut restarted = Vec::new();
        for _ in 0..100 {
            restarted = restart_exited(&launcher.shared).await;
            if !restarted.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(restarted, vec![0]);
        assert!(launcher.shared.lock().contains_key(&0));

        // The restarted child exits too, and now stays down
        launcher.stop_supervising();
        for _ in 0..100 {
            if launcher.shared.lock().is_empty() {
                break;
            }
            assert!(restart_exited(&launcher.shared).await.is_empty());
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(launcher.shared.lock().is_empty());
        assert!(restart_exited(&launcher.shared).await.is_empty());
    }
}
