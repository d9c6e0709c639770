//! In-process worker launcher

use super::{WorkerLauncher, RESTART_DELAY};
use crate::worker::{WorkerNode, WorkerSettings};
use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Runs each worker as a tokio task in the current runtime
pub struct InProcessLauncher {
    settings: WorkerSettings,
    restart_on_exit: bool,
    supervising: Arc<AtomicBool>,
    workers: Mutex<HashMap<usize, JoinHandle<()>>>,
}

impl InProcessLauncher {
    pub fn new(settings: WorkerSettings, restart_on_exit: bool) -> Self {
        Self {
            settings,
            restart_on_exit,
            supervising: Arc::new(AtomicBool::new(true)),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Abort the worker task for `slot`, as if its process had crashed
    ///
    /// The worker's endpoint is released immediately and it is not restarted.
    pub fn kill(&self, slot: usize) -> bool {
        match self.lock().remove(&slot) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<usize, JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WorkerLauncher for InProcessLauncher {
    fn launch(&self, slot: usize) -> Result<()> {
        let handle = tokio::spawn(supervised_worker(
            slot,
            self.settings,
            self.restart_on_exit,
            Arc::clone(&self.supervising),
        ));

        if let Some(previous) = self.lock().insert(slot, handle) {
            previous.abort();
        }
        debug!("Launched in-process worker for slot {}", slot);
        Ok(())
    }

    fn stop_supervising(&self) {
        self.supervising.store(false, Ordering::Relaxed);
    }

    fn shutdown(&self) {
        self.stop_supervising();
        for (_, handle) in self.lock().drain() {
            handle.abort();
        }
    }
}

async fn supervised_worker(
    slot: usize,
    settings: WorkerSettings,
    restart_on_exit: bool,
    supervising: Arc<AtomicBool>,
) {
    supervise_slot(slot, restart_on_exit, supervising, || {
        WorkerNode::new(settings).run()
    })
    .await
}

/// Run a worker, starting it again whenever it exits while supervising
async fn supervise_slot<F, Fut>(
    slot: usize,
    restart_on_exit: bool,
    supervising: Arc<AtomicBool>,
    mut run: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        match run().await {
            Ok(()) => debug!("Worker for slot {} exited", slot),
            Err(e) => warn!("Worker for slot {} failed: {:#}", slot, e),
        }

        if !restart_on_exit || !supervising.load(Ordering::Relaxed) {
            break;
        }
        tokio::time::sleep(RESTART_DELAY).await;
        debug!("Restarting in-process worker for slot {}", slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusListener;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Count runs; the run numbered `stop_after` turns supervision off
    async fn count_runs(restart_on_exit: bool, supervising: bool, stop_after: usize) -> usize {
        let supervising = Arc::new(AtomicBool::new(supervising));
        let runs = Arc::new(AtomicUsize::new(0));

        let flag = Arc::clone(&supervising);
        let counter = Arc::clone(&runs);
        supervise_slot(0, restart_on_exit, supervising, move || {
            let flag = Arc::clone(&flag);
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) + 1 >= stop_after {
                    flag.store(false, Ordering::SeqCst);
                }
                Err(anyhow::anyhow!("worker crashed"))
            }
        })
        .await;

        runs.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_restarts_while_supervising() {
        assert_eq!(count_runs(true, true, 3).await, 3);
    }

    #[tokio::test]
    async fn test_no_restart_when_not_supervising() {
        assert_eq!(count_runs(true, false, usize::MAX).await, 1);
        assert_eq!(count_runs(false, true, usize::MAX).await, 1);
    }

    #[tokio::test]
    async fn test_kill_and_shutdown() {
        let listener = BusListener::bind(0).await.unwrap();
        let launcher = InProcessLauncher::new(
            WorkerSettings {
                coordinator: listener.endpoint(),
                poll_interval: Duration::from_millis(50),
                task_bound: 100,
            },
            true,
        );

        launcher.launch(0).unwrap();
        launcher.launch(1).unwrap();
        assert!(launcher.kill(0));
        assert!(!launcher.kill(0));

        launcher.shutdown();
        assert!(!launcher.kill(1));
        assert!(!launcher.supervising.load(Ordering::Relaxed));
    }
}
