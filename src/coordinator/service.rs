//! Coordinator service
//!
//! Runs a [`Coordinator`] on its bus endpoint. One task owns the coordinator and
//! multiplexes three inputs with `tokio::select!`:
//!
//! - inbound bus envelopes, dispatched through the coordinator's topic table
//! - liveness probe expiries, posted by timer tasks
//! - control commands from a [`CoordinatorHandle`]
//!
//! Each input is handled to completion before the next one is looked at, so
//! the coordinator needs no locks. Probe windows never block the loop: every
//! probe gets a spawned `sleep` that posts its id back when the window closes.
//!
//! # Example
//!
//! ```no_run
//! use svcpool::bus::BusListener;
//! use svcpool::coordinator::service::CoordinatorService;
//! use svcpool::coordinator::CoordinatorSettings;
//! use svcpool::launcher::{InProcessLauncher, WorkerLauncher};
//! use svcpool::worker::WorkerSettings;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let listener = BusListener::bind(0).await?;
//! let launcher: Arc<dyn WorkerLauncher> = Arc::new(InProcessLauncher::new(
//!     WorkerSettings {
//!         coordinator: listener.endpoint(),
//!         poll_interval: Duration::from_millis(100),
//!         task_bound: 10_000,
//!     },
//!     true,
//! ));
//! let settings = CoordinatorSettings {
//!     pool_size: 4,
//!     launch_cap: 8,
//!     liveness_timeout: Duration::from_secs(2),
//! };
//!
//! let (service, handle, mut events) = CoordinatorService::new(listener, settings, launcher);
//! tokio::spawn(service.run());
//!
//! handle.start_pool().await?;
//! // ... wait for PoolEvent::PoolReady on `events`, then:
//! handle.dispatch(20).await?;
//! # Ok(())
//! # }
//! ```

use super::events::{self, EventReceiver};
use super::liveness::ProbeId;
use super::{Coordinator, CoordinatorSettings};
use crate::bus::{BusListener, DispatchTable, Endpoint, Envelope, TcpTransport};
use crate::error::PoolResult;
use crate::launcher::WorkerLauncher;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Request sent from a handle to the service loop
pub enum ControlCommand {
    /// Launch one worker per slot
    StartPool { reply: oneshot::Sender<Result<()>> },
    /// Start a run
    Dispatch {
        total: u64,
        reply: oneshot::Sender<PoolResult<usize>>,
    },
    /// Stop every worker and reset the pool
    StopAll { reply: oneshot::Sender<()> },
    /// Leave the service loop
    Shutdown,
}

/// Cloneable handle for driving a running service
#[derive(Clone)]
pub struct CoordinatorHandle {
    endpoint: Endpoint,
    tx: mpsc::UnboundedSender<ControlCommand>,
}

impl CoordinatorHandle {
    /// The coordinator's bus endpoint
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Launch one worker per slot
    ///
    /// Returns once every launch was requested. Workers bind asynchronously;
    /// `PoolEvent::PoolReady` signals that all of them announced.
    pub async fn start_pool(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlCommand::StartPool { reply })?;
        rx.await.context("Coordinator stopped before replying")?
    }

    /// Start a run of `total` tasks
    ///
    /// Domain failures are returned as a [`crate::error::PoolError`] inside the
    /// `anyhow::Error` and can be recovered with `downcast_ref`.
    pub async fn dispatch(&self, total: u64) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlCommand::Dispatch { total, reply })?;
        let started = rx.await.context("Coordinator stopped before replying")??;
        Ok(started)
    }

    /// Stop every worker and reset the registry
    pub async fn stop_all(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlCommand::StopAll { reply })?;
        rx.await.context("Coordinator stopped before replying")
    }

    /// Ask the service loop to exit
    pub fn shutdown(&self) {
        let _ = self.tx.send(ControlCommand::Shutdown);
    }

    fn send(&self, command: ControlCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow::anyhow!("Coordinator service is not running"))
    }
}

/// Event loop owning a [`Coordinator`]
pub struct CoordinatorService {
    listener: BusListener,
    coordinator: Coordinator,
    table: DispatchTable<Coordinator>,
    launcher: Arc<dyn WorkerLauncher>,
    control: mpsc::UnboundedReceiver<ControlCommand>,
    expiry_tx: mpsc::UnboundedSender<ProbeId>,
    expiry_rx: mpsc::UnboundedReceiver<ProbeId>,
}

impl CoordinatorService {
    /// Wire a coordinator to `listener`
    ///
    /// Must be called from within a tokio runtime (the outbound transport starts
    /// its writer task here).
    pub fn new(
        listener: BusListener,
        settings: CoordinatorSettings,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> (Self, CoordinatorHandle, EventReceiver) {
        let endpoint = listener.endpoint();
        let transport = Arc::new(TcpTransport::spawn(endpoint));
        let (event_tx, event_rx) = events::channel();
        let (control_tx, control) = mpsc::unbounded_channel();
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();

        let service = Self {
            listener,
            coordinator: Coordinator::new(settings, transport, event_tx),
            table: Coordinator::dispatch_table(),
            launcher,
            control,
            expiry_tx,
            expiry_rx,
        };
        let handle = CoordinatorHandle {
            endpoint,
            tx: control_tx,
        };

        (service, handle, event_rx)
    }

    /// Serve until shut down or every handle is dropped
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Coordinator listening on {} (pool size {}, launch cap {})",
            self.listener.endpoint(),
            self.coordinator.settings().pool_size,
            self.coordinator.settings().launch_cap
        );

        loop {
            tokio::select! {
                inbound = self.listener.recv() => {
                    let Some(envelope) = inbound else { break };
                    self.handle_envelope(&envelope);
                }
                Some(probe) = self.expiry_rx.recv() => {
                    debug!("Probe {} window closed", probe);
                    self.coordinator.on_probe_timeout(probe);
                }
                command = self.control.recv() => match command {
                    Some(ControlCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }

            self.arm_probe_timers();
        }

        info!("Coordinator on {} shutting down", self.listener.endpoint());
        Ok(())
    }

    fn handle_envelope(&mut self, envelope: &Envelope) {
        debug!("{} from {}", envelope.topic, envelope.reply_to);
        if let Err(e) = self.table.dispatch(&mut self.coordinator, envelope) {
            warn!("Dropped {} from {}: {}", envelope.topic, envelope.reply_to, e);
        }
    }

    fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::StartPool { reply } => {
                let _ = reply.send(self.start_pool());
            }
            ControlCommand::Dispatch { total, reply } => {
                let result = self.coordinator.dispatch(total);
                if let Err(e) = &result {
                    warn!("Dispatch of {} tasks refused: {}", total, e);
                }
                let _ = reply.send(result);
            }
            ControlCommand::StopAll { reply } => {
                // No restarts once the pool is being torn down
                self.launcher.stop_supervising();
                self.coordinator.stop_all();
                let _ = reply.send(());
            }
            ControlCommand::Shutdown => {}
        }
    }

    fn start_pool(&mut self) -> Result<()> {
        let pool_size = self.coordinator.settings().pool_size;
        info!("Launching {} workers", pool_size);

        for slot in 0..pool_size {
            self.launcher
                .launch(slot)
                .with_context(|| format!("Failed to launch worker for slot {}", slot))?;
        }
        Ok(())
    }

    fn arm_probe_timers(&mut self) {
        for (probe, window) in self.coordinator.take_armed_probes() {
            let expiry = self.expiry_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let _ = expiry.send(probe);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::events::PoolEvent;
    use crate::error::PoolError;
    use crate::launcher::InProcessLauncher;
    use crate::stats::RunSummary;
    use crate::worker::WorkerSettings;
    use std::time::Duration;

    struct Pool {
        handle: CoordinatorHandle,
        events: EventReceiver,
        launcher: Arc<InProcessLauncher>,
        service: tokio::task::JoinHandle<Result<()>>,
    }

    async fn pool(pool_size: usize) -> Pool {
        let listener = BusListener::bind(0).await.unwrap();
        let launcher = Arc::new(InProcessLauncher::new(
            WorkerSettings {
                coordinator: listener.endpoint(),
                poll_interval: Duration::from_millis(50),
                task_bound: 2_000,
            },
            false,
        ));
        let settings = CoordinatorSettings {
            pool_size,
            launch_cap: 8,
            liveness_timeout: Duration::from_millis(300),
        };

        let (service, handle, events) =
            CoordinatorService::new(listener, settings, launcher.clone());
        let service = tokio::spawn(service.run());

        Pool {
            handle,
            events,
            launcher,
            service,
        }
    }

    async fn wait_for<F>(events: &mut EventReceiver, matches: F) -> PoolEvent
    where
        F: Fn(&PoolEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                let event = events.recv().await.expect("event stream closed");
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn finished(events: &mut EventReceiver) -> RunSummary {
        match wait_for(events, |e| matches!(e, PoolEvent::RunFinished(_))).await {
            PoolEvent::RunFinished(summary) => summary,
            _ => unreachable!(),
        }
    }

    async fn teardown(mut pool: Pool) {
        pool.handle.stop_all().await.unwrap();
        wait_for(&mut pool.events, |e| *e == PoolEvent::PoolStopped).await;
        pool.launcher.shutdown();
        pool.handle.shutdown();
        pool.service.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_runs_to_completion() {
        let mut pool = pool(3).await;

        let err = pool.handle.dispatch(6).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<PoolError>(),
            Some(&PoolError::NoWorkersAvailable { pool_size: 3 })
        );

        pool.handle.start_pool().await.unwrap();
        wait_for(&mut pool.events, |e| {
            *e == PoolEvent::PoolReady { pool_size: 3 }
        })
        .await;

        assert_eq!(pool.handle.dispatch(6).await.unwrap(), 3);
        let summary = finished(&mut pool.events).await;
        assert_eq!(summary.total_tasks, 6);
        assert_eq!(summary.completed, 6);
        assert!(summary.aggregate_magnitude >= 12);
        assert!(summary.throughput.micros_per_unit().is_some());
        assert_eq!(summary.latency.samples, 6);

        // A second run on the same pool
        assert_eq!(pool.handle.dispatch(2).await.unwrap(), 2);
        assert_eq!(finished(&mut pool.events).await.completed, 2);

        teardown(pool).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_restarted_worker_replaces_dead_slot() {
        let mut pool = pool(3).await;
        pool.handle.start_pool().await.unwrap();
        wait_for(&mut pool.events, |e| matches!(e, PoolEvent::PoolReady { .. })).await;

        assert!(pool.launcher.kill(1));
        pool.launcher.launch(1).unwrap();

        let replaced = wait_for(&mut pool.events, |e| {
            matches!(e, PoolEvent::WorkerReplaced { .. })
        })
        .await;
        let PoolEvent::WorkerReplaced {
            old_endpoint,
            new_endpoint,
            lost_label,
            ..
        } = replaced
        else {
            unreachable!()
        };
        assert_ne!(old_endpoint, new_endpoint);
        assert_eq!(lost_label, None);

        assert_eq!(pool.handle.dispatch(6).await.unwrap(), 3);
        assert_eq!(finished(&mut pool.events).await.completed, 6);

        teardown(pool).await;
    }
}
