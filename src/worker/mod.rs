//! Worker node
//!
//! A worker owns one task-execution slot. It binds an ephemeral bus endpoint,
//! announces it to the coordinator and then services messages until told to
//! stop.
//!
//! # Message Flow
//!
//! ```text
//! Worker                          Coordinator
//!   |-- announce-endpoint -------->|
//!   |<------------- start-task ----|
//!   |     (computation runs off the message loop)
//!   |<----------- echo-request ----|
//!   |-- echo-reply --------------->|
//!   |-- result "<label>,<mag>" --->|
//!   |<------------------- stop ----|
//!   |     (observed on next poll tick, endpoint released)
//! ```
//!
//! The message loop never runs a computation itself. Each computation runs on
//! the blocking pool and its completion comes back into the loop over a
//! channel, the same way every other event does. A start-task that arrives
//! while a computation is running is queued and started when it finishes.

pub mod task;

use crate::bus::{codec, BusListener, DispatchTable, Endpoint, Envelope, TcpTransport, Topic, Transport};
use crate::config::Config;
use crate::error::PoolResult;
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Worker tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Where to announce and send results
    pub coordinator: Endpoint,
    /// How often the stop flag is checked
    pub poll_interval: Duration,
    /// Upper limit for the per-task random bound
    pub task_bound: u64,
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            coordinator: Endpoint::new(config.bus.coordinator_port),
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
            task_bound: config.tasks.task_bound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Idle,
    Executing,
    Stopped,
}

/// Message-handling state of one worker
pub struct WorkerState {
    endpoint: Endpoint,
    coordinator: Endpoint,
    phase: WorkerPhase,
    stop_requested: bool,
    /// Labels waiting for the running computation to finish
    queued: VecDeque<u64>,
    /// Labels the loop should start now
    starts: Vec<u64>,
    transport: Arc<dyn Transport>,
}

impl WorkerState {
    pub fn new(endpoint: Endpoint, coordinator: Endpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            coordinator,
            phase: WorkerPhase::Idle,
            stop_requested: false,
            queued: VecDeque::new(),
            starts: Vec::new(),
            transport,
        }
    }

    pub fn dispatch_table() -> DispatchTable<WorkerState> {
        DispatchTable::new()
            .on(Topic::StartTask, handle_start_task)
            .on(Topic::EchoRequest, handle_echo_request)
            .on(Topic::Stop, handle_stop)
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Tell the coordinator where this worker listens
    pub fn announce(&self) {
        self.transport.send(
            self.coordinator,
            Topic::AnnounceEndpoint,
            codec::encode_endpoint(self.endpoint),
        );
    }

    /// Accept a task; it starts now or after the running one
    pub fn request_task(&mut self, label: u64) {
        if self.phase == WorkerPhase::Executing {
            debug!("Label {} queued behind running task", label);
            self.queued.push_back(label);
        } else {
            self.phase = WorkerPhase::Executing;
            self.starts.push(label);
        }
    }

    /// Labels to hand to the blocking pool
    pub fn take_starts(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.starts)
    }

    /// Report a finished computation and start the next queued one
    pub fn on_complete(&mut self, label: u64, magnitude: u64) {
        debug!("Label {} done, magnitude {}", label, magnitude);
        self.transport.send(
            self.coordinator,
            Topic::Result,
            codec::encode_result(label, magnitude),
        );

        match self.queued.pop_front() {
            Some(next) => self.starts.push(next),
            None => self.phase = WorkerPhase::Idle,
        }
    }

    fn mark_stopped(&mut self) {
        self.phase = WorkerPhase::Stopped;
    }
}

fn handle_start_task(state: &mut WorkerState, envelope: &Envelope) -> PoolResult<()> {
    let label = codec::decode_label(&envelope.payload)?;
    state.request_task(label);
    Ok(())
}

fn handle_echo_request(state: &mut WorkerState, envelope: &Envelope) -> PoolResult<()> {
    let payload = codec::decode_echo(Topic::EchoRequest, &envelope.payload)?;
    state
        .transport
        .send(envelope.reply_to, Topic::EchoReply, codec::encode_echo(&payload));
    Ok(())
}

fn handle_stop(state: &mut WorkerState, envelope: &Envelope) -> PoolResult<()> {
    codec::decode_stop(&envelope.payload)?;
    debug!("Stop requested");
    state.stop_requested = true;
    Ok(())
}

/// A worker process (or task) bound to the bus
pub struct WorkerNode {
    settings: WorkerSettings,
}

impl WorkerNode {
    pub fn new(settings: WorkerSettings) -> Self {
        Self { settings }
    }

    /// Serve until a stop message is observed
    pub async fn run(self) -> Result<()> {
        let mut listener = BusListener::bind(0)
            .await
            .context("Failed to bind worker endpoint")?;
        let endpoint = listener.endpoint();
        let transport: Arc<dyn Transport> = Arc::new(TcpTransport::spawn(endpoint));

        let table = WorkerState::dispatch_table();
        let mut state = WorkerState::new(endpoint, self.settings.coordinator, transport);

        info!(
            "Worker listening on {}, announcing to {}",
            endpoint, self.settings.coordinator
        );
        state.announce();

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(u64, u64)>();
        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                inbound = listener.recv() => {
                    let Some(envelope) = inbound else { break };
                    if let Err(e) = table.dispatch(&mut state, &envelope) {
                        warn!("Dropped message from {}: {}", envelope.reply_to, e);
                    }
                }
                Some((label, magnitude)) = done_rx.recv() => {
                    state.on_complete(label, magnitude);
                }
                _ = poll.tick() => {
                    if state.stop_requested() {
                        state.mark_stopped();
                        break;
                    }
                }
            }

            for label in state.take_starts() {
                let done = done_tx.clone();
                let bound = self.settings.task_bound;
                tokio::task::spawn_blocking(move || {
                    let magnitude = task::run_task(bound);
                    // Loop may already be gone after a stop
                    let _ = done.send((label, magnitude));
                });
            }
        }

        info!("Worker {} stopped", endpoint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::RecordingTransport;
    use crate::error::PoolError;

    const COORDINATOR: Endpoint = Endpoint::new(3002);

    fn state() -> (WorkerState, RecordingTransport) {
        let recorder = RecordingTransport::new();
        let state = WorkerState::new(Endpoint::new(4100), COORDINATOR, Arc::new(recorder.clone()));
        (state, recorder)
    }

    fn envelope(topic: Topic, payload: &str) -> Envelope {
        Envelope::new(topic, COORDINATOR, payload.as_bytes().to_vec())
    }

    #[test]
    fn test_announce() {
        let (state, recorder) = state();
        state.announce();
        assert_eq!(
            recorder.payloads_to(COORDINATOR, Topic::AnnounceEndpoint),
            vec!["4100"]
        );
    }

    #[test]
    fn test_second_start_is_queued() {
        let (mut state, recorder) = state();
        let table = WorkerState::dispatch_table();

        table.dispatch(&mut state, &envelope(Topic::StartTask, "0")).unwrap();
        assert_eq!(state.phase(), WorkerPhase::Executing);
        assert_eq!(state.take_starts(), vec![0]);

        table.dispatch(&mut state, &envelope(Topic::StartTask, "1")).unwrap();
        assert!(state.take_starts().is_empty());
        assert_eq!(state.queued(), 1);

        state.on_complete(0, 17);
        assert_eq!(state.take_starts(), vec![1]);
        assert_eq!(state.phase(), WorkerPhase::Executing);

        state.on_complete(1, 5);
        assert_eq!(state.phase(), WorkerPhase::Idle);
        assert_eq!(
            recorder.payloads_to(COORDINATOR, Topic::Result),
            vec!["0,17", "1,5"]
        );
    }

    #[test]
    fn test_echo_while_executing() {
        let (mut state, recorder) = state();
        let table = WorkerState::dispatch_table();

        state.request_task(3);
        table
            .dispatch(&mut state, &envelope(Topic::EchoRequest, "4100"))
            .unwrap();

        assert_eq!(state.phase(), WorkerPhase::Executing);
        assert_eq!(
            recorder.payloads_to(COORDINATOR, Topic::EchoReply),
            vec!["4100"]
        );
    }

    #[test]
    fn test_stop_and_malformed() {
        let (mut state, _recorder) = state();
        let table = WorkerState::dispatch_table();

        let err = table
            .dispatch(&mut state, &envelope(Topic::Stop, "now"))
            .unwrap_err();
        assert!(matches!(err, PoolError::MalformedMessage { .. }));
        assert!(!state.stop_requested());

        assert!(table
            .dispatch(&mut state, &envelope(Topic::StartTask, "-1"))
            .is_err());
        assert_eq!(state.phase(), WorkerPhase::Idle);

        table.dispatch(&mut state, &envelope(Topic::Stop, "")).unwrap();
        assert!(state.stop_requested());
    }

    async fn next(listener: &mut BusListener) -> Envelope {
        tokio::time::timeout(Duration::from_secs(5), listener.recv())
            .await
            .expect("timed out")
            .expect("listener closed")
    }

    #[tokio::test]
    async fn test_worker_node_round_trip() {
        let mut coordinator = BusListener::bind(0).await.unwrap();
        let settings = WorkerSettings {
            coordinator: coordinator.endpoint(),
            poll_interval: Duration::from_millis(20),
            task_bound: 200,
        };
        let node = tokio::spawn(WorkerNode::new(settings).run());

        let announce = next(&mut coordinator).await;
        assert_eq!(announce.topic, Topic::AnnounceEndpoint);
        let worker = codec::decode_endpoint(&announce.payload).unwrap();
        assert_eq!(worker, announce.reply_to);

        let transport = TcpTransport::spawn(coordinator.endpoint());
        transport.send(worker, Topic::StartTask, codec::encode_label(0));
        transport.send(worker, Topic::EchoRequest, codec::encode_echo("ping"));

        let mut result = None;
        let mut echo = None;
        while result.is_none() || echo.is_none() {
            let envelope = next(&mut coordinator).await;
            match envelope.topic {
                Topic::Result => result = Some(codec::decode_result(&envelope.payload).unwrap()),
                Topic::EchoReply => {
                    echo = Some(codec::decode_echo(Topic::EchoReply, &envelope.payload).unwrap())
                }
                other => panic!("unexpected {}", other),
            }
        }

        let (label, magnitude) = result.unwrap();
        assert_eq!(label, 0);
        assert!(magnitude >= 2);
        assert_eq!(echo.unwrap(), "ping");

        transport.send(worker, Topic::Stop, Vec::new());
        tokio::time::timeout(Duration::from_secs(5), node)
            .await
            .expect("worker did not stop")
            .unwrap()
            .unwrap();
    }
}
