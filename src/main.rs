//! svcpool - worker pool coordinator with liveness-based replacement

use anyhow::{Context, Result};
use svcpool::bus::BusListener;
use svcpool::config::cli::{Cli, ExecutionMode};
use svcpool::config::Config;
use svcpool::coordinator::events::{EventReceiver, PoolEvent};
use svcpool::coordinator::service::{CoordinatorHandle, CoordinatorService};
use svcpool::coordinator::CoordinatorSettings;
use svcpool::launcher;
use svcpool::output::json::{write_json_output, RunReport};
use svcpool::output::text;
use svcpool::worker::{WorkerNode, WorkerSettings};
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// How long every worker gets to announce itself after launch
const POOL_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time workers get to notice their stop flag on shutdown
const STOP_GRACE: Duration = Duration::from_millis(500);

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Logging comes first so configuration warnings are visible
    let logging = setup_logging(cli.debug);
    let config = Config::load(&cli)?;
    if config.runtime.debug && !cli.debug {
        if let Err(e) = logging.modify(|filter| *filter = log_filter(true)) {
            warn!("Failed to raise log level: {}", e);
        }
    }

    match cli.mode {
        ExecutionMode::Coordinator => run_coordinator(config),
        ExecutionMode::Worker => run_worker(config),
    }
}

fn log_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("svcpool=debug,warn")
        } else {
            EnvFilter::new("svcpool=info,warn")
        }
    })
}

/// Install the subscriber; the handle swaps the filter once the config is known
fn setup_logging(debug: bool) -> reload::Handle<EnvFilter, Registry> {
    let (filter, handle) = reload::Layer::new(log_filter(debug));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();

    handle
}

/// Run as a single pool worker
fn run_worker(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    runtime.block_on(async {
        let settings = WorkerSettings::from(&config);
        WorkerNode::new(settings).run().await
    })
}

/// Run the coordinator: build the pool, run tasks, tear it down
fn run_coordinator(config: Config) -> Result<()> {
    println!("svcpool v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(coordinate(config))
}

async fn coordinate(config: Config) -> Result<()> {
    let listener = BusListener::bind(config.bus.coordinator_port)
        .await
        .context("Failed to bind coordinator endpoint")?;
    let endpoint = listener.endpoint();

    let launcher = launcher::build(&config, endpoint)?;
    let settings = CoordinatorSettings::from(&config);
    let (service, handle, mut events) =
        CoordinatorService::new(listener, settings, launcher.clone());
    let service_task = tokio::spawn(service.run());

    println!(
        "Pool: {} workers ({} launcher), launch cap {}, {} tasks x {} run(s)",
        config.pool.pool_size,
        config.pool.launcher,
        config.pool.launch_cap,
        config.tasks.task_count,
        config.runtime.runs
    );

    let mut report = RunReport::new(&config);
    let outcome = drive_runs(&config, &handle, &mut events, &mut report).await;

    // Teardown runs whether or not the runs succeeded
    if let Err(e) = handle.stop_all().await {
        warn!("Failed to stop workers: {:#}", e);
    }
    while let Ok(event) = events.try_recv() {
        observe(&event, config.output.quiet, &mut report);
    }
    tokio::time::sleep(Duration::from_millis(config.worker.poll_interval_ms) + STOP_GRACE).await;
    launcher.shutdown();
    handle.shutdown();

    match service_task.await {
        Ok(Err(e)) => warn!("Coordinator service failed: {:#}", e),
        Err(e) => warn!("Coordinator service task panicked: {}", e),
        Ok(Ok(())) => {}
    }

    outcome?;

    if let Some(ref path) = config.output.json_output {
        write_json_output(path, &report, true)
            .with_context(|| format!("Failed to write JSON report: {}", path.display()))?;
        println!("JSON report written to {}", path.display());
    }

    Ok(())
}

/// Start the pool, then run `runs` batches of tasks on it
async fn drive_runs(
    config: &Config,
    handle: &CoordinatorHandle,
    events: &mut EventReceiver,
    report: &mut RunReport,
) -> Result<()> {
    let quiet = config.output.quiet;

    handle.start_pool().await?;
    tokio::time::timeout(POOL_READY_TIMEOUT, async {
        loop {
            let event = next_event(events).await?;
            observe(&event, quiet, report);
            if matches!(event, PoolEvent::PoolReady { .. }) {
                return Ok::<_, anyhow::Error>(());
            }
        }
    })
    .await
    .context("Timed out waiting for workers to announce")??;

    for run in 1..=config.runtime.runs {
        let issued = handle.dispatch(config.tasks.task_count).await?;
        debug!("Run {}: {} tasks issued up front", run, issued);

        loop {
            let event = next_event(events).await?;
            if let PoolEvent::RunFinished(summary) = &event {
                text::print_summary(run, summary);
                report.add_run(summary);
                break;
            }
            observe(&event, quiet, report);
        }
    }

    Ok(())
}

async fn next_event(events: &mut EventReceiver) -> Result<PoolEvent> {
    events
        .recv()
        .await
        .context("Coordinator service stopped unexpectedly")
}

fn observe(event: &PoolEvent, quiet: bool, report: &mut RunReport) {
    if let PoolEvent::WorkerReplaced { .. } = event {
        report.record_replacement();
    }
    text::print_event(event, quiet);
}
