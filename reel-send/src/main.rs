//! reel-send - Worker daemon for the Reelcast queue
//!
//! Claims queued jobs and publishes them to Instagram until told to stop.

use clap::Parser;
use libreelcast::error::ConfigError;
use libreelcast::logging::{LogFormat, LoggingConfig};
use libreelcast::platforms::instagram::GraphPublisher;
use libreelcast::service::events::{Event, EventReceiver};
use libreelcast::worker::WorkerPool;
use libreelcast::{Config, ReelcastError, ReelcastService};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "reel-send")]
#[command(version)]
#[command(about = "Publish queued Reelcast jobs")]
#[command(long_about = "\
reel-send - Worker daemon for the Reelcast queue

DESCRIPTION:
    reel-send runs a pool of workers over the Reelcast job queue. Each worker
    claims the oldest available job, waits for the shared rate limiter,
    drives the Instagram container protocol and records the outcome.

    Transient failures (network, timeouts, 5xx, platform rate limits) are
    retried with exponential backoff. Permanent failures (invalid media,
    expired credentials) fail the job immediately.

    On startup, jobs left mid-attempt by a previous run are re-queued.

USAGE:
    # Run in foreground (logs to stderr)
    reel-send

    # Two workers, JSON logs
    reel-send --workers 2 --log-format json

    # Process what is available now and exit
    reel-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (in-flight jobs are finished)

CONFIGURATION:
    Configuration file: ~/.config/reelcast/config.toml

    [instagram]
    account_id = \"17841400000000000\"
    token_file = \"~/.config/reelcast/instagram.token\"

    [queue]
    workers = 1
    max_retries = 3

    Override with environment variables:
        REELCAST_CONFIG      - Path to config file
        REELCAST_DB_PATH     - Path to database file
        REELCAST_LOG_FORMAT  - text, json or pretty
        REELCAST_LOG_LEVEL   - Log filter (default: info)

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or authentication error
")]
struct Cli {
    /// Number of workers (overrides queue.workers)
    #[arg(long, value_name = "N")]
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    workers: Option<u16>,

    /// Idle poll interval in seconds (overrides queue.poll_interval)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Process the jobs available now, then exit
    #[arg(long)]
    once: bool,

    /// Log format: text, json or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env().with_verbose(cli.verbose);
    if let Some(format) = cli.log_format {
        logging = logging.with_format(format);
    }
    logging.init();

    if let Err(e) = run(cli).await {
        let exit_code = e
            .downcast_ref::<ReelcastError>()
            .map_or(1, ReelcastError::exit_code);
        error!(error = %e, "reel-send stopped with an error");
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(workers) = cli.workers {
        config.queue.workers = usize::from(workers);
    }
    if let Some(poll_interval) = cli.poll_interval {
        config.queue.poll_interval = poll_interval;
    }

    let instagram = config.instagram.clone().ok_or_else(|| {
        ReelcastError::from(ConfigError::MissingField("instagram".to_string()))
    })?;
    let publisher = Arc::new(GraphPublisher::new(&instagram)?);

    let service = ReelcastService::from_config(config).await?;
    let recovered = service.recover().await?;
    if recovered > 0 {
        info!(recovered, "Re-queued jobs interrupted by a previous run");
    }

    let outcomes = tokio::spawn(log_outcomes(service.subscribe()));
    let pool = service.worker_pool(publisher);
    info!(
        workers = pool.len(),
        poll_interval = service.config().queue.poll_interval,
        "reel-send starting"
    );

    if cli.once {
        let handled = pool.drain().await;
        close_event_bus(pool, service, outcomes).await;
        info!(handled, "Processed available jobs, exiting");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let listener = spawn_signal_listener(Arc::clone(&shutdown))?;

    pool.run(shutdown).await;
    listener.abort();
    close_event_bus(pool, service, outcomes).await;

    info!("reel-send stopped");
    Ok(())
}

/// Log the final outcome of every job this daemon finishes
async fn log_outcomes(mut events: EventReceiver) {
    loop {
        match events.recv().await {
            Ok(Event::JobSucceeded { job_id, result }) => {
                info!(
                    job_id = %job_id,
                    media_id = %result.id,
                    permalink = result.permalink.as_deref().unwrap_or("-"),
                    "Job published"
                );
            }
            Ok(Event::JobFailed { job_id, error }) => {
                warn!(
                    job_id = %job_id,
                    kind = %error.kind,
                    message = %error.message,
                    "Job failed permanently"
                );
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Outcome log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Drop every event sender, then wait for the outcome log to catch up
async fn close_event_bus(
    pool: WorkerPool,
    service: ReelcastService,
    outcomes: tokio::task::JoinHandle<()>,
) {
    drop(pool);
    drop(service);
    if let Err(e) = outcomes.await {
        error!(error = %e, "Outcome log task failed");
    }
}

/// Set `shutdown` on the first SIGINT or SIGTERM
#[cfg(unix)]
fn spawn_signal_listener(shutdown: Arc<AtomicBool>) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    use futures::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    Ok(tokio::spawn(async move {
        if let Some(signal) = signals.next().await {
            info!(signal, "Received shutdown signal, finishing in-flight jobs");
            shutdown.store(true, Ordering::Relaxed);
        }
    }))
}

#[cfg(not(unix))]
fn spawn_signal_listener(shutdown: Arc<AtomicBool>) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, finishing in-flight jobs");
            shutdown.store(true, Ordering::Relaxed);
        }
    }))
}
