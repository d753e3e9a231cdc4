//! reel-queue - Enqueue and inspect Reelcast jobs
//!
//! Unix-style front end to the job queue: results go to stdout, diagnostics
//! to stderr, and the exit code says what went wrong.

use std::path::Path;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use libreelcast::logging::LoggingConfig;
use libreelcast::service::EnqueueOptions;
use libreelcast::types::{Job, JobEvent, QueueStats};
use libreelcast::{Config, ContentType, JobPayload, JobStatus, MediaRef, ReelcastError, ReelcastService};

#[derive(Parser, Debug)]
#[command(name = "reel-queue")]
#[command(version)]
#[command(about = "Enqueue and inspect Reelcast publishing jobs")]
#[command(long_about = "\
reel-queue - Enqueue and inspect Reelcast publishing jobs

DESCRIPTION:
    reel-queue records publishing jobs in the Reelcast queue and reports on
    them. Jobs are published by the reel-send daemon.

COMMANDS:
    add      Queue an image, reel or carousel post
    status   Show one job
    stats    Show queue totals
    history  List recent jobs
    events   Show the status history of a job
    cancel   Stop further attempts of a job
    prune    Delete old finished jobs

USAGE EXAMPLES:
    # Queue an image
    reel-queue add image ~/photos/sunset.jpg --caption \"Golden hour\"

    # Queue a carousel, not before two hours from now
    reel-queue add carousel a.jpg b.jpg c.jpg --delay 2h

    # Check on a job as JSON
    reel-queue --format json status <JOB_ID>

    # Forget finished jobs older than a month
    reel-queue prune --older-than 30d

CONFIGURATION:
    Configuration file: ~/.config/reelcast/config.toml

    Override with environment variables:
        REELCAST_CONFIG    - Path to config file
        REELCAST_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database or configuration error
    3 - Invalid input (bad content type, rejected job, finished job, etc.)
    4 - Job not found
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue a post
    Add {
        /// Content type: image, reel or carousel
        content_type: String,

        /// Media files or URLs, in order
        #[arg(required = true, value_name = "MEDIA")]
        media: Vec<String>,

        /// Post caption (generated or default caption when omitted)
        #[arg(short, long)]
        caption: Option<String>,

        /// Earliest start, relative to now (e.g. "30m", "2h 15m")
        #[arg(long, value_parser = humantime::parse_duration)]
        delay: Option<Duration>,

        /// Publisher option as KEY=VALUE; VALUE is parsed as JSON when possible
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
    },

    /// Show one job
    Status {
        job_id: String,
    },

    /// Show queue totals
    Stats,

    /// List recent jobs, newest first
    History {
        /// Maximum number of jobs to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },

    /// Show the status history of a job
    Events {
        job_id: String,
    },

    /// Stop further attempts of a job
    Cancel {
        job_id: String,
    },

    /// Delete finished jobs older than the given age
    Prune {
        /// Age threshold (e.g. "30d", "12h")
        #[arg(long, value_parser = humantime::parse_duration)]
        older_than: Duration,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env().with_verbose(cli.verbose);
    if !cli.verbose && std::env::var(libreelcast::logging::LOG_LEVEL_ENV).is_err() {
        logging.level = "error".to_string();
    }
    logging.init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let exit_code = e
            .downcast_ref::<ReelcastError>()
            .map_or(1, ReelcastError::exit_code);
        std::process::exit(exit_code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(database = %config.database.path, "Opening job database");
    let service = ReelcastService::from_config(config).await?;
    let format = cli.format;

    match cli.command {
        Commands::Add {
            content_type,
            media,
            caption,
            delay,
            options,
        } => cmd_add(&service, format, &content_type, media, caption, delay, &options).await,
        Commands::Status { job_id } => {
            let job = service.get_status(&job_id).await?;
            print_job(&job, format)
        }
        Commands::Stats => {
            let stats = service.get_stats().await?;
            print_stats(&stats, format)
        }
        Commands::History { limit } => {
            let jobs = service.get_history(limit).await?;
            print_history(&jobs, format)
        }
        Commands::Events { job_id } => {
            let events = service.get_events(&job_id).await?;
            print_events(&events, format)
        }
        Commands::Cancel { job_id } => {
            let job = service.cancel(&job_id).await?;
            match format {
                OutputFormat::Json => print_job(&job, format),
                OutputFormat::Text if job.status == JobStatus::Failed => {
                    println!("{} cancelled", job.id);
                    Ok(())
                }
                OutputFormat::Text => {
                    println!("{} in progress; no further attempts will be made", job.id);
                    Ok(())
                }
            }
        }
        Commands::Prune { older_than } => {
            let removed = service.prune(older_than).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "removed": removed })),
                OutputFormat::Text => println!("Removed {} finished job(s)", removed),
            }
            Ok(())
        }
    }
}

async fn cmd_add(
    service: &ReelcastService,
    format: OutputFormat,
    content_type: &str,
    media: Vec<String>,
    caption: Option<String>,
    delay: Option<Duration>,
    options: &[String],
) -> anyhow::Result<()> {
    let content_type: ContentType = content_type.parse()?;

    let media = media
        .iter()
        .map(|path| resolve_media(path).map(MediaRef::new))
        .collect::<Result<Vec<_>, _>>()?;

    let mut payload = JobPayload::new(media, caption);
    for option in options {
        let (key, value) = parse_option(option)?;
        payload = payload.with_option(key, value);
    }

    let not_before = delay
        .map(|d| not_before_after(chrono::Utc::now().timestamp(), d))
        .transpose()?;
    let job_id = service
        .enqueue(content_type, payload, EnqueueOptions { not_before })
        .await?;

    let job = service.get_status(&job_id).await?;
    tracing::debug!(job_id = %job.id, status = %job.status, ?not_before, "Job recorded");
    match format {
        OutputFormat::Json => print_job(&job, format)?,
        OutputFormat::Text => println!("{}", job.id),
    }

    if job.status == JobStatus::Failed {
        let reason = job
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| "unknown reason".to_string());
        return Err(ReelcastError::InvalidInput(format!("Job {} rejected: {}", job_id, reason)).into());
    }
    Ok(())
}

/// Unix time `delay` from `now`, rejecting delays past the representable range
fn not_before_after(now: i64, delay: Duration) -> Result<i64, ReelcastError> {
    i64::try_from(delay.as_secs())
        .ok()
        .and_then(|secs| now.checked_add(secs))
        .ok_or_else(|| {
            ReelcastError::InvalidInput(format!(
                "Delay too large: {}",
                humantime::format_duration(delay)
            ))
        })
}

/// Make relative local paths absolute so the daemon can find them from any
/// working directory
fn resolve_media(path: &str) -> Result<String, ReelcastError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(ReelcastError::InvalidInput("Empty media path".to_string()));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") || trimmed.starts_with('~') {
        return Ok(trimmed.to_string());
    }

    let path = Path::new(trimmed);
    if path.is_absolute() {
        return Ok(trimmed.to_string());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| ReelcastError::InvalidInput(format!("Cannot resolve {}: {}", trimmed, e)))?;
    Ok(cwd.join(path).to_string_lossy().to_string())
}

fn parse_option(option: &str) -> Result<(String, serde_json::Value), ReelcastError> {
    let (key, value) = option.split_once('=').ok_or_else(|| {
        ReelcastError::InvalidInput(format!("Option '{}' is not KEY=VALUE", option))
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ReelcastError::InvalidInput(format!(
            "Option '{}' has an empty key",
            option
        )));
    }

    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn format_time(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_job(job: &Job, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(job);
    }

    println!("id:          {}", job.id);
    println!("type:        {}", job.content_type);
    println!("status:      {}", job.status);
    println!("media:       {}", job.payload.media.len());
    println!("retries:     {}", job.retry_count);
    println!("created:     {}", format_time(job.created_at));
    println!("updated:     {}", format_time(job.updated_at));
    if let Some(completed_at) = job.completed_at {
        println!("completed:   {}", format_time(completed_at));
    }
    if let Some(result) = &job.result {
        println!("post id:     {}", result.id);
        println!("media type:  {}", result.media_type);
        if let Some(permalink) = &result.permalink {
            println!("permalink:   {}", permalink);
        }
    }
    if let Some(error) = &job.error {
        println!("error:       [{}] {}", error.kind, error.message);
    }
    if job.no_retry && !job.status.is_terminal() {
        println!("cancelled:   yes (takes effect before the next attempt)");
    }
    Ok(())
}

fn print_stats(stats: &QueueStats, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(stats);
    }

    println!("Total jobs:     {}", stats.total);
    println!("  pending:      {}", stats.pending);
    println!("  processing:   {}", stats.processing);
    println!("  rate limited: {}", stats.rate_limited);
    println!("  succeeded:    {}", stats.success);
    println!("  failed:       {}", stats.failed);
    println!("Queue length:   {}", stats.queue_length);
    match stats.average_processing_secs {
        Some(avg) => println!("Avg processing: {:.1}s", avg),
        None => println!("Avg processing: n/a"),
    }
    Ok(())
}

fn print_history(jobs: &[Job], format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(jobs);
    }

    for job in jobs {
        let outcome = match (&job.result, &job.error) {
            (Some(result), _) => result.permalink.clone().unwrap_or_else(|| result.id.clone()),
            (None, Some(error)) => error.message.clone(),
            (None, None) => String::new(),
        };
        println!(
            "{} | {} | {} | {} | {}",
            job.id,
            format_time(job.created_at),
            job.content_type,
            job.status,
            outcome
        );
    }
    Ok(())
}

fn print_events(events: &[JobEvent], format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(events);
    }

    for event in events {
        let from = event
            .from_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        match &event.message {
            Some(message) => println!(
                "{} {} -> {} ({})",
                format_time(event.occurred_at),
                from,
                event.to_status,
                message
            ),
            None => println!("{} {} -> {}", format_time(event.occurred_at), from, event.to_status),
        }
    }
    Ok(())
}
