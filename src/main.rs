// Hookcast - Main Entry Point
//
// Command-line front end for the dispatch library:
// - One-shot event dispatch against a webhook list, draining retries
// - Configuration validation

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hookcast::config::Config;
use hookcast::dispatch::{EventData, JobOutcome, WebhookDispatcher};
use hookcast::handlers::HandlerRegistry;
use hookcast::logstore::{DeliveryLogStore, InMemoryLogStore};
use hookcast::registry::WebhookRegistration;
use hookcast::scheduler::{InProcessScheduler, JobContext};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Hookcast: deduplicated, audited webhook dispatch
#[derive(Parser, Debug)]
#[command(name = "hookcast")]
#[command(author = "Hookcast Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Deduplicated, audited webhook dispatch with bounded retries", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to a config file (defaults to the XDG config location)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dispatch one event to a list of webhooks, draining retries
    Dispatch {
        /// Path to a JSON file with the event payload (object or array)
        #[arg(long)]
        event: PathBuf,

        /// Path to a JSON file with the webhook registrations
        #[arg(long)]
        webhooks: PathBuf,

        /// Print the delivery audit log after the run
        #[arg(long)]
        show_log: bool,
    },
    /// Validate the configuration file and exit
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(filter.into())
                .from_env_lossy(),
        )
        .init();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match args.command {
        Some(Commands::Dispatch {
            event,
            webhooks,
            show_log,
        }) => {
            dispatch(config, &event, &webhooks, show_log).await?;
        }
        Some(Commands::ValidateConfig) => {
            config.validate()?;
            println!("Configuration is valid");
        }
        None => {
            println!("No command specified. Use --help for usage information.");
        }
    }

    Ok(())
}

/// Run one dispatch job and drain any delayed re-runs until the in-process
/// queue is empty. The CLI uses an always-true filter and an identity
/// transformer, so every listed webhook is a candidate and the event parts
/// are sent as the body.
async fn dispatch(
    config: Config,
    event_path: &PathBuf,
    webhooks_path: &PathBuf,
    show_log: bool,
) -> Result<()> {
    let event = load_event(event_path)?;
    let webhooks = load_webhooks(webhooks_path)?;
    info!(webhooks = webhooks.len(), "Dispatching event");

    if let Err(e) = hookcast::metrics::register_metrics() {
        tracing::debug!(error = %e, "Metrics already registered");
    }

    let log_store = Arc::new(InMemoryLogStore::new(config.log.storage_cap()));
    let (scheduler, mut rx) = InProcessScheduler::new();

    let dispatcher = WebhookDispatcher::new(
        config,
        Arc::new(HandlerRegistry::new()),
        log_store.clone(),
        Arc::new(scheduler),
    )?
    .with_filter(Arc::new(|_: &EventData, _: &WebhookRegistration| true))
    .with_transformer(Arc::new(|event: &EventData, _: &WebhookRegistration| {
        match event.parts() {
            [single] => single.clone(),
            parts => serde_json::json!(parts),
        }
    }));

    let outcome = dispatcher
        .run(JobContext::first_attempt(), &webhooks, &event)
        .await
        .context("Dispatch job failed")?;
    report_outcome(&outcome);

    // Drain delayed re-runs enqueued by the retry controller
    while let Ok(job) = rx.try_recv() {
        if let Some(delay) = job.delay {
            info!(delay_secs = delay.as_secs(), queue = %job.queue, "Waiting before retry");
            tokio::time::sleep(delay).await;
        }
        let outcome = dispatcher
            .run(
                JobContext {
                    attempt: job.descriptor.attempt,
                },
                &job.descriptor.webhooks,
                &job.descriptor.event,
            )
            .await
            .context("Dispatch retry failed")?;
        report_outcome(&outcome);
    }

    if show_log {
        for webhook in &webhooks {
            for record in log_store.for_webhook(webhook.id).await? {
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
        }
    }

    Ok(())
}

fn report_outcome(outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Skipped => info!("Job skipped: attempt ceiling reached"),
        JobOutcome::Completed { delivered, failed } => {
            info!(delivered, failed, "Job completed")
        }
        JobOutcome::Rescheduled { delay, failed } => {
            info!(failed, delay_secs = delay.as_secs(), "Job rescheduled")
        }
    }
}

/// Load an event payload: a JSON array becomes the part sequence, a single
/// object becomes a one-part sequence.
fn load_event(path: &PathBuf) -> Result<EventData> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read event file from {:?}", path))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse event file from {:?}", path))?;
    Ok(match value {
        Value::Array(parts) => EventData::new(parts),
        other => EventData::new(vec![other]),
    })
}

fn load_webhooks(path: &PathBuf) -> Result<Vec<WebhookRegistration>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read webhooks file from {:?}", path))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse webhooks file from {:?}", path))
}
