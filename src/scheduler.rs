// Scheduling boundary
//
// The dispatch job runs as one unit of work handed off by an external
// scheduler. The core consumes two capabilities: enqueue-with-delay (used
// for whole-job retries) and the attempt counter carried in JobContext.
// Attempt counting is owned by the substrate, never persisted here.

use crate::dispatch::EventData;
use crate::error::SchedulerError;
use crate::registry::WebhookRegistration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Per-run state carried by the scheduling substrate
#[derive(Debug, Clone, Copy)]
pub struct JobContext {
    /// 1-based count of executions of this logical job instance,
    /// including the current one
    pub attempt: u32,
}

impl JobContext {
    pub fn first_attempt() -> Self {
        Self { attempt: 1 }
    }
}

/// Everything needed to re-run a dispatch job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Webhook snapshot taken when the job was first enqueued
    pub webhooks: Vec<WebhookRegistration>,
    /// Event payload
    pub event: EventData,
    /// Attempt count the re-run will execute as
    pub attempt: u32,
}

/// Enqueue capability consumed from the scheduling substrate
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn enqueue(
        &self,
        job: JobDescriptor,
        delay: Option<Duration>,
        queue: &str,
    ) -> Result<(), SchedulerError>;
}

/// A job waiting in the in-process scheduler
#[derive(Debug)]
pub struct ScheduledJob {
    pub descriptor: JobDescriptor,
    pub delay: Option<Duration>,
    pub queue: String,
}

/// Channel-backed scheduler for in-process use (CLI, tests).
///
/// Jobs land on an unbounded channel; the owner of the receiver sleeps out
/// each delay and re-runs the dispatcher with the descriptor's attempt
/// count.
pub struct InProcessScheduler {
    tx: mpsc::UnboundedSender<ScheduledJob>,
}

impl InProcessScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScheduledJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Scheduler for InProcessScheduler {
    async fn enqueue(
        &self,
        job: JobDescriptor,
        delay: Option<Duration>,
        queue: &str,
    ) -> Result<(), SchedulerError> {
        debug!(
            attempt = job.attempt,
            queue,
            delay_secs = delay.map(|d| d.as_secs()),
            "Enqueueing dispatch job"
        );
        self.tx
            .send(ScheduledJob {
                descriptor: job,
                delay,
                queue: queue.to_string(),
            })
            .map_err(|e| SchedulerError::Enqueue(e.to_string()))
    }
}
