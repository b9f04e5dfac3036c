// Webhook dispatch job
//
// Entry point for one unit of dispatch work: given an event payload and a
// snapshot of webhook registrations, build the deduplicated delivery plan,
// deliver each entry concurrently, record the audit trail, and decide
// whether the whole job needs a delayed re-run. The job does not return
// until every in-flight response handler (log persistence, retry
// classification, response callback) has completed.

pub mod executor;
pub mod planner;
pub mod retry;

use crate::config::Config;
use crate::error::DispatchError;
use crate::handlers::{
    EventFilter, FilterHandle, HandlerRegistry, PayloadTransformer, ResponseHandler,
    ResponseHandlerHandle, TransformerHandle,
};
use crate::logstore::{DeliveryLogRecord, DeliveryLogStore};
use crate::metrics;
use crate::registry::WebhookRegistration;
use crate::scheduler::{JobContext, JobDescriptor, Scheduler};
use executor::DeliveryExecutor;
use planner::{plan_deliveries, PlanEntry};
use retry::{DeliveryStatus, RetryController, RETRY_DELAY};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Opaque event payload: an ordered sequence of values describing what
/// happened. Immutable input to the job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData(Vec<Value>);

impl EventData {
    pub fn new(parts: Vec<Value>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[Value] {
        &self.0
    }

    /// Routing hint: the final payload element may name a preferred
    /// delivery queue via a `webhook_queue` string field.
    pub fn preferred_queue(&self) -> Option<&str> {
        self.0.last()?.get("webhook_queue")?.as_str()
    }
}

/// Terminal result of one job run
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Attempt ceiling already reached at entry; nothing planned or sent
    Skipped,
    /// Every planned delivery reached a terminal state
    Completed { delivered: usize, failed: usize },
    /// At least one delivery is retryable; the whole job was re-enqueued
    Rescheduled { delay: Duration, failed: usize },
}

/// The dispatch job runner. One instance serves many job runs; each run is
/// independent, so concurrent runs for different events need no
/// coordination.
pub struct WebhookDispatcher {
    config: Config,
    executor: DeliveryExecutor,
    retry: RetryController,
    filter: FilterHandle,
    transformer: TransformerHandle,
    response_callback: ResponseHandlerHandle,
    log_store: Arc<dyn DeliveryLogStore>,
    scheduler: Arc<dyn Scheduler>,
}

impl WebhookDispatcher {
    /// Build a dispatcher from config, resolving named handler references
    /// against the registry (lazily; bad names surface on first use).
    pub fn new(
        config: Config,
        handlers: Arc<HandlerRegistry>,
        log_store: Arc<dyn DeliveryLogStore>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, DispatchError> {
        let executor = DeliveryExecutor::new(&config.http)?;
        let retry = RetryController::new(config.log.attempt_ceiling());
        let filter =
            FilterHandle::from_config(handlers.clone(), config.handlers.filter_webhook.as_deref());
        let transformer =
            TransformerHandle::from_config(handlers.clone(), config.handlers.transformer.as_deref());
        let response_callback = ResponseHandlerHandle::from_config(
            handlers,
            config.handlers.response_callback.as_deref(),
        );

        Ok(Self {
            config,
            executor,
            retry,
            filter,
            transformer,
            response_callback,
            log_store,
            scheduler,
        })
    }

    /// Replace the filter with an inline implementation
    pub fn with_filter(mut self, filter: Arc<dyn EventFilter>) -> Self {
        self.filter = FilterHandle::inline(filter);
        self
    }

    /// Replace the transformer with an inline implementation
    pub fn with_transformer(mut self, transformer: Arc<dyn PayloadTransformer>) -> Self {
        self.transformer = TransformerHandle::inline(transformer);
        self
    }

    /// Replace the response callback with an inline implementation
    pub fn with_response_callback(mut self, handler: Arc<dyn ResponseHandler>) -> Self {
        self.response_callback = ResponseHandlerHandle::inline(handler);
        self
    }

    /// Execute one dispatch job run.
    ///
    /// Filter, transformer and response-callback failures propagate after
    /// all in-flight deliveries have completed; the scheduler applies its
    /// own retry policy to the job as a whole.
    pub async fn run(
        &self,
        ctx: JobContext,
        webhooks: &[WebhookRegistration],
        event: &EventData,
    ) -> Result<JobOutcome, DispatchError> {
        if self.retry.attempts_exhausted(ctx.attempt) {
            info!(attempt = ctx.attempt, "Attempt ceiling reached, skipping job");
            return Ok(JobOutcome::Skipped);
        }

        let plan = plan_deliveries(event, webhooks, &self.filter, &self.transformer)?;
        if plan.is_empty() {
            debug!("Empty delivery plan, job complete");
            return Ok(JobOutcome::Completed {
                delivered: 0,
                failed: 0,
            });
        }

        let logging = self.config.log.active;
        let mut deliveries = Vec::with_capacity(plan.len());
        for entry in &plan {
            // Second filter pass, part of the contract: the filter must be
            // pure, both passes must agree for the entry to dispatch
            if !self.filter.filter(event, &entry.webhook)? {
                continue;
            }
            deliveries.push(self.deliver_entry(ctx, entry, logging));
        }

        // The job is not done until every response handler has run
        let results = futures::future::join_all(deliveries).await;

        let mut statuses = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let delivered = statuses
            .iter()
            .filter(|s| matches!(s, DeliveryStatus::Succeeded | DeliveryStatus::Sent))
            .count();
        let failed = statuses.len() - delivered;
        let retryable = statuses
            .iter()
            .any(|s| *s == DeliveryStatus::FailedRetryable);

        if retryable {
            let queue = event
                .preferred_queue()
                .unwrap_or(&self.config.queue.default)
                .to_string();
            let descriptor = JobDescriptor {
                webhooks: webhooks.to_vec(),
                event: event.clone(),
                attempt: ctx.attempt + 1,
            };
            self.scheduler
                .enqueue(descriptor, Some(RETRY_DELAY), &queue)
                .await?;
            metrics::JOB_RESCHEDULES_TOTAL.inc();
            info!(
                attempt = ctx.attempt,
                failed,
                queue,
                delay_secs = RETRY_DELAY.as_secs(),
                "Job rescheduled after failed deliveries"
            );
            return Ok(JobOutcome::Rescheduled {
                delay: RETRY_DELAY,
                failed,
            });
        }

        info!(delivered, failed, "Dispatch job complete");
        Ok(JobOutcome::Completed { delivered, failed })
    }

    /// Deliver one plan entry. With logging enabled the record is created
    /// before send, filled from the captures, persisted once, and only then
    /// is the outcome classified and the response callback invoked.
    async fn deliver_entry(
        &self,
        ctx: JobContext,
        entry: &PlanEntry,
        logging: bool,
    ) -> Result<DeliveryStatus, DispatchError> {
        if !logging {
            self.executor
                .fire_and_forget(&entry.webhook, &entry.body)
                .await;
            metrics::DELIVERIES_TOTAL.with_label_values(&["sent"]).inc();
            return Ok(DeliveryStatus::Sent);
        }

        let mut record = DeliveryLogRecord::new(entry.webhook.id, &entry.webhook.url);

        let timer = metrics::DELIVERY_DURATION_SECONDS.start_timer();
        let (capture, result) = self.executor.deliver(&entry.webhook, &entry.body).await;
        timer.observe_duration();

        record.set_request(capture.content_type, capture.body);

        let (status_code, response) = match result {
            Ok(response) => {
                record.set_response(
                    response.status,
                    response.content_type.clone(),
                    &response.body,
                );
                (Some(response.status), Some(response))
            }
            // Transport failure: persisted with empty response fields,
            // classified like a non-2xx response
            Err(_) => (None, None),
        };

        self.log_store.record(record).await?;

        let status = self.retry.classify(status_code, ctx.attempt);
        let outcome_label = match status {
            DeliveryStatus::Succeeded => "succeeded",
            DeliveryStatus::FailedRetryable => "retryable",
            DeliveryStatus::FailedTerminal => "terminal",
            DeliveryStatus::Pending | DeliveryStatus::Sent => "sent",
        };
        metrics::DELIVERIES_TOTAL
            .with_label_values(&[outcome_label])
            .inc();

        if let Some(response) = &response {
            if let Err(e) = self.response_callback.handle(&entry.webhook, response).await {
                match e {
                    // Misconfiguration surfaces as a job failure
                    DispatchError::HandlerResolution(_) => return Err(e),
                    _ => warn!(
                        webhook_id = entry.webhook.id,
                        error = %e,
                        "Response callback failed"
                    ),
                }
            }
        }

        if status == DeliveryStatus::FailedTerminal {
            warn!(
                webhook_id = entry.webhook.id,
                status_code, "Delivery failed terminally, attempts exhausted"
            );
        }

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use crate::logstore::InMemoryLogStore;
    use crate::scheduler::ScheduledJob;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records every enqueue without executing anything
    struct RecordingScheduler {
        jobs: Mutex<Vec<ScheduledJob>>,
    }

    impl RecordingScheduler {
        fn new() -> Self {
            Self {
                jobs: Mutex::new(Vec::new()),
            }
        }

        async fn jobs(&self) -> Vec<ScheduledJob> {
            std::mem::take(&mut *self.jobs.lock().await)
        }
    }

    #[async_trait]
    impl Scheduler for RecordingScheduler {
        async fn enqueue(
            &self,
            job: JobDescriptor,
            delay: Option<Duration>,
            queue: &str,
        ) -> Result<(), SchedulerError> {
            self.jobs.lock().await.push(ScheduledJob {
                descriptor: job,
                delay,
                queue: queue.to_string(),
            });
            Ok(())
        }
    }

    fn dispatcher(
        config: Config,
        log_store: Arc<InMemoryLogStore>,
        scheduler: Arc<RecordingScheduler>,
    ) -> WebhookDispatcher {
        WebhookDispatcher::new(
            config,
            Arc::new(HandlerRegistry::new()),
            log_store,
            scheduler,
        )
        .unwrap()
        .with_filter(Arc::new(|_: &EventData, _: &WebhookRegistration| true))
        .with_transformer(Arc::new(|event: &EventData, _: &WebhookRegistration| {
            json!(event.parts())
        }))
    }

    fn event() -> EventData {
        EventData::new(vec![json!({"type": "order.created", "id": 42})])
    }

    #[test]
    fn test_preferred_queue_from_last_element() {
        let event = EventData::new(vec![
            json!({"type": "order.created"}),
            json!({"webhook_queue": "priority"}),
        ]);
        assert_eq!(event.preferred_queue(), Some("priority"));

        let no_hint = EventData::new(vec![json!({"type": "order.created"})]);
        assert_eq!(no_hint.preferred_queue(), None);
        assert_eq!(EventData::default().preferred_queue(), None);
    }

    #[tokio::test]
    async fn test_identical_payloads_collapse_to_one_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let webhooks = vec![
            WebhookRegistration::new(1, server.uri(), "order.*"),
            WebhookRegistration::new(2, server.uri(), "order.*"),
        ];

        let log_store = Arc::new(InMemoryLogStore::new(None));
        let scheduler = Arc::new(RecordingScheduler::new());
        let dispatcher = dispatcher(Config::default(), log_store.clone(), scheduler.clone());

        let outcome = dispatcher
            .run(JobContext::first_attempt(), &webhooks, &event())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            JobOutcome::Completed {
                delivered: 1,
                failed: 0
            }
        );
        // The representative is the later registration
        assert_eq!(log_store.count(2).await.unwrap(), 1);
        assert_eq!(log_store.count(1).await.unwrap(), 0);
        assert!(scheduler.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_webhook_list_completes_without_sending() {
        let log_store = Arc::new(InMemoryLogStore::new(None));
        let scheduler = Arc::new(RecordingScheduler::new());
        let dispatcher = dispatcher(Config::default(), log_store, scheduler);

        let outcome = dispatcher
            .run(JobContext::first_attempt(), &[], &event())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Completed {
                delivered: 0,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_non_success_reschedules_whole_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let webhooks = vec![WebhookRegistration::new(1, server.uri(), "order.*")];
        let mut config = Config::default();
        config.log.max_attempts = 3;

        let log_store = Arc::new(InMemoryLogStore::new(None));
        let scheduler = Arc::new(RecordingScheduler::new());
        let dispatcher = dispatcher(config, log_store, scheduler.clone());

        let outcome = dispatcher
            .run(JobContext { attempt: 2 }, &webhooks, &event())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            JobOutcome::Rescheduled {
                delay: RETRY_DELAY,
                failed: 1
            }
        );

        let jobs = scheduler.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].delay, Some(Duration::from_secs(30)));
        assert_eq!(jobs[0].descriptor.attempt, 3);
        assert_eq!(jobs[0].queue, "default");
    }

    #[tokio::test]
    async fn test_attempt_ceiling_short_circuits_before_planning() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let webhooks = vec![WebhookRegistration::new(1, server.uri(), "order.*")];
        let mut config = Config::default();
        config.log.max_attempts = 3;

        let log_store = Arc::new(InMemoryLogStore::new(None));
        let scheduler = Arc::new(RecordingScheduler::new());
        let dispatcher = dispatcher(config, log_store.clone(), scheduler.clone());

        let outcome = dispatcher
            .run(JobContext { attempt: 3 }, &webhooks, &event())
            .await
            .unwrap();

        assert_eq!(outcome, JobOutcome::Skipped);
        assert_eq!(log_store.count(1).await.unwrap(), 0);
        assert!(scheduler.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_logging_disabled_creates_no_records_and_no_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let webhooks = vec![WebhookRegistration::new(1, server.uri(), "order.*")];
        let mut config = Config::default();
        config.log.active = false;

        let log_store = Arc::new(InMemoryLogStore::new(None));
        let scheduler = Arc::new(RecordingScheduler::new());
        let dispatcher = dispatcher(config, log_store.clone(), scheduler.clone());

        let outcome = dispatcher
            .run(JobContext::first_attempt(), &webhooks, &event())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            JobOutcome::Completed {
                delivered: 1,
                failed: 0
            }
        );
        assert_eq!(log_store.count(1).await.unwrap(), 0);
        assert!(scheduler.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_retryable_and_logged() {
        // Connection refused
        let webhooks = vec![WebhookRegistration::new(
            1,
            "http://127.0.0.1:9",
            "order.*",
        )];

        let log_store = Arc::new(InMemoryLogStore::new(None));
        let scheduler = Arc::new(RecordingScheduler::new());
        let dispatcher = dispatcher(Config::default(), log_store.clone(), scheduler.clone());

        let outcome = dispatcher
            .run(JobContext::first_attempt(), &webhooks, &event())
            .await
            .unwrap();

        assert!(matches!(outcome, JobOutcome::Rescheduled { .. }));

        let records = log_store.for_webhook(1).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, None);
        assert!(records[0].payload.is_some());
    }

    #[tokio::test]
    async fn test_response_callback_sees_webhook_and_response() {
        struct Capture {
            seen: Mutex<Vec<(u64, u16)>>,
        }

        #[async_trait]
        impl ResponseHandler for Capture {
            async fn handle(
                &self,
                webhook: &WebhookRegistration,
                response: &executor::DeliveryResponse,
            ) -> anyhow::Result<()> {
                self.seen.lock().await.push((webhook.id, response.status));
                Ok(())
            }
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let webhooks = vec![WebhookRegistration::new(7, server.uri(), "order.*")];
        let capture = Arc::new(Capture {
            seen: Mutex::new(Vec::new()),
        });

        let log_store = Arc::new(InMemoryLogStore::new(None));
        let scheduler = Arc::new(RecordingScheduler::new());
        let dispatcher = dispatcher(Config::default(), log_store, scheduler)
            .with_response_callback(capture.clone());

        dispatcher
            .run(JobContext::first_attempt(), &webhooks, &event())
            .await
            .unwrap();

        let seen = capture.seen.lock().await;
        assert_eq!(seen.as_slice(), &[(7, 204)]);
    }

    #[tokio::test]
    async fn test_filter_rejecting_all_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let webhooks = vec![
            WebhookRegistration::new(1, server.uri(), "order.*"),
            WebhookRegistration::new(2, server.uri(), "order.*"),
        ];

        let log_store = Arc::new(InMemoryLogStore::new(None));
        let scheduler = Arc::new(RecordingScheduler::new());
        let dispatcher = dispatcher(Config::default(), log_store, scheduler)
            .with_filter(Arc::new(|_: &EventData, _: &WebhookRegistration| false));

        let outcome = dispatcher
            .run(JobContext::first_attempt(), &webhooks, &event())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Completed {
                delivered: 0,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_reschedule_uses_preferred_queue() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let webhooks = vec![WebhookRegistration::new(1, server.uri(), "order.*")];
        let event = EventData::new(vec![
            json!({"type": "order.created"}),
            json!({"webhook_queue": "priority"}),
        ]);

        let log_store = Arc::new(InMemoryLogStore::new(None));
        let scheduler = Arc::new(RecordingScheduler::new());
        let dispatcher = dispatcher(Config::default(), log_store, scheduler.clone());

        dispatcher
            .run(JobContext::first_attempt(), &webhooks, &event)
            .await
            .unwrap();

        let jobs = scheduler.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].queue, "priority");
    }
}
