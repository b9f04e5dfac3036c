//! Dispatch Error Types
//!
//! This module defines the error taxonomy for webhook dispatch:
//! configuration/handler resolution failures, transport failures, and the
//! collaborator (registry, log store, scheduler) error surfaces.

/// Error types for the dispatch job and its collaborators
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A named handler reference could not be resolved from the registry.
    /// Indicates misconfiguration; surfaced as a job failure.
    #[error("Handler '{0}' could not be resolved")]
    HandlerResolution(String),

    /// A filter/transformer/response-callback invocation failed.
    /// Propagates to the job's caller, which applies its own retry policy.
    #[error("Handler invocation failed: {0}")]
    Handler(#[source] anyhow::Error),

    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// Payload serialization failed
    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Log store error
    #[error("Log store error: {0}")]
    LogStore(#[from] LogStoreError),

    /// Scheduler error while re-enqueueing the job
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Error types for the webhook registry
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Webhook not found
    #[error("Webhook not found: {0}")]
    NotFound(u64),

    /// Backing store error
    #[error("Store error: {0}")]
    Store(String),
}

/// Error types for the delivery log store
#[derive(Debug, thiserror::Error)]
pub enum LogStoreError {
    /// Backing store error
    #[error("Store error: {0}")]
    Store(String),
}

/// Error types for the scheduling substrate
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The queue rejected the job
    #[error("Failed to enqueue job: {0}")]
    Enqueue(String),
}
