// Retry control for webhook deliveries
//
// A delivery attempt moves Pending -> Sent -> {Succeeded, FailedRetryable,
// FailedTerminal}. Transport failures classify exactly like non-2xx
// responses. A retryable failure re-enqueues the whole job after a fixed
// delay; the attempt ceiling bounds how many times that can happen.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Fixed delay before a failed job is re-run
pub const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Delivery attempt state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Planned, not yet sent
    Pending,
    /// Request issued, response not yet classified
    Sent,
    /// Response status in [200, 300)
    Succeeded,
    /// Failed with attempts remaining; the job will be re-run
    FailedRetryable,
    /// Failed with the attempt ceiling reached; no further action
    FailedTerminal,
}

/// Classifies delivery outcomes against the configured attempt ceiling
#[derive(Debug, Clone, Copy)]
pub struct RetryController {
    /// Maximum job attempts; None means unlimited
    max_attempts: Option<u32>,
}

impl RetryController {
    pub fn new(max_attempts: Option<u32>) -> Self {
        Self { max_attempts }
    }

    /// Whether a job invoked at this attempt count should return before
    /// planning or sending anything
    pub fn attempts_exhausted(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt >= max,
            None => false,
        }
    }

    /// Classify a delivery outcome. `status` is None on transport failure
    /// (connect error, timeout), which counts as a failed attempt.
    pub fn classify(&self, status: Option<u16>, attempt: u32) -> DeliveryStatus {
        if let Some(status) = status {
            if (200..300).contains(&status) {
                return DeliveryStatus::Succeeded;
            }
        }

        match self.max_attempts {
            Some(max) if attempt >= max => {
                debug!(attempt, max, "Attempt ceiling reached, delivery terminal");
                DeliveryStatus::FailedTerminal
            }
            _ => DeliveryStatus::FailedRetryable,
        }
    }
}
