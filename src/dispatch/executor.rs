// Webhook delivery executor
//
// Performs the HTTP POST for one planned delivery: JSON body, fixed
// timeout, fixed User-Agent, TLS verification per config (off by default).
// Non-2xx statuses are returned for classification, never raised. The
// request and response are captured as values so the caller can fill the
// audit record.

use crate::config::HttpConfig;
use crate::error::DispatchError;
use crate::registry::WebhookRegistration;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outbound request as captured right before send
#[derive(Debug, Clone)]
pub struct RequestCapture {
    /// First Content-Type header value, when one was set
    pub content_type: Option<String>,
    /// Serialized request body
    pub body: String,
}

/// Inbound response as captured when it arrives
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl DeliveryResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Webhook delivery executor
pub struct DeliveryExecutor {
    client: reqwest::Client,
}

impl DeliveryExecutor {
    /// Build the executor from HTTP config. Certificate verification is
    /// controlled by `http.verify_tls` and defaults to off.
    pub fn new(config: &HttpConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(DispatchError::HttpClient)?;

        Ok(Self { client })
    }

    /// Deliver one payload, capturing the request and, when it arrives,
    /// the response. Transport failures (connect errors, the fixed
    /// timeout) come back as `Err`; non-2xx statuses come back as `Ok`.
    pub async fn deliver(
        &self,
        webhook: &WebhookRegistration,
        body: &Value,
    ) -> (RequestCapture, Result<DeliveryResponse, reqwest::Error>) {
        let capture = RequestCapture {
            content_type: Some("application/json".to_string()),
            body: body.to_string(),
        };

        let start = Instant::now();
        let result = self.client.post(&webhook.url).json(body).send().await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.to_string());
                let body = response.text().await.unwrap_or_default();

                debug!(
                    webhook_id = webhook.id,
                    status,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Webhook delivery completed"
                );

                (
                    capture,
                    Ok(DeliveryResponse {
                        status,
                        content_type,
                        body,
                    }),
                )
            }
            Err(e) => {
                warn!(
                    webhook_id = webhook.id,
                    url = %webhook.url,
                    error = %e,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Webhook delivery failed in transport"
                );
                (capture, Err(e))
            }
        }
    }

    /// Logging-disabled path: POST and discard the outcome. The timeout
    /// still applies; the result is intentionally ignored.
    pub async fn fire_and_forget(&self, webhook: &WebhookRegistration, body: &Value) {
        if let Err(e) = self.client.post(&webhook.url).json(body).send().await {
            debug!(webhook_id = webhook.id, error = %e, "Fire-and-forget delivery failed");
        }
    }
}
