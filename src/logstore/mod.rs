// Delivery audit log
//
// One DeliveryLogRecord per attempted HTTP call: the outbound request as
// sent, and the response as received (body truncated to bound storage).
// Storage is capped per webhook: when the cap is reached, the single oldest
// record (by last update) is evicted before the new one is inserted.

use crate::error::LogStoreError;
use crate::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Maximum stored response body length in bytes; longer bodies are
/// truncated, not rejected.
pub const MAX_RESPONSE_BYTES: usize = 65_530;

/// One persisted request/response capture for a delivery attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLogRecord {
    /// Unique record id
    pub id: Uuid,
    /// Webhook this delivery targeted
    pub webhook_id: u64,
    /// Destination URL at send time
    pub url: String,
    /// Request Content-Type, when one was set
    pub payload_format: Option<String>,
    /// Request body as sent
    pub payload: Option<String>,
    /// Response status code; absent on transport failure
    pub status: Option<u16>,
    /// Response Content-Type
    pub response_format: Option<String>,
    /// Response body, truncated to MAX_RESPONSE_BYTES
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryLogRecord {
    /// Create a record for a webhook right before send. Request fields are
    /// filled synchronously, response fields when the response arrives.
    pub fn new(webhook_id: u64, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            webhook_id,
            url: url.into(),
            payload_format: None,
            payload: None,
            status: None,
            response_format: None,
            response: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Capture the outbound request
    pub fn set_request(&mut self, content_type: Option<String>, body: String) {
        self.payload_format = content_type;
        self.payload = Some(body);
        self.updated_at = Utc::now();
    }

    /// Capture the inbound response, truncating the body
    pub fn set_response(&mut self, status: u16, content_type: Option<String>, body: &str) {
        self.status = Some(status);
        self.response_format = content_type;
        self.response = Some(truncate_to_boundary(body, MAX_RESPONSE_BYTES).to_string());
        self.updated_at = Utc::now();
    }
}

/// Truncate to at most `max` bytes without splitting a UTF-8 sequence
fn truncate_to_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Persistence boundary for delivery log records.
///
/// `record` must treat the evict+insert pair for one webhook as a critical
/// section: two concurrent deliveries to the same webhook must not both
/// evict before either inserts.
#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    /// Persist a record, evicting the oldest record for the webhook first
    /// when the per-webhook cap is reached
    async fn record(&self, record: DeliveryLogRecord) -> Result<(), LogStoreError>;

    /// Number of records stored for a webhook
    async fn count(&self, webhook_id: u64) -> Result<usize, LogStoreError>;

    /// All records stored for a webhook, oldest first
    async fn for_webhook(&self, webhook_id: u64) -> Result<Vec<DeliveryLogRecord>, LogStoreError>;
}

/// In-memory log store with cap-then-evict semantics.
///
/// A single mutex over the map makes each record() call atomic, which
/// covers the per-webhook critical section.
pub struct InMemoryLogStore {
    cap: Option<usize>,
    records: Mutex<HashMap<u64, Vec<DeliveryLogRecord>>>,
}

impl InMemoryLogStore {
    /// `cap = None` means unlimited per-webhook storage
    pub fn new(cap: Option<usize>) -> Self {
        Self {
            cap,
            records: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DeliveryLogStore for InMemoryLogStore {
    async fn record(&self, record: DeliveryLogRecord) -> Result<(), LogStoreError> {
        let mut records = self.records.lock().await;
        let entries = records.entry(record.webhook_id).or_default();

        if let Some(cap) = self.cap {
            if cap == 0 {
                return Ok(());
            }
            // One eviction per insert: oldest record by last update
            while entries.len() >= cap {
                let oldest = entries
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, r)| r.updated_at)
                    .map(|(i, _)| i);
                match oldest {
                    Some(i) => {
                        let evicted = entries.remove(i);
                        metrics::LOG_EVICTIONS_TOTAL.inc();
                        debug!(
                            webhook_id = evicted.webhook_id,
                            record_id = %evicted.id,
                            "Evicted oldest delivery log record"
                        );
                    }
                    None => break,
                }
            }
        }

        entries.push(record);
        Ok(())
    }

    async fn count(&self, webhook_id: u64) -> Result<usize, LogStoreError> {
        Ok(self
            .records
            .lock()
            .await
            .get(&webhook_id)
            .map(|v| v.len())
            .unwrap_or(0))
    }

    async fn for_webhook(&self, webhook_id: u64) -> Result<Vec<DeliveryLogRecord>, LogStoreError> {
        Ok(self
            .records
            .lock()
            .await
            .get(&webhook_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_for(webhook_id: u64) -> DeliveryLogRecord {
        let mut record = DeliveryLogRecord::new(webhook_id, "https://example.com/hook");
        record.set_request(Some("application/json".to_string()), "{}".to_string());
        record
    }

    #[test]
    fn test_response_truncated_to_max_bytes() {
        let mut record = record_for(1);
        let body = "x".repeat(MAX_RESPONSE_BYTES + 1000);
        record.set_response(200, Some("text/plain".to_string()), &body);

        let stored = record.response.unwrap();
        assert_eq!(stored.len(), MAX_RESPONSE_BYTES);
    }

    #[test]
    fn test_short_response_stored_whole() {
        let mut record = record_for(1);
        record.set_response(200, None, "ok");
        assert_eq!(record.response.as_deref(), Some("ok"));
        assert_eq!(record.status, Some(200));
    }

    #[test]
    fn test_truncation_respects_utf8_boundaries() {
        // Multi-byte characters that straddle the limit must not be split
        let body = "é".repeat(MAX_RESPONSE_BYTES); // 2 bytes each
        let truncated = truncate_to_boundary(&body, MAX_RESPONSE_BYTES);
        assert!(truncated.len() <= MAX_RESPONSE_BYTES);
        assert!(body.is_char_boundary(truncated.len()));
    }

    #[tokio::test]
    async fn test_cap_evicts_exactly_one_per_insert() {
        let store = InMemoryLogStore::new(Some(3));
        for _ in 0..3 {
            store.record(record_for(1)).await.unwrap();
        }
        assert_eq!(store.count(1).await.unwrap(), 3);

        // At the cap: one insert leaves the count at the cap
        store.record(record_for(1)).await.unwrap();
        assert_eq!(store.count(1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_eviction_removes_oldest_by_update_time() {
        let store = InMemoryLogStore::new(Some(2));

        let mut oldest = record_for(1);
        oldest.updated_at = Utc::now() - chrono::Duration::minutes(10);
        let oldest_id = oldest.id;

        let newer = record_for(1);
        let newer_id = newer.id;

        store.record(oldest).await.unwrap();
        store.record(newer).await.unwrap();
        store.record(record_for(1)).await.unwrap();

        let remaining: Vec<Uuid> = store
            .for_webhook(1)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains(&oldest_id));
        assert!(remaining.contains(&newer_id));
    }

    #[tokio::test]
    async fn test_caps_are_per_webhook() {
        let store = InMemoryLogStore::new(Some(1));
        store.record(record_for(1)).await.unwrap();
        store.record(record_for(2)).await.unwrap();

        assert_eq!(store.count(1).await.unwrap(), 1);
        assert_eq!(store.count(2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unlimited_storage() {
        let store = InMemoryLogStore::new(None);
        for _ in 0..100 {
            store.record(record_for(1)).await.unwrap();
        }
        assert_eq!(store.count(1).await.unwrap(), 100);
    }
}
