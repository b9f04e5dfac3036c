// Delivery planning with payload dedup
//
// First pass over the candidate webhooks: filter, transform, digest the
// serialized payload, and keep exactly one entry per distinct digest.
// Registrations whose transformed bodies serialize identically collapse to
// one delivery; the last webhook seen for a digest becomes the
// representative, at the position where that digest first appeared.

use crate::dispatch::EventData;
use crate::error::DispatchError;
use crate::handlers::{FilterHandle, TransformerHandle};
use crate::registry::WebhookRegistration;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

/// One planned delivery: a representative webhook and its outbound body
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub webhook: WebhookRegistration,
    pub body: Value,
    pub digest: String,
}

/// Hex SHA-256 of the serialized payload. serde_json maps are ordered, so
/// equal values always serialize to equal bytes.
pub fn payload_digest(body: &Value) -> Result<String, DispatchError> {
    let bytes = serde_json::to_vec(body)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Build the deduplicated delivery plan for one event.
///
/// Filter and transformer invocation failures propagate to the caller.
/// An empty webhook list yields an empty plan.
pub fn plan_deliveries(
    event: &EventData,
    webhooks: &[WebhookRegistration],
    filter: &FilterHandle,
    transformer: &TransformerHandle,
) -> Result<Vec<PlanEntry>, DispatchError> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut entries: Vec<PlanEntry> = Vec::new();

    for webhook in webhooks {
        if !filter.filter(event, webhook)? {
            continue;
        }

        let body = transformer.transform(event, webhook)?;
        let digest = payload_digest(&body)?;

        match positions.get(&digest) {
            Some(&position) => {
                // Duplicate payload: the later webhook wins as representative
                debug!(
                    webhook_id = webhook.id,
                    replaced = entries[position].webhook.id,
                    "Collapsing duplicate payload"
                );
                entries[position] = PlanEntry {
                    webhook: webhook.clone(),
                    body,
                    digest,
                };
            }
            None => {
                positions.insert(digest.clone(), entries.len());
                entries.push(PlanEntry {
                    webhook: webhook.clone(),
                    body,
                    digest,
                });
            }
        }
    }

    debug!(
        candidates = webhooks.len(),
        planned = entries.len(),
        "Delivery plan built"
    );
    Ok(entries)
}
