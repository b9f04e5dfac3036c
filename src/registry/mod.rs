// Webhook registry
//
// Owns the read-only view of webhook registrations consumed by the dispatch
// job. The registry fronts a backing store with a read-through cache that is
// invalidated synchronously inside the registry's own write path, so the
// dispatch core only ever asks for "the current webhooks" and stays unaware
// of caching.

use crate::error::RegistryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Cache key under which the loaded webhook list is stored
pub const CACHE_KEY: &str = "hookcast.webhooks";

/// One subscriber registration: the URL and the event key it wants
/// notifications for. Immutable for the duration of one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRegistration {
    /// Unique registration id
    pub id: u64,
    /// Destination URL, POSTed to on delivery
    pub url: String,
    /// Subscribed event key; a trailing `*` matches a namespace prefix
    pub event: String,
    /// Owning tenant, when the host is multi-tenant
    pub tenant_id: Option<u64>,
}

impl WebhookRegistration {
    pub fn new(id: u64, url: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            event: event.into(),
            tenant_id: None,
        }
    }

    /// Check whether this registration subscribes to an event key.
    /// `order.*` matches `order.created`; `*` matches everything.
    pub fn matches_event(&self, event_key: &str) -> bool {
        if self.event == "*" {
            return true;
        }
        match self.event.strip_suffix('*') {
            Some(prefix) => event_key.starts_with(prefix),
            None => self.event == event_key,
        }
    }
}

/// Persistence boundary for webhook registrations
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn list(&self) -> Result<Vec<WebhookRegistration>, RegistryError>;
    async fn create(&self, webhook: WebhookRegistration) -> Result<(), RegistryError>;
    async fn update(&self, webhook: WebhookRegistration) -> Result<(), RegistryError>;
    async fn delete(&self, id: u64) -> Result<(), RegistryError>;
}

/// In-memory registration store, ordered by insertion
pub struct InMemoryWebhookStore {
    hooks: RwLock<Vec<WebhookRegistration>>,
}

impl InMemoryWebhookStore {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryWebhookStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookStore for InMemoryWebhookStore {
    async fn list(&self) -> Result<Vec<WebhookRegistration>, RegistryError> {
        Ok(self.hooks.read().await.clone())
    }

    async fn create(&self, webhook: WebhookRegistration) -> Result<(), RegistryError> {
        self.hooks.write().await.push(webhook);
        Ok(())
    }

    async fn update(&self, webhook: WebhookRegistration) -> Result<(), RegistryError> {
        let mut hooks = self.hooks.write().await;
        match hooks.iter_mut().find(|h| h.id == webhook.id) {
            Some(existing) => {
                *existing = webhook;
                Ok(())
            }
            None => Err(RegistryError::NotFound(webhook.id)),
        }
    }

    async fn delete(&self, id: u64) -> Result<(), RegistryError> {
        let mut hooks = self.hooks.write().await;
        let before = hooks.len();
        hooks.retain(|h| h.id != id);
        if hooks.len() == before {
            return Err(RegistryError::NotFound(id));
        }
        Ok(())
    }
}

/// Read-through cached view over a webhook store.
///
/// Reads populate the cache once; every write (create/update/delete) goes to
/// the store and then flushes the cache before returning, so a subsequent
/// read observes the write.
pub struct CachedRegistry<S: WebhookStore> {
    store: S,
    cache: Arc<RwLock<HashMap<&'static str, Vec<WebhookRegistration>>>>,
}

impl<S: WebhookStore> CachedRegistry<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// All current registrations, in store order
    pub async fn all(&self) -> Result<Vec<WebhookRegistration>, RegistryError> {
        if let Some(cached) = self.cache.read().await.get(CACHE_KEY) {
            return Ok(cached.clone());
        }

        let hooks = self.store.list().await?;
        debug!(count = hooks.len(), "Loaded webhooks into cache");
        self.cache.write().await.insert(CACHE_KEY, hooks.clone());
        Ok(hooks)
    }

    /// Registrations subscribed to an event key
    pub async fn for_event(&self, event_key: &str) -> Result<Vec<WebhookRegistration>, RegistryError> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|h| h.matches_event(event_key))
            .collect())
    }

    pub async fn create(&self, webhook: WebhookRegistration) -> Result<(), RegistryError> {
        self.store.create(webhook).await?;
        self.invalidate().await;
        Ok(())
    }

    pub async fn update(&self, webhook: WebhookRegistration) -> Result<(), RegistryError> {
        self.store.update(webhook).await?;
        self.invalidate().await;
        Ok(())
    }

    pub async fn delete(&self, id: u64) -> Result<(), RegistryError> {
        self.store.delete(id).await?;
        self.invalidate().await;
        Ok(())
    }

    async fn invalidate(&self) {
        self.cache.write().await.remove(CACHE_KEY);
        debug!("Webhook cache invalidated");
    }
}
