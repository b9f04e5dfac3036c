// Handler resolution for the dispatch extension points
//
// Turns configured extension points (named registry entries or inline
// closures) into uniform handles used by the dispatcher:
// - EventFilter decides whether a webhook applies to an event
// - PayloadTransformer computes the outbound body
// - ResponseHandler observes delivery responses
//
// Named references use "namespace@method" form with a per-slot default
// method. Resolution is lazy: a bad name surfaces on first invocation,
// not at construction.

use crate::dispatch::executor::DeliveryResponse;
use crate::dispatch::EventData;
use crate::error::DispatchError;
use crate::registry::WebhookRegistration;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Decides whether a webhook should receive an event.
///
/// Precondition: implementations must be pure with respect to their inputs.
/// The dispatcher evaluates the filter once while planning and once more
/// immediately before each delivery; an impure filter can disagree with
/// itself between the two passes.
pub trait EventFilter: Send + Sync {
    fn filter(&self, event: &EventData, webhook: &WebhookRegistration) -> anyhow::Result<bool>;
}

/// Computes the outbound payload for one webhook
pub trait PayloadTransformer: Send + Sync {
    fn transform(&self, event: &EventData, webhook: &WebhookRegistration)
        -> anyhow::Result<Value>;
}

/// Observes the delivery response for side effects (notification, audit).
/// Return values are ignored by the dispatcher; failures are logged and do
/// not abort delivery of other plan entries.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn handle(
        &self,
        webhook: &WebhookRegistration,
        response: &DeliveryResponse,
    ) -> anyhow::Result<()>;
}

impl<F> EventFilter for F
where
    F: Fn(&EventData, &WebhookRegistration) -> bool + Send + Sync,
{
    fn filter(&self, event: &EventData, webhook: &WebhookRegistration) -> anyhow::Result<bool> {
        Ok(self(event, webhook))
    }
}

impl<F> PayloadTransformer for F
where
    F: Fn(&EventData, &WebhookRegistration) -> Value + Send + Sync,
{
    fn transform(
        &self,
        event: &EventData,
        webhook: &WebhookRegistration,
    ) -> anyhow::Result<Value> {
        Ok(self(event, webhook))
    }
}

/// Default method names per extension point
pub const DEFAULT_FILTER_METHOD: &str = "filter";
pub const DEFAULT_TRANSFORM_METHOD: &str = "transform";
pub const DEFAULT_RESPONSE_METHOD: &str = "handle";

/// Lookup table for named handler implementations, populated at startup.
/// Keys are normalized `"namespace@method"` strings.
#[derive(Default)]
pub struct HandlerRegistry {
    filters: HashMap<String, Arc<dyn EventFilter>>,
    transformers: HashMap<String, Arc<dyn PayloadTransformer>>,
    response_handlers: HashMap<String, Arc<dyn ResponseHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter under `"namespace"` or `"namespace@method"`
    pub fn register_filter(
        &mut self,
        reference: &str,
        filter: Arc<dyn EventFilter>,
    ) -> &mut Self {
        let key = normalize_reference(reference, DEFAULT_FILTER_METHOD);
        self.filters.insert(key, filter);
        self
    }

    /// Register a transformer under `"namespace"` or `"namespace@method"`
    pub fn register_transformer(
        &mut self,
        reference: &str,
        transformer: Arc<dyn PayloadTransformer>,
    ) -> &mut Self {
        let key = normalize_reference(reference, DEFAULT_TRANSFORM_METHOD);
        self.transformers.insert(key, transformer);
        self
    }

    /// Register a response handler under `"namespace"` or `"namespace@method"`
    pub fn register_response_handler(
        &mut self,
        reference: &str,
        handler: Arc<dyn ResponseHandler>,
    ) -> &mut Self {
        let key = normalize_reference(reference, DEFAULT_RESPONSE_METHOD);
        self.response_handlers.insert(key, handler);
        self
    }

    fn filter(&self, key: &str) -> Option<Arc<dyn EventFilter>> {
        self.filters.get(key).cloned()
    }

    fn transformer(&self, key: &str) -> Option<Arc<dyn PayloadTransformer>> {
        self.transformers.get(key).cloned()
    }

    fn response_handler(&self, key: &str) -> Option<Arc<dyn ResponseHandler>> {
        self.response_handlers.get(key).cloned()
    }
}

/// Normalize a handler reference to `"namespace@method"` form,
/// appending the default method when none is given.
fn normalize_reference(reference: &str, default_method: &str) -> String {
    match reference.split_once('@') {
        Some((namespace, method)) if !method.is_empty() => format!("{namespace}@{method}"),
        Some((namespace, _)) => format!("{namespace}@{default_method}"),
        None => format!("{reference}@{default_method}"),
    }
}

/// One resolved extension point: a named registry entry (resolved lazily on
/// first use), an inline implementation, or absent.
enum HandlerSource<T: ?Sized> {
    Named {
        registry: Arc<HandlerRegistry>,
        key: String,
        cell: OnceCell<Arc<T>>,
        lookup: fn(&HandlerRegistry, &str) -> Option<Arc<T>>,
    },
    Inline(Arc<T>),
    Absent,
}

impl<T: ?Sized> HandlerSource<T> {
    fn resolve(&self) -> Result<Option<&Arc<T>>, DispatchError> {
        match self {
            HandlerSource::Named {
                registry,
                key,
                cell,
                lookup,
            } => {
                let handler = cell.get_or_try_init(|| {
                    lookup(registry, key)
                        .ok_or_else(|| DispatchError::HandlerResolution(key.clone()))
                })?;
                Ok(Some(handler))
            }
            HandlerSource::Inline(handler) => Ok(Some(handler)),
            HandlerSource::Absent => Ok(None),
        }
    }
}

/// Resolved webhook filter. Absent filters reject everything.
pub struct FilterHandle {
    source: HandlerSource<dyn EventFilter>,
}

impl FilterHandle {
    pub fn from_config(registry: Arc<HandlerRegistry>, reference: Option<&str>) -> Self {
        match reference {
            Some(reference) => Self {
                source: HandlerSource::Named {
                    registry,
                    key: normalize_reference(reference, DEFAULT_FILTER_METHOD),
                    cell: OnceCell::new(),
                    lookup: HandlerRegistry::filter,
                },
            },
            None => Self {
                source: HandlerSource::Absent,
            },
        }
    }

    pub fn inline(filter: Arc<dyn EventFilter>) -> Self {
        Self {
            source: HandlerSource::Inline(filter),
        }
    }

    pub fn filter(
        &self,
        event: &EventData,
        webhook: &WebhookRegistration,
    ) -> Result<bool, DispatchError> {
        match self.source.resolve()? {
            Some(filter) => filter.filter(event, webhook).map_err(DispatchError::Handler),
            None => Ok(false),
        }
    }
}

/// Resolved payload transformer. Absent transformers produce JSON `null`.
pub struct TransformerHandle {
    source: HandlerSource<dyn PayloadTransformer>,
}

impl TransformerHandle {
    pub fn from_config(registry: Arc<HandlerRegistry>, reference: Option<&str>) -> Self {
        match reference {
            Some(reference) => Self {
                source: HandlerSource::Named {
                    registry,
                    key: normalize_reference(reference, DEFAULT_TRANSFORM_METHOD),
                    cell: OnceCell::new(),
                    lookup: HandlerRegistry::transformer,
                },
            },
            None => Self {
                source: HandlerSource::Absent,
            },
        }
    }

    pub fn inline(transformer: Arc<dyn PayloadTransformer>) -> Self {
        Self {
            source: HandlerSource::Inline(transformer),
        }
    }

    pub fn transform(
        &self,
        event: &EventData,
        webhook: &WebhookRegistration,
    ) -> Result<Value, DispatchError> {
        match self.source.resolve()? {
            Some(transformer) => transformer
                .transform(event, webhook)
                .map_err(DispatchError::Handler),
            None => Ok(Value::Null),
        }
    }
}

/// Resolved response callback. Absent callbacks are no-ops.
pub struct ResponseHandlerHandle {
    source: HandlerSource<dyn ResponseHandler>,
}

impl ResponseHandlerHandle {
    pub fn from_config(registry: Arc<HandlerRegistry>, reference: Option<&str>) -> Self {
        match reference {
            Some(reference) => Self {
                source: HandlerSource::Named {
                    registry,
                    key: normalize_reference(reference, DEFAULT_RESPONSE_METHOD),
                    cell: OnceCell::new(),
                    lookup: HandlerRegistry::response_handler,
                },
            },
            None => Self {
                source: HandlerSource::Absent,
            },
        }
    }

    pub fn inline(handler: Arc<dyn ResponseHandler>) -> Self {
        Self {
            source: HandlerSource::Inline(handler),
        }
    }

    pub async fn handle(
        &self,
        webhook: &WebhookRegistration,
        response: &DeliveryResponse,
    ) -> Result<(), DispatchError> {
        match self.source.resolve()? {
            Some(handler) => handler
                .handle(webhook, response)
                .await
                .map_err(DispatchError::Handler),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn webhook() -> WebhookRegistration {
        WebhookRegistration {
            id: 1,
            url: "https://example.com/hook".to_string(),
            event: "order.created".to_string(),
            tenant_id: None,
        }
    }

    #[test]
    fn test_normalize_reference() {
        assert_eq!(normalize_reference("acme", "filter"), "acme@filter");
        assert_eq!(normalize_reference("acme@custom", "filter"), "acme@custom");
        assert_eq!(normalize_reference("acme@", "filter"), "acme@filter");
    }

    #[test]
    fn test_named_filter_resolves_lazily() {
        let mut registry = HandlerRegistry::new();
        registry.register_filter("acme", Arc::new(|_: &EventData, _: &WebhookRegistration| true));
        let registry = Arc::new(registry);

        let handle = FilterHandle::from_config(registry, Some("acme"));
        let event = EventData::default();
        assert!(handle.filter(&event, &webhook()).unwrap());
    }

    #[test]
    fn test_named_filter_with_explicit_method() {
        let mut registry = HandlerRegistry::new();
        registry.register_filter(
            "acme@only_orders",
            Arc::new(|event: &EventData, _: &WebhookRegistration| {
                event
                    .parts()
                    .first()
                    .and_then(|v| v.get("type"))
                    .and_then(|v| v.as_str())
                    .map(|t| t.starts_with("order."))
                    .unwrap_or(false)
            }),
        );
        let registry = Arc::new(registry);

        let handle = FilterHandle::from_config(registry, Some("acme@only_orders"));
        let matching = EventData::new(vec![json!({"type": "order.created"})]);
        let other = EventData::new(vec![json!({"type": "user.created"})]);
        assert!(handle.filter(&matching, &webhook()).unwrap());
        assert!(!handle.filter(&other, &webhook()).unwrap());
    }

    #[test]
    fn test_missing_named_handler_fails_at_invocation() {
        let registry = Arc::new(HandlerRegistry::new());
        let handle = FilterHandle::from_config(registry, Some("missing"));

        // Construction succeeds; the failure surfaces when invoked
        let event = EventData::default();
        let err = handle.filter(&event, &webhook()).unwrap_err();
        assert!(matches!(err, DispatchError::HandlerResolution(ref key) if key == "missing@filter"));
    }

    #[test]
    fn test_absent_filter_rejects_everything() {
        let registry = Arc::new(HandlerRegistry::new());
        let handle = FilterHandle::from_config(registry, None);
        let event = EventData::default();
        assert!(!handle.filter(&event, &webhook()).unwrap());
    }

    #[test]
    fn test_absent_transformer_yields_null() {
        let registry = Arc::new(HandlerRegistry::new());
        let handle = TransformerHandle::from_config(registry, None);
        let event = EventData::default();
        assert_eq!(handle.transform(&event, &webhook()).unwrap(), Value::Null);
    }

    #[test]
    fn test_inline_transformer() {
        let handle = TransformerHandle::inline(Arc::new(
            |event: &EventData, _: &WebhookRegistration| {
                event.parts().first().cloned().unwrap_or(Value::Null)
            },
        ));
        let event = EventData::new(vec![json!({"id": 42})]);
        assert_eq!(
            handle.transform(&event, &webhook()).unwrap(),
            json!({"id": 42})
        );
    }

    #[test]
    fn test_filter_invocation_failure_propagates() {
        struct Failing;
        impl EventFilter for Failing {
            fn filter(
                &self,
                _: &EventData,
                _: &WebhookRegistration,
            ) -> anyhow::Result<bool> {
                anyhow::bail!("backing store unavailable")
            }
        }

        let handle = FilterHandle::inline(Arc::new(Failing));
        let event = EventData::default();
        let err = handle.filter(&event, &webhook()).unwrap_err();
        assert!(matches!(err, DispatchError::Handler(_)));
    }

    #[tokio::test]
    async fn test_absent_response_handler_is_noop() {
        let registry = Arc::new(HandlerRegistry::new());
        let handle = ResponseHandlerHandle::from_config(registry, None);
        let response = DeliveryResponse {
            status: 200,
            content_type: None,
            body: String::new(),
        };
        assert!(handle.handle(&webhook(), &response).await.is_ok());
    }
}
