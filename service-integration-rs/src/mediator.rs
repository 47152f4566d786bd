//! Request mediator
//!
//! Routes JSON requests to handlers registered under a logical type such as
//! `workflow.AGENT_TASK_EXECUTION` or `event.service_registered`.
//!
//! `send` is point-to-point and serialised per type. `broadcast` fans out to
//! every handler sharing the event's prefix (up to and including the first
//! `.`), concurrently, and reports each handler's outcome separately.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::error::{IntegrationError, Result};
use crate::util::measure_time_async;

/// Handler for one logical request type
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Value) -> Result<Value>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn handle(&self, request: Value) -> Result<Value> {
        (self.0)(request).await
    }
}

/// Adapt an async closure into a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Result of one handler during a broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum BroadcastOutcome {
    Success { result: Value },
    Failure { error: String },
}

impl BroadcastOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BroadcastOutcome::Success { .. })
    }
}

#[derive(Clone)]
struct Registration {
    handler: Arc<dyn RequestHandler>,
    /// Serialises `send` calls of this type
    lock: Arc<AsyncMutex<()>>,
}

/// Broadcast routing key: everything up to and including the first `.`
fn routing_prefix(event_type: &str) -> &str {
    match event_type.find('.') {
        Some(idx) => &event_type[..=idx],
        None => event_type,
    }
}

#[derive(Default)]
pub struct RequestMediator {
    handlers: RwLock<HashMap<String, Registration>>,
}

impl RequestMediator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `request_type`, replacing any previous one
    pub fn register_handler(&self, request_type: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        let request_type = request_type.into();
        let mut handlers = self.write();

        match handlers.get_mut(&request_type) {
            Some(existing) => {
                warn!(request_type = %request_type, "Replacing existing handler");
                // Keep the lock so in-flight sends stay serialised with new ones
                existing.handler = handler;
            }
            None => {
                debug!(request_type = %request_type, "Handler registered");
                handlers.insert(
                    request_type,
                    Registration {
                        handler,
                        lock: Arc::new(AsyncMutex::new(())),
                    },
                );
            }
        }
    }

    /// Remove the handler for `request_type`. Returns whether one existed.
    pub fn unregister_handler(&self, request_type: &str) -> bool {
        let removed = self.write().remove(request_type).is_some();
        if removed {
            debug!(request_type = %request_type, "Handler unregistered");
        }
        removed
    }

    pub fn has_handler(&self, request_type: &str) -> bool {
        self.read().contains_key(request_type)
    }

    /// Registered request types, sorted
    pub fn handler_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Dispatch to the handler registered for exactly `request_type`.
    /// Handler errors are returned to the caller unchanged.
    pub async fn send(&self, request_type: &str, request: Value) -> Result<Value> {
        let registration = self
            .read()
            .get(request_type)
            .cloned()
            .ok_or_else(|| IntegrationError::UnknownRequestType(request_type.to_string()))?;

        let _serialised = registration.lock.lock().await;
        let (result, elapsed) = measure_time_async(|| registration.handler.handle(request)).await;

        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::increment_counter!(
            "integration_mediator_requests_total",
            "request_type" => request_type.to_string(),
            "outcome" => outcome
        );

        match &result {
            Ok(_) => info!(
                request_type = %request_type,
                elapsed_ms = elapsed.as_millis() as u64,
                "Request handled"
            ),
            Err(e) => warn!(
                request_type = %request_type,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "Request handler failed"
            ),
        }
        result
    }

    /// Deliver `event` to every handler sharing its routing prefix.
    /// Never fails; each handler's outcome is reported under its key.
    pub async fn broadcast(&self, event_type: &str, event: Value) -> HashMap<String, BroadcastOutcome> {
        let prefix = routing_prefix(event_type);
        let targets: Vec<(String, Arc<dyn RequestHandler>)> = self
            .read()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, registration)| (key.clone(), Arc::clone(&registration.handler)))
            .collect();

        if targets.is_empty() {
            debug!(event_type = %event_type, "Broadcast had no subscribers");
            return HashMap::new();
        }

        let deliveries = targets.into_iter().map(|(key, handler)| {
            let event = event.clone();
            async move {
                let outcome = match handler.handle(event).await {
                    Ok(result) => BroadcastOutcome::Success { result },
                    Err(e) => {
                        warn!(event_type = %event_type, handler = %key, error = %e, "Event handler failed");
                        BroadcastOutcome::Failure { error: e.to_string() }
                    }
                };
                metrics::increment_counter!(
                    "integration_mediator_requests_total",
                    "request_type" => key.clone(),
                    "outcome" => if outcome.is_success() { "success" } else { "failure" }
                );
                (key, outcome)
            }
        });

        let outcomes: HashMap<String, BroadcastOutcome> = join_all(deliveries).await.into_iter().collect();
        debug!(event_type = %event_type, handlers = outcomes.len(), "Broadcast delivered");
        outcomes
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Registration>> {
        self.handlers.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Registration>> {
        self.handlers.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn echo() -> Arc<dyn RequestHandler> {
        handler_fn(|request: Value| async move { Ok(json!({ "echo": request })) })
    }

    #[tokio::test]
    async fn test_send_routes_by_exact_type() {
        let mediator = RequestMediator::new();
        mediator.register_handler("workflow.ECHO", echo());

        let response = mediator.send("workflow.ECHO", json!({"n": 1})).await.unwrap();
        assert_eq!(response["echo"]["n"], 1);

        let err = mediator.send("workflow.ECH", json!({})).await.unwrap_err();
        assert!(matches!(err, IntegrationError::UnknownRequestType(t) if t == "workflow.ECH"));
    }

    #[tokio::test]
    async fn test_send_surfaces_handler_error() {
        let mediator = RequestMediator::new();
        mediator.register_handler(
            "workflow.BROKEN",
            handler_fn(|_| async { Err(IntegrationError::workflow("boom")) }),
        );

        let err = mediator.send("workflow.BROKEN", Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_send_serialises_same_type() {
        let mediator = Arc::new(RequestMediator::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let (a, m) = (Arc::clone(&active), Arc::clone(&max_seen));
        mediator.register_handler(
            "workflow.SLOW",
            handler_fn(move |_| {
                let (active, max_seen) = (Arc::clone(&a), Arc::clone(&m));
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            }),
        );

        let calls: Vec<_> = (0..3)
            .map(|_| {
                let mediator = Arc::clone(&mediator);
                tokio::spawn(async move { mediator.send("workflow.SLOW", Value::Null).await })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_broadcast_collects_every_outcome() {
        let mediator = RequestMediator::new();
        mediator.register_handler("event.audit", echo());
        mediator.register_handler(
            "event.flaky",
            handler_fn(|_| async { Err(IntegrationError::discovery("store down")) }),
        );
        mediator.register_handler("workflow.ECHO", echo());

        let outcomes = mediator.broadcast("event.x", json!({"id": "svc-1"})).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes["event.audit"].is_success());
        assert!(matches!(
            &outcomes["event.flaky"],
            BroadcastOutcome::Failure { error } if error.contains("store down")
        ));
    }

    #[tokio::test]
    async fn test_register_replace_and_unregister() {
        let mediator = RequestMediator::new();
        mediator.register_handler("workflow.A", echo());
        mediator.register_handler("workflow.A", handler_fn(|_| async { Ok(json!("replaced")) }));
        assert_eq!(mediator.handler_types(), vec!["workflow.A".to_string()]);
        assert_eq!(mediator.send("workflow.A", Value::Null).await.unwrap(), json!("replaced"));

        assert!(mediator.unregister_handler("workflow.A"));
        assert!(!mediator.has_handler("workflow.A"));
        assert!(mediator.broadcast("workflow.A", Value::Null).await.is_empty());
    }

    #[test]
    fn test_routing_prefix() {
        assert_eq!(routing_prefix("event.service_registered"), "event.");
        assert_eq!(routing_prefix("a.b.c"), "a.");
        assert_eq!(routing_prefix("ping"), "ping");
    }
}
