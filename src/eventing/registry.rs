use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{error, warn};

use crate::domain::DomainEvent;
use crate::error::AppError;

use super::handler::EventHandler;

const WILDCARD: &str = "*";
pub(crate) const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Priority-ordered handler registry (spec §4.2). Readers copy the handler slice under a short
/// read lock and release it before invoking handlers, so handler execution never holds the lock
/// (spec §5 shared-resource policy).
///
/// Grounded on the *shape* of `websocket/events/handlers.rs`'s `HandlerRegistry` (same name,
/// `RwLock`-guarded table) and `websocket/events/middleware.rs`'s `MiddlewareChain::add`
/// (insert-then-sort-by-priority); the teacher's `find_handlers` stub (hardcoded return value)
/// is not reused — this is a real per-event-type dispatch.
pub struct HandlerRegistry {
    tables: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    handler_timeout: Duration,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    /// Same as `new`, but with the process-wide per-handler deadline set from
    /// `EventingConfig.handler_timeout` (spec §6 `handler.timeout`) instead of the hardcoded
    /// default.
    pub fn with_handler_timeout(handler_timeout: Duration) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            handler_timeout,
        }
    }

    /// Appends `handler` to each listed type's table and re-sorts by priority ascending.
    /// Rejects if the handler does not advertise every listed type (or the wildcard).
    pub async fn register(
        &self,
        event_types: &[&str],
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), AppError> {
        for event_type in event_types {
            if !handler.supports(event_type) {
                return Err(AppError::validation(format!(
                    "handler '{}' does not advertise event type '{}'",
                    handler.name(),
                    event_type
                )));
            }
        }

        let mut tables = self.tables.write().await;
        for event_type in event_types {
            let list = tables.entry(event_type.to_string()).or_default();
            list.push(handler.clone());
            list.sort_by_key(|h| h.priority());
        }
        Ok(())
    }

    /// Removes `handler` from each listed type's table by identity (`Arc::ptr_eq`).
    pub async fn unregister(&self, event_types: &[&str], handler: &Arc<dyn EventHandler>) {
        let mut tables = self.tables.write().await;
        for event_type in event_types {
            if let Some(list) = tables.get_mut(*event_type) {
                list.retain(|h| !Arc::ptr_eq(h, handler));
            }
        }
    }

    /// Snapshot of the handlers that would receive `event_type`: its own table merged with the
    /// wildcard table, sorted by priority (ties keep the order handlers were pushed in, which is
    /// registration order — `sort_by_key` is stable).
    pub(crate) async fn snapshot(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        let tables = self.tables.read().await;
        let mut handlers: Vec<Arc<dyn EventHandler>> = Vec::new();
        if let Some(list) = tables.get(event_type) {
            handlers.extend(list.iter().cloned());
        }
        if event_type != WILDCARD {
            if let Some(list) = tables.get(WILDCARD) {
                handlers.extend(list.iter().cloned());
            }
        }
        handlers.sort_by_key(|h| h.priority());
        handlers
    }

    /// Dispatches `event` to every handler registered for its type (plus wildcard handlers) in
    /// priority order, each under its own timeout. Success iff at least one handler succeeded or
    /// the list was empty; the last error is returned iff *all* handlers failed.
    pub async fn dispatch(&self, event: &dyn DomainEvent) -> Result<(), AppError> {
        let event_type = event.event_type();
        let handlers = self.snapshot(event_type).await;

        if handlers.is_empty() {
            return Ok(());
        }

        let mut successes = 0usize;
        let mut last_error: Option<AppError> = None;

        for handler in &handlers {
            let started = Instant::now();
            let outcome = tokio::time::timeout(self.handler_timeout, handler.handle(event)).await;
            let elapsed = started.elapsed();

            match outcome {
                Ok(Ok(())) => {
                    successes += 1;
                }
                Ok(Err(err)) => {
                    warn!(
                        handler = handler.name(),
                        event_type,
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %err,
                        "handler failed"
                    );
                    last_error = Some(AppError::HandlerFailure {
                        handler: handler.name().to_string(),
                        message: err.to_string(),
                    });
                }
                Err(_) => {
                    warn!(
                        handler = handler.name(),
                        event_type,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "handler timed out"
                    );
                    last_error = Some(AppError::Timeout {
                        operation: format!("handler:{}", handler.name()),
                        elapsed_ms: elapsed.as_millis() as u64,
                    });
                }
            }
        }

        if successes > 0 {
            return Ok(());
        }

        let error = last_error.unwrap_or_else(|| AppError::DispatchAggregateFailure {
            event_type: event_type.to_string(),
            message: "no handlers produced a result".to_string(),
        });
        error!(event_type, "all handlers for event type failed");
        Err(AppError::DispatchAggregateFailure {
            event_type: event_type.to_string(),
            message: error.to_string(),
        })
    }

    /// Dispatches events in order, collecting failures. Returns the last error (if any) along
    /// with how many of `events` failed.
    pub async fn dispatch_batch(
        &self,
        events: &[Box<dyn DomainEvent>],
    ) -> (usize, Option<AppError>) {
        let mut failures = 0usize;
        let mut last_error = None;
        for event in events {
            if let Err(err) = self.dispatch(event.as_ref()).await {
                failures += 1;
                last_error = Some(err);
            }
        }
        (failures, last_error)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;
    use uuid::Uuid;

    #[derive(Debug)]
    struct TestEvent {
        event_type: &'static str,
    }

    impl DomainEvent for TestEvent {
        fn event_id(&self) -> Uuid {
            Uuid::nil()
        }
        fn aggregate_id(&self) -> Uuid {
            Uuid::nil()
        }
        fn user_id(&self) -> Uuid {
            Uuid::nil()
        }
        fn event_type(&self) -> &'static str {
            self.event_type
        }
        fn occurred_at(&self) -> chrono::DateTime<Utc> {
            Utc::now()
        }
        fn version(&self) -> i64 {
            1
        }
        fn payload(&self) -> serde_json::Value {
            serde_json::json!({})
        }
    }

    struct RecordingHandler {
        name: &'static str,
        types: &'static [&'static str],
        priority: i32,
        fails: bool,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait::async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, _event: &dyn DomainEvent) -> Result<(), AppError> {
            self.calls.lock().unwrap().push(self.name);
            if self.fails {
                Err(AppError::internal("boom"))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn supported_types(&self) -> &'static [&'static str] {
            self.types
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    #[tokio::test]
    async fn dispatch_on_empty_handler_list_succeeds() {
        let registry = HandlerRegistry::new();
        let event = TestEvent { event_type: "x" };
        registry.dispatch(&event).await.unwrap();
    }

    #[tokio::test]
    async fn handlers_run_in_priority_order() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        registry
            .register(
                &["NodeCreated"],
                Arc::new(RecordingHandler {
                    name: "late",
                    types: &["NodeCreated"],
                    priority: 20,
                    fails: false,
                    calls: calls.clone(),
                }),
            )
            .await
            .unwrap();
        registry
            .register(
                &["NodeCreated"],
                Arc::new(RecordingHandler {
                    name: "early",
                    types: &["NodeCreated"],
                    priority: 5,
                    fails: false,
                    calls: calls.clone(),
                }),
            )
            .await
            .unwrap();

        let event = TestEvent {
            event_type: "NodeCreated",
        };
        registry.dispatch(&event).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["early", "late"]);
    }

    #[tokio::test]
    async fn one_failing_handler_does_not_block_others() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        registry
            .register(
                &["NodeCreated"],
                Arc::new(RecordingHandler {
                    name: "always_fails",
                    types: &["NodeCreated"],
                    priority: 1,
                    fails: true,
                    calls: calls.clone(),
                }),
            )
            .await
            .unwrap();
        registry
            .register(
                &["NodeCreated"],
                Arc::new(RecordingHandler {
                    name: "succeeds",
                    types: &["NodeCreated"],
                    priority: 2,
                    fails: false,
                    calls: calls.clone(),
                }),
            )
            .await
            .unwrap();

        let event = TestEvent {
            event_type: "NodeCreated",
        };
        registry.dispatch(&event).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["always_fails", "succeeds"]);
    }

    #[tokio::test]
    async fn all_handlers_failing_is_dispatch_aggregate_failure() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(
                &["NodeCreated"],
                Arc::new(RecordingHandler {
                    name: "fails",
                    types: &["NodeCreated"],
                    priority: 1,
                    fails: true,
                    calls: calls.clone(),
                }),
            )
            .await
            .unwrap();

        let event = TestEvent {
            event_type: "NodeCreated",
        };
        let err = registry.dispatch(&event).await.unwrap_err();
        assert!(matches!(err, AppError::DispatchAggregateFailure { .. }));
    }

    #[tokio::test]
    async fn wildcard_handler_matches_every_event() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(
                &["*"],
                Arc::new(RecordingHandler {
                    name: "global",
                    types: &["*"],
                    priority: 1,
                    fails: false,
                    calls: calls.clone(),
                }),
            )
            .await
            .unwrap();

        registry
            .dispatch(&TestEvent {
                event_type: "AnythingAtAll",
            })
            .await
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["global"]);
    }

    #[tokio::test]
    async fn register_rejects_handler_not_advertising_type() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let result = registry
            .register(
                &["NodeUpdated"],
                Arc::new(RecordingHandler {
                    name: "mismatched",
                    types: &["NodeCreated"],
                    priority: 1,
                    fails: false,
                    calls,
                }),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unregister_removes_by_identity() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<dyn EventHandler> = Arc::new(RecordingHandler {
            name: "h",
            types: &["NodeCreated"],
            priority: 1,
            fails: false,
            calls: calls.clone(),
        });
        registry
            .register(&["NodeCreated"], handler.clone())
            .await
            .unwrap();
        registry.unregister(&["NodeCreated"], &handler).await;

        registry
            .dispatch(&TestEvent {
                event_type: "NodeCreated",
            })
            .await
            .unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatch_batch_counts_failures_and_keeps_last_error() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(
                &["NodeCreated"],
                Arc::new(RecordingHandler {
                    name: "fails",
                    types: &["NodeCreated"],
                    priority: 1,
                    fails: true,
                    calls,
                }),
            )
            .await
            .unwrap();

        let events: Vec<Box<dyn DomainEvent>> = vec![
            Box::new(TestEvent {
                event_type: "NodeCreated",
            }),
            Box::new(TestEvent {
                event_type: "NodeCreated",
            }),
        ];
        let (failures, last_error) = registry.dispatch_batch(&events).await;
        assert_eq!(failures, 2);
        assert!(last_error.is_some());
    }

    struct SlowHandler;

    #[async_trait::async_trait]
    impl EventHandler for SlowHandler {
        async fn handle(&self, _event: &dyn DomainEvent) -> Result<(), AppError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "slow"
        }

        fn supported_types(&self) -> &'static [&'static str] {
            &["NodeCreated"]
        }
    }

    #[tokio::test]
    async fn configured_handler_timeout_is_enforced() {
        let registry = HandlerRegistry::with_handler_timeout(Duration::from_millis(5));
        registry
            .register(&["NodeCreated"], Arc::new(SlowHandler))
            .await
            .unwrap();

        let err = registry
            .dispatch(&TestEvent {
                event_type: "NodeCreated",
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::DispatchAggregateFailure { .. }));
    }
}
