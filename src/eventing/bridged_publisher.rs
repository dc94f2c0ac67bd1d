use std::sync::Arc;

use crate::domain::DomainEvent;
use crate::domain::event::EventEnvelope;
use crate::error::AppError;

use super::local_dispatcher::LocalDispatcher;
use super::remote_publisher::RemotePublisherPort;

/// Combines the Local Dispatcher and Remote Publisher (spec §4.6): best-effort local dispatch
/// followed by durable, authoritative remote publish in one call.
///
/// **Invariant.** Local dispatch happens exactly once per `publish` call per event; remote
/// dispatch happens exactly once per event per successful call. Retries live inside the remote
/// publisher, not here.
pub struct BridgedPublisher {
    local: Arc<LocalDispatcher>,
    remote: Arc<dyn RemotePublisherPort>,
    source: String,
}

impl BridgedPublisher {
    pub fn new(local: Arc<LocalDispatcher>, remote: Arc<dyn RemotePublisherPort>, source: String) -> Self {
        Self {
            local,
            remote,
            source,
        }
    }

    /// 1. Serializes each event to wire form. 2. Runs local dispatch (best-effort; failures
    /// never reach the caller). 3. Runs remote publish (authoritative; failure here is returned
    /// to the caller so the command can fail atomically with storage rollback).
    pub async fn publish(&self, events: &[Box<dyn DomainEvent>]) -> Result<(), AppError> {
        let envelopes: Vec<EventEnvelope> = events
            .iter()
            .map(|event| EventEnvelope::from_event(event.as_ref(), self.source.clone()))
            .collect();

        self.local.dispatch_batch_local(events).await;

        self.remote.publish_batch(envelopes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventing::projection::ProjectionRegistry;
    use crate::eventing::remote_publisher::InMemoryRemotePublisher;
    use chrono::Utc;
    use serde_json::Value as JsonValue;
    use uuid::Uuid;

    #[derive(Debug)]
    struct TestEvent {
        event_id: Uuid,
    }
    impl DomainEvent for TestEvent {
        fn event_id(&self) -> Uuid {
            self.event_id
        }
        fn aggregate_id(&self) -> Uuid {
            Uuid::nil()
        }
        fn user_id(&self) -> Uuid {
            Uuid::nil()
        }
        fn event_type(&self) -> &'static str {
            "NodeCreated"
        }
        fn occurred_at(&self) -> chrono::DateTime<Utc> {
            Utc::now()
        }
        fn version(&self) -> i64 {
            1
        }
        fn payload(&self) -> JsonValue {
            serde_json::json!({})
        }
    }

    #[tokio::test]
    async fn publish_runs_local_then_remote_and_succeeds() {
        let registry = Arc::new(ProjectionRegistry::new(None));
        let local = Arc::new(LocalDispatcher::new(registry));
        let remote = Arc::new(InMemoryRemotePublisher::new());
        let publisher = BridgedPublisher::new(local, remote.clone(), "knowledge-graph.core".to_string());

        let events: Vec<Box<dyn DomainEvent>> = vec![Box::new(TestEvent {
            event_id: Uuid::new_v4(),
        })];
        publisher.publish(&events).await.unwrap();

        let batches = remote.published_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].detail_type, "NodeCreated");
    }

    #[tokio::test]
    async fn remote_publish_failure_propagates_to_caller() {
        let registry = Arc::new(ProjectionRegistry::new(None));
        let local = Arc::new(LocalDispatcher::new(registry));
        let remote = Arc::new(InMemoryRemotePublisher::new());
        remote.fail_next_n_attempts(1);
        let publisher = BridgedPublisher::new(local, remote, "knowledge-graph.core".to_string());

        let events: Vec<Box<dyn DomainEvent>> = vec![Box::new(TestEvent {
            event_id: Uuid::new_v4(),
        })];
        let result = publisher.publish(&events).await;
        assert!(result.is_err());
    }
}
