use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::DomainEvent;
use crate::domain::graph::BulkNodesDeleted;
use crate::error::AppError;
use crate::eventing::handler::EventHandler;
use crate::eventing::projection::Projection;

use super::store::{OperationRecord, OperationStatus, OperationStorePort};

const OPERATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Projection registered for long-running-command completion events (spec §4.8). `BulkDelete`
/// is the only completion event in this demonstration domain; a real system would register the
/// same listener for every command whose terminal status a client polls for.
///
/// On dispatch: builds an `OperationRecord` from the event (copying deleted/failed id lists,
/// first error message as summary), attempts `update`; on "not found" falls back to `store`.
/// Failures are logged, not retried here — the outer `ProjectionRegistry::dispatch` already
/// reports the failure upward to its caller.
///
/// This demonstration domain has no distinct per-command `operation_id` type separate from the
/// event stream, so the triggering `BulkNodesDeleted`'s `event_id` is used as the operation key:
/// it's generated fresh for each bulk-delete command execution, unlike `aggregate_id` (the
/// graph), which repeats across every command against the same graph.
pub struct OperationListener {
    store: Arc<dyn OperationStorePort>,
}

impl OperationListener {
    pub fn new(store: Arc<dyn OperationStorePort>) -> Self {
        Self { store }
    }

    fn record_from_event(event: &BulkNodesDeleted) -> OperationRecord {
        let status = if event.failed.is_empty() {
            OperationStatus::Completed
        } else if event.deleted.is_empty() {
            OperationStatus::Failed
        } else {
            OperationStatus::Completed
        };

        let mut record = OperationRecord::pending(
            event.event_id,
            serde_json::json!({
                "kind": "bulk_delete_nodes",
                "graphId": event.graph_id,
            }),
        );
        record.transition(
            OperationStatus::Running,
            None,
            None,
        );
        record.transition(
            status,
            Some(serde_json::json!({
                "deletedCount": event.deleted.len(),
                "failedCount": event.failed.len(),
                "deleted": event.deleted,
                "failed": event.failed,
            })),
            event.errors.first().cloned(),
        );
        record
    }
}

#[async_trait]
impl EventHandler for OperationListener {
    async fn handle(&self, event: &dyn DomainEvent) -> Result<(), AppError> {
        let bulk_delete = event
            .payload()
            .as_object()
            .cloned()
            .ok_or_else(|| AppError::internal("BulkNodesDeleted payload was not an object"))?;

        let operation_id = event.event_id();
        let deleted: Vec<uuid::Uuid> = serde_json::from_value(
            bulk_delete.get("deleted").cloned().unwrap_or_default(),
        )
        .map_err(|e| AppError::internal(format!("malformed BulkNodesDeleted payload: {e}")))?;
        let failed: Vec<uuid::Uuid> = serde_json::from_value(
            bulk_delete.get("failed").cloned().unwrap_or_default(),
        )
        .map_err(|e| AppError::internal(format!("malformed BulkNodesDeleted payload: {e}")))?;
        let errors: Vec<String> = serde_json::from_value(
            bulk_delete.get("errors").cloned().unwrap_or_default(),
        )
        .map_err(|e| AppError::internal(format!("malformed BulkNodesDeleted payload: {e}")))?;
        let graph_id: uuid::Uuid = serde_json::from_value(
            bulk_delete.get("graphId").cloned().unwrap_or_default(),
        )
        .map_err(|e| AppError::internal(format!("malformed BulkNodesDeleted payload: {e}")))?;

        let reconstructed = BulkNodesDeleted {
            event_id: event.event_id(),
            aggregate_id: event.aggregate_id(),
            user_id: event.user_id(),
            occurred_at: event.occurred_at(),
            version: event.version(),
            graph_id,
            deleted,
            failed,
            errors,
        };

        let record = Self::record_from_event(&reconstructed);

        match self.store.update(operation_id, record.clone()).await {
            Ok(()) => Ok(()),
            Err(AppError::NotFound { .. }) => {
                self.store.store(record, OPERATION_TTL).await
            }
            Err(err) => {
                warn!(operation_id = %operation_id, error = %err, "operation listener update failed");
                Err(err)
            }
        }
    }

    fn name(&self) -> &'static str {
        "operation_listener"
    }

    fn supported_types(&self) -> &'static [&'static str] {
        &["BulkNodesDeleted"]
    }

    fn priority(&self) -> i32 {
        50
    }
}

#[async_trait]
impl Projection for OperationListener {
    fn projection_name(&self) -> &'static str {
        "operation_listener"
    }

    async fn reset(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::store::InMemoryOperationStore;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_event(aggregate_id: Uuid, deleted: Vec<Uuid>, failed: Vec<Uuid>, errors: Vec<String>) -> BulkNodesDeleted {
        BulkNodesDeleted {
            event_id: Uuid::new_v4(),
            aggregate_id,
            user_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            version: 4,
            graph_id: aggregate_id,
            deleted,
            failed,
            errors,
        }
    }

    #[tokio::test]
    async fn first_dispatch_falls_back_to_store_on_not_found() {
        let store = Arc::new(InMemoryOperationStore::new());
        let listener = OperationListener::new(store.clone());

        let aggregate_id = Uuid::new_v4();
        let event = sample_event(aggregate_id, vec![Uuid::new_v4()], vec![], vec![]);
        listener.handle(&event).await.unwrap();

        let record = store.get(event.event_id).await.unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
    }

    #[tokio::test]
    async fn partial_failure_is_recorded_with_first_error_as_summary() {
        let store = Arc::new(InMemoryOperationStore::new());
        let listener = OperationListener::new(store.clone());

        let aggregate_id = Uuid::new_v4();
        let missing = Uuid::new_v4();
        let event = sample_event(
            aggregate_id,
            vec![Uuid::new_v4()],
            vec![missing],
            vec![format!("{missing} not found")],
        );
        listener.handle(&event).await.unwrap();

        let record = store.get(event.event_id).await.unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.error, Some(format!("{missing} not found")));
    }

    #[tokio::test]
    async fn replay_of_the_same_completion_event_is_idempotent() {
        let store = Arc::new(InMemoryOperationStore::new());
        let listener = OperationListener::new(store.clone());

        let aggregate_id = Uuid::new_v4();
        let event = sample_event(aggregate_id, vec![Uuid::new_v4()], vec![], vec![]);
        listener.handle(&event).await.unwrap();
        listener.handle(&event).await.unwrap();

        let record = store.get(event.event_id).await.unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
    }
}
