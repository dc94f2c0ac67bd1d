use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;

/// Status transitions are monotonic: `pending -> running -> {completed, failed}`. Terminal
/// states are final, but replaying the same completion event twice is a no-op rather than an
/// error (spec §4.8: "last-write-wins is acceptable because event payloads are themselves
/// idempotent summaries").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl OperationStatus {
    fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_id: Uuid,
    pub status: OperationStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub metadata: JsonValue,
}

impl OperationRecord {
    pub fn pending(operation_id: Uuid, metadata: JsonValue) -> Self {
        Self {
            operation_id,
            status: OperationStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
            metadata,
        }
    }

    /// Applies a state transition in place, refusing to move a terminal record backwards.
    /// Called both by normal progress (`pending -> running`) and by the operation listener
    /// moving a record to a terminal state on event replay (idempotent: re-applying the same
    /// terminal status is accepted, not rejected).
    pub fn transition(&mut self, next: OperationStatus, result: Option<JsonValue>, error: Option<String>) {
        if self.status.is_terminal() {
            // Terminal states are final: neither a repeat of the same terminal status nor a
            // different one moves the record further (spec §4.8).
            return;
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
            self.result = result;
            self.error = error;
        }
    }
}

/// Operation store port (spec §4.8, §6): tracks long-running commands keyed by `operation_id`
/// with a per-record TTL. Opaque to the core beyond `store`/`update`/`get`/`delete`.
#[async_trait]
pub trait OperationStorePort: Send + Sync {
    async fn store(&self, record: OperationRecord, ttl: Duration) -> Result<(), AppError>;
    async fn update(&self, operation_id: Uuid, record: OperationRecord) -> Result<(), AppError>;
    async fn get(&self, operation_id: Uuid) -> Result<Option<OperationRecord>, AppError>;
    async fn delete(&self, operation_id: Uuid) -> Result<(), AppError>;
}

/// `not found` is used by the listener to decide whether to fall back from `update` to `store`
/// (spec §4.8): diesel's `Error::NotFound` doesn't apply to the in-memory adapter, so both
/// adapters raise this instead of overloading `AppError::NotFound` (which callers elsewhere
/// treat as a domain-level 404).
fn update_not_found(operation_id: Uuid) -> AppError {
    AppError::not_found(format!("operation {operation_id}"))
}

struct StoredRecord {
    record: OperationRecord,
    expires_at: DateTime<Utc>,
}

/// In-memory adapter backing tests and local development. Expiry is checked lazily on read
/// rather than by a background sweep, matching the spirit of
/// `cache/user_cache.rs`'s lazy-expiry TTL handling in this codebase.
#[derive(Default)]
pub struct InMemoryOperationStore {
    records: Mutex<HashMap<Uuid, StoredRecord>>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperationStorePort for InMemoryOperationStore {
    async fn store(&self, record: OperationRecord, ttl: Duration) -> Result<(), AppError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::internal("operation store mutex poisoned"))?;
        records.insert(record.operation_id, StoredRecord { record, expires_at });
        Ok(())
    }

    async fn update(&self, operation_id: Uuid, record: OperationRecord) -> Result<(), AppError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::internal("operation store mutex poisoned"))?;
        match records.get_mut(&operation_id) {
            Some(existing) if existing.expires_at > Utc::now() => {
                existing.record = record;
                Ok(())
            }
            _ => Err(update_not_found(operation_id)),
        }
    }

    async fn get(&self, operation_id: Uuid) -> Result<Option<OperationRecord>, AppError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::internal("operation store mutex poisoned"))?;
        if let Some(stored) = records.get(&operation_id) {
            if stored.expires_at <= Utc::now() {
                records.remove(&operation_id);
                return Ok(None);
            }
            return Ok(Some(stored.record.clone()));
        }
        Ok(None)
    }

    async fn delete(&self, operation_id: Uuid) -> Result<(), AppError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::internal("operation store mutex poisoned"))?;
        records.remove(&operation_id);
        Ok(())
    }
}

diesel::table! {
    operation_records (operation_id) {
        operation_id -> Uuid,
        #[max_length = 32]
        status -> Varchar,
        started_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
        result -> Nullable<Jsonb>,
        error -> Nullable<Text>,
        metadata -> Jsonb,
        expires_at -> Timestamptz,
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = operation_records)]
struct OperationRow {
    operation_id: Uuid,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<JsonValue>,
    error: Option<String>,
    metadata: JsonValue,
    expires_at: DateTime<Utc>,
}

fn status_to_str(status: OperationStatus) -> &'static str {
    match status {
        OperationStatus::Pending => "pending",
        OperationStatus::Running => "running",
        OperationStatus::Completed => "completed",
        OperationStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> OperationStatus {
    match s {
        "running" => OperationStatus::Running,
        "completed" => OperationStatus::Completed,
        "failed" => OperationStatus::Failed,
        _ => OperationStatus::Pending,
    }
}

impl OperationRow {
    fn from_record(record: OperationRecord, expires_at: DateTime<Utc>) -> Self {
        Self {
            operation_id: record.operation_id,
            status: status_to_str(record.status).to_string(),
            started_at: record.started_at,
            completed_at: record.completed_at,
            result: record.result,
            error: record.error,
            metadata: record.metadata,
            expires_at,
        }
    }
}

impl From<OperationRow> for OperationRecord {
    fn from(r: OperationRow) -> Self {
        Self {
            operation_id: r.operation_id,
            status: status_from_str(&r.status),
            started_at: r.started_at,
            completed_at: r.completed_at,
            result: r.result,
            error: r.error,
            metadata: r.metadata,
        }
    }
}

/// Diesel/Postgres adapter. TTL is stored as an absolute `expires_at`; a row past that point is
/// treated as absent by `get` (no background reaper — same lazy-expiry approach as the
/// in-memory adapter, kept consistent across both so tests against either behave the same way).
pub struct DieselOperationStore {
    pool: DbPool,
}

impl DieselOperationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OperationStorePort for DieselOperationStore {
    async fn store(&self, record: OperationRecord, ttl: Duration) -> Result<(), AppError> {
        let pool = self.pool.clone();
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        tokio::task::spawn_blocking(move || -> Result<(), AppError> {
            let mut conn = pool.get()?;
            let row = OperationRow::from_record(record, expires_at);
            diesel::insert_into(operation_records::table)
                .values(&row)
                .on_conflict(operation_records::operation_id)
                .do_update()
                .set(&row)
                .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::internal(format!("operation store task join error: {e}")))?
    }

    async fn update(&self, operation_id: Uuid, record: OperationRecord) -> Result<(), AppError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), AppError> {
            let mut conn = pool.get()?;
            let existing: Option<OperationRow> = operation_records::table
                .filter(operation_records::operation_id.eq(operation_id))
                .filter(operation_records::expires_at.gt(Utc::now()))
                .first(&mut conn)
                .optional()?;
            let expires_at = match existing {
                Some(row) => row.expires_at,
                None => return Err(update_not_found(operation_id)),
            };
            let row = OperationRow::from_record(record, expires_at);
            diesel::update(operation_records::table.filter(operation_records::operation_id.eq(operation_id)))
                .set(&row)
                .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::internal(format!("operation store task join error: {e}")))?
    }

    async fn get(&self, operation_id: Uuid) -> Result<Option<OperationRecord>, AppError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<OperationRecord>, AppError> {
            let mut conn = pool.get()?;
            let row: Option<OperationRow> = operation_records::table
                .filter(operation_records::operation_id.eq(operation_id))
                .filter(operation_records::expires_at.gt(Utc::now()))
                .first(&mut conn)
                .optional()?;
            Ok(row.map(Into::into))
        })
        .await
        .map_err(|e| AppError::internal(format!("operation store task join error: {e}")))?
    }

    async fn delete(&self, operation_id: Uuid) -> Result<(), AppError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), AppError> {
            let mut conn = pool.get()?;
            diesel::delete(
                operation_records::table.filter(operation_records::operation_id.eq(operation_id)),
            )
            .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::internal(format!("operation store task join error: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let store = InMemoryOperationStore::new();
        let record = OperationRecord::pending(Uuid::new_v4(), serde_json::json!({"kind": "bulk_delete"}));
        let operation_id = record.operation_id;
        store.store(record, Duration::from_secs(60)).await.unwrap();

        let loaded = store.get(operation_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OperationStatus::Pending);
    }

    #[tokio::test]
    async fn update_on_missing_record_is_not_found() {
        let store = InMemoryOperationStore::new();
        let record = OperationRecord::pending(Uuid::new_v4(), serde_json::json!({}));
        let err = store.update(record.operation_id, record).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn transition_to_terminal_is_final_and_idempotent_under_replay() {
        let mut record = OperationRecord::pending(Uuid::new_v4(), serde_json::json!({}));
        record.transition(OperationStatus::Running, None, None);
        assert_eq!(record.status, OperationStatus::Running);

        record.transition(
            OperationStatus::Completed,
            Some(serde_json::json!({"deletedCount": 2})),
            None,
        );
        assert_eq!(record.status, OperationStatus::Completed);
        let first_completed_at = record.completed_at;

        // Replaying the same terminal transition is a no-op on the status, not an error.
        record.transition(
            OperationStatus::Completed,
            Some(serde_json::json!({"deletedCount": 2})),
            None,
        );
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.completed_at, first_completed_at);

        // Attempting to move a terminal record to a different terminal state is rejected.
        record.transition(OperationStatus::Failed, None, Some("late failure".to_string()));
        assert_eq!(record.status, OperationStatus::Completed);
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let store = InMemoryOperationStore::new();
        let record = OperationRecord::pending(Uuid::new_v4(), serde_json::json!({}));
        let operation_id = record.operation_id;
        store.store(record, Duration::from_secs(60)).await.unwrap();
        store.delete(operation_id).await.unwrap();
        assert!(store.get(operation_id).await.unwrap().is_none());
    }
}
