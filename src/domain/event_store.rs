use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;

/// A durably-stored event, as returned by `EventStorePort::load`.
///
/// Unlike `Box<dyn DomainEvent>`, this is a plain data record: the store doesn't know how to
/// reconstruct the original Rust type, only the stable `event_type` tag and its JSON payload.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub user_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub version: i64,
    pub payload: JsonValue,
}

/// Event store port (spec §4.1): aggregate-level append with optimistic concurrency, ordered
/// load, and deletion for destroyed aggregates.
#[async_trait]
pub trait EventStorePort: Send + Sync {
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<StoredEvent>,
    ) -> Result<(), AppError>;

    async fn load(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, AppError>;

    async fn delete_events(&self, aggregate_id: Uuid) -> Result<(), AppError>;
}

/// In-memory adapter backing tests and local development.
#[derive(Default)]
pub struct InMemoryEventStore {
    streams: Mutex<HashMap<Uuid, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStorePort for InMemoryEventStore {
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<StoredEvent>,
    ) -> Result<(), AppError> {
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| AppError::internal("event store mutex poisoned"))?;
        let stream = streams.entry(aggregate_id).or_default();
        let current_version = stream.last().map(|e| e.version).unwrap_or(0);
        if current_version != expected_version {
            return Err(AppError::ConcurrencyConflict {
                aggregate_id: aggregate_id.to_string(),
                expected: expected_version,
                actual: current_version,
            });
        }
        stream.extend(events);
        Ok(())
    }

    async fn load(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, AppError> {
        let streams = self
            .streams
            .lock()
            .map_err(|_| AppError::internal("event store mutex poisoned"))?;
        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    async fn delete_events(&self, aggregate_id: Uuid) -> Result<(), AppError> {
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| AppError::internal("event store mutex poisoned"))?;
        streams.remove(&aggregate_id);
        Ok(())
    }
}

diesel::table! {
    domain_events (aggregate_id, version) {
        event_id -> Uuid,
        aggregate_id -> Uuid,
        user_id -> Uuid,
        #[max_length = 255]
        event_type -> Varchar,
        occurred_at -> Timestamptz,
        version -> Int8,
        payload -> Jsonb,
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = domain_events)]
struct DomainEventRow {
    event_id: Uuid,
    aggregate_id: Uuid,
    user_id: Uuid,
    event_type: String,
    occurred_at: DateTime<Utc>,
    version: i64,
    payload: JsonValue,
}

impl From<StoredEvent> for DomainEventRow {
    fn from(e: StoredEvent) -> Self {
        Self {
            event_id: e.event_id,
            aggregate_id: e.aggregate_id,
            user_id: e.user_id,
            event_type: e.event_type,
            occurred_at: e.occurred_at,
            version: e.version,
            payload: e.payload,
        }
    }
}

impl From<DomainEventRow> for StoredEvent {
    fn from(r: DomainEventRow) -> Self {
        Self {
            event_id: r.event_id,
            aggregate_id: r.aggregate_id,
            user_id: r.user_id,
            event_type: r.event_type,
            occurred_at: r.occurred_at,
            version: r.version,
            payload: r.payload,
        }
    }
}

/// Diesel/Postgres adapter. The unique `(aggregate_id, version)` primary key enforces the
/// concurrency check at the database layer in addition to the in-process optimistic check below.
pub struct DieselEventStore {
    pool: DbPool,
}

impl DieselEventStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStorePort for DieselEventStore {
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<StoredEvent>,
    ) -> Result<(), AppError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), AppError> {
            let mut conn = pool.get()?;
            conn.transaction(|conn| {
                let current_version: Option<i64> = domain_events::table
                    .filter(domain_events::aggregate_id.eq(aggregate_id))
                    .select(domain_events::version)
                    .order(domain_events::version.desc())
                    .first(conn)
                    .optional()?;
                let current_version = current_version.unwrap_or(0);
                if current_version != expected_version {
                    return Err(diesel::result::Error::RollbackTransaction);
                }
                let rows: Vec<DomainEventRow> = events.into_iter().map(Into::into).collect();
                diesel::insert_into(domain_events::table)
                    .values(&rows)
                    .execute(conn)?;
                Ok(())
            })
            .map_err(|e| match e {
                diesel::result::Error::RollbackTransaction => AppError::ConcurrencyConflict {
                    aggregate_id: aggregate_id.to_string(),
                    expected: expected_version,
                    actual: expected_version, // actual looked up inside the closure, not surfaced out
                },
                other => AppError::Database(other),
            })
        })
        .await
        .map_err(|e| AppError::internal(format!("event store task join error: {e}")))?
    }

    async fn load(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, AppError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<StoredEvent>, AppError> {
            let mut conn = pool.get()?;
            let rows: Vec<DomainEventRow> = domain_events::table
                .filter(domain_events::aggregate_id.eq(aggregate_id))
                .order(domain_events::version.asc())
                .load(&mut conn)?;
            Ok(rows.into_iter().map(Into::into).collect())
        })
        .await
        .map_err(|e| AppError::internal(format!("event store task join error: {e}")))?
    }

    async fn delete_events(&self, aggregate_id: Uuid) -> Result<(), AppError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), AppError> {
            let mut conn = pool.get()?;
            diesel::delete(domain_events::table.filter(domain_events::aggregate_id.eq(aggregate_id)))
                .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::internal(format!("event store task join error: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(aggregate_id: Uuid, version: i64) -> StoredEvent {
        StoredEvent {
            event_id: Uuid::new_v4(),
            aggregate_id,
            user_id: Uuid::new_v4(),
            event_type: "test.event".to_string(),
            occurred_at: Utc::now(),
            version,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn appends_in_version_order_and_loads_back() {
        let store = InMemoryEventStore::new();
        let aggregate_id = Uuid::new_v4();

        store
            .append(aggregate_id, 0, vec![sample(aggregate_id, 1)])
            .await
            .unwrap();
        store
            .append(aggregate_id, 1, vec![sample(aggregate_id, 2)])
            .await
            .unwrap();

        let loaded = store.load(aggregate_id).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].version, 1);
        assert_eq!(loaded[1].version, 2);
    }

    #[tokio::test]
    async fn stale_expected_version_is_concurrency_conflict() {
        let store = InMemoryEventStore::new();
        let aggregate_id = Uuid::new_v4();

        store
            .append(aggregate_id, 0, vec![sample(aggregate_id, 1)])
            .await
            .unwrap();

        let err = store
            .append(aggregate_id, 0, vec![sample(aggregate_id, 2)])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ConcurrencyConflict { .. }));
    }

    #[tokio::test]
    async fn delete_events_clears_the_stream() {
        let store = InMemoryEventStore::new();
        let aggregate_id = Uuid::new_v4();
        store
            .append(aggregate_id, 0, vec![sample(aggregate_id, 1)])
            .await
            .unwrap();

        store.delete_events(aggregate_id).await.unwrap();

        assert!(store.load(aggregate_id).await.unwrap().is_empty());
    }
}
