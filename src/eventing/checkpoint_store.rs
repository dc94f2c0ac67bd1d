use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;

/// Per-projection record of the last event successfully processed (spec §3, "Projection
/// Checkpoint"). At most one per projection name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionCheckpoint {
    pub projection_name: String,
    pub last_event_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

/// Checkpoint store port (spec §6): `SavePosition`/`GetPosition`/`DeletePosition`, opaque to the
/// core beyond that contract.
#[async_trait]
pub trait CheckpointStorePort: Send + Sync {
    async fn save_position(&self, checkpoint: ProjectionCheckpoint) -> Result<(), AppError>;
    async fn get_position(&self, name: &str) -> Result<Option<ProjectionCheckpoint>, AppError>;
    async fn delete_position(&self, name: &str) -> Result<(), AppError>;
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    positions: Mutex<HashMap<String, ProjectionCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStorePort for InMemoryCheckpointStore {
    async fn save_position(&self, checkpoint: ProjectionCheckpoint) -> Result<(), AppError> {
        let mut positions = self
            .positions
            .lock()
            .map_err(|_| AppError::internal("checkpoint store mutex poisoned"))?;
        positions.insert(checkpoint.projection_name.clone(), checkpoint);
        Ok(())
    }

    async fn get_position(&self, name: &str) -> Result<Option<ProjectionCheckpoint>, AppError> {
        let positions = self
            .positions
            .lock()
            .map_err(|_| AppError::internal("checkpoint store mutex poisoned"))?;
        Ok(positions.get(name).cloned())
    }

    async fn delete_position(&self, name: &str) -> Result<(), AppError> {
        let mut positions = self
            .positions
            .lock()
            .map_err(|_| AppError::internal("checkpoint store mutex poisoned"))?;
        positions.remove(name);
        Ok(())
    }
}

diesel::table! {
    projection_checkpoints (projection_name) {
        #[max_length = 255]
        projection_name -> Varchar,
        last_event_id -> Uuid,
        updated_at -> Timestamptz,
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = projection_checkpoints)]
struct CheckpointRow {
    projection_name: String,
    last_event_id: Uuid,
    updated_at: DateTime<Utc>,
}

impl From<ProjectionCheckpoint> for CheckpointRow {
    fn from(c: ProjectionCheckpoint) -> Self {
        Self {
            projection_name: c.projection_name,
            last_event_id: c.last_event_id,
            updated_at: c.updated_at,
        }
    }
}

impl From<CheckpointRow> for ProjectionCheckpoint {
    fn from(r: CheckpointRow) -> Self {
        Self {
            projection_name: r.projection_name,
            last_event_id: r.last_event_id,
            updated_at: r.updated_at,
        }
    }
}

pub struct DieselCheckpointStore {
    pool: DbPool,
}

impl DieselCheckpointStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStorePort for DieselCheckpointStore {
    async fn save_position(&self, checkpoint: ProjectionCheckpoint) -> Result<(), AppError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), AppError> {
            let mut conn = pool.get()?;
            let row: CheckpointRow = checkpoint.into();
            diesel::insert_into(projection_checkpoints::table)
                .values(&row)
                .on_conflict(projection_checkpoints::projection_name)
                .do_update()
                .set(&row)
                .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::internal(format!("checkpoint store task join error: {e}")))?
    }

    async fn get_position(&self, name: &str) -> Result<Option<ProjectionCheckpoint>, AppError> {
        let pool = self.pool.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<ProjectionCheckpoint>, AppError> {
            let mut conn = pool.get()?;
            let row: Option<CheckpointRow> = projection_checkpoints::table
                .filter(projection_checkpoints::projection_name.eq(&name))
                .first(&mut conn)
                .optional()?;
            Ok(row.map(Into::into))
        })
        .await
        .map_err(|e| AppError::internal(format!("checkpoint store task join error: {e}")))?
    }

    async fn delete_position(&self, name: &str) -> Result<(), AppError> {
        let pool = self.pool.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), AppError> {
            let mut conn = pool.get()?;
            diesel::delete(
                projection_checkpoints::table
                    .filter(projection_checkpoints::projection_name.eq(&name)),
            )
            .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::internal(format!("checkpoint store task join error: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let store = InMemoryCheckpointStore::new();
        let checkpoint = ProjectionCheckpoint {
            projection_name: "graph_stats".to_string(),
            last_event_id: Uuid::new_v4(),
            updated_at: Utc::now(),
        };
        store.save_position(checkpoint.clone()).await.unwrap();

        let loaded = store.get_position("graph_stats").await.unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[tokio::test]
    async fn delete_clears_the_position() {
        let store = InMemoryCheckpointStore::new();
        let checkpoint = ProjectionCheckpoint {
            projection_name: "graph_stats".to_string(),
            last_event_id: Uuid::new_v4(),
            updated_at: Utc::now(),
        };
        store.save_position(checkpoint).await.unwrap();
        store.delete_position("graph_stats").await.unwrap();
        assert!(store.get_position("graph_stats").await.unwrap().is_none());
    }
}
