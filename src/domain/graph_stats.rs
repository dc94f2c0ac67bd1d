//! `GraphStatsProjection` (spec §4.3, §8 scenarios 1 and 5): a read-model projection over the
//! demonstration graph domain's own events, recomputed deterministically from the payload of
//! each event rather than from wall-clock time or any other non-replayable input, per the
//! projection contract in §4.3.
//!
//! Counts are keyed by `(user_id, graph_id)` rather than just `user_id` so that
//! `BulkNodesDeleted`'s `graph_id` (Open Question (a), SPEC_FULL.md §9) can decrement the right
//! graph's count; `stats_for_user` sums across every graph a user owns to answer the scenario's
//! `GetStats(U1)` query.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::event::DomainEvent;
use crate::error::AppError;
use crate::eventing::handler::EventHandler;
use crate::eventing::projection::Projection;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphStats {
    pub node_count: i64,
}

pub struct GraphStatsProjection {
    counts: RwLock<HashMap<(Uuid, Uuid), i64>>,
}

impl GraphStatsProjection {
    pub fn new() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
        }
    }

    pub async fn stats_for_user(&self, user_id: Uuid) -> GraphStats {
        let counts = self.counts.read().await;
        let total: i64 = counts
            .iter()
            .filter(|((u, _), _)| *u == user_id)
            .map(|(_, count)| *count)
            .sum();
        GraphStats {
            node_count: total.max(0),
        }
    }
}

impl Default for GraphStatsProjection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for GraphStatsProjection {
    async fn handle(&self, event: &dyn DomainEvent) -> Result<(), AppError> {
        match event.event_type() {
            "NodeCreated" => {
                let key = (event.user_id(), event.aggregate_id());
                *self.counts.write().await.entry(key).or_insert(0) += 1;
                Ok(())
            }
            "NodeUpdated" => Ok(()),
            "BulkNodesDeleted" => {
                let payload = event.payload();
                let graph_id: Uuid = payload
                    .get("graphId")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .ok_or_else(|| AppError::internal("BulkNodesDeleted payload missing graphId"))?;
                let deleted_count = payload
                    .get("deleted")
                    .and_then(|v| v.as_array())
                    .map(|a| a.len() as i64)
                    .unwrap_or(0);

                let key = (event.user_id(), graph_id);
                let mut counts = self.counts.write().await;
                let entry = counts.entry(key).or_insert(0);
                *entry -= deleted_count;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "graph_stats_projection"
    }

    fn supported_types(&self) -> &'static [&'static str] {
        &["NodeCreated", "NodeUpdated", "BulkNodesDeleted"]
    }

    fn priority(&self) -> i32 {
        10
    }
}

#[async_trait]
impl Projection for GraphStatsProjection {
    fn projection_name(&self) -> &'static str {
        "graph_stats_projection"
    }

    async fn reset(&self) -> Result<(), AppError> {
        self.counts.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{BulkNodesDeleted, NodeCreated};
    use chrono::Utc;

    fn node_created(user_id: Uuid, graph_id: Uuid) -> NodeCreated {
        NodeCreated {
            event_id: Uuid::new_v4(),
            aggregate_id: graph_id,
            user_id,
            occurred_at: Utc::now(),
            version: 1,
            node_id: Uuid::new_v4(),
            title: "note".to_string(),
        }
    }

    #[tokio::test]
    async fn node_created_increments_the_owning_users_count() {
        let projection = GraphStatsProjection::new();
        let user_id = Uuid::new_v4();
        let graph_id = Uuid::new_v4();

        projection.handle(&node_created(user_id, graph_id)).await.unwrap();

        assert_eq!(projection.stats_for_user(user_id).await.node_count, 1);
    }

    #[tokio::test]
    async fn bulk_delete_decrements_by_the_deleted_count_for_its_graph() {
        let projection = GraphStatsProjection::new();
        let user_id = Uuid::new_v4();
        let graph_id = Uuid::new_v4();

        for _ in 0..3 {
            projection.handle(&node_created(user_id, graph_id)).await.unwrap();
        }

        let delete_event = BulkNodesDeleted {
            event_id: Uuid::new_v4(),
            aggregate_id: graph_id,
            user_id,
            occurred_at: Utc::now(),
            version: 4,
            graph_id,
            deleted: vec![Uuid::new_v4(), Uuid::new_v4()],
            failed: vec![],
            errors: vec![],
        };
        projection.handle(&delete_event).await.unwrap();

        assert_eq!(projection.stats_for_user(user_id).await.node_count, 1);
    }

    #[tokio::test]
    async fn reset_then_replay_reaches_the_same_stats_as_before_reset() {
        let projection = GraphStatsProjection::new();
        let user_id = Uuid::new_v4();
        let graph_id = Uuid::new_v4();

        let events: Vec<NodeCreated> = (0..5).map(|_| node_created(user_id, graph_id)).collect();
        for event in &events {
            projection.handle(event).await.unwrap();
        }
        let before_reset = projection.stats_for_user(user_id).await;

        projection.reset().await.unwrap();
        assert_eq!(projection.stats_for_user(user_id).await.node_count, 0);

        for event in &events {
            projection.handle(event).await.unwrap();
        }
        let after_replay = projection.stats_for_user(user_id).await;

        assert_eq!(before_reset, after_replay);
    }

    #[tokio::test]
    async fn prefix_plus_suffix_replay_matches_full_replay() {
        let projection_full = GraphStatsProjection::new();
        let projection_split = GraphStatsProjection::new();
        let user_id = Uuid::new_v4();
        let graph_id = Uuid::new_v4();
        let events: Vec<NodeCreated> = (0..6).map(|_| node_created(user_id, graph_id)).collect();

        for event in &events {
            projection_full.handle(event).await.unwrap();
        }

        let (prefix, suffix) = events.split_at(2);
        for event in prefix {
            projection_split.handle(event).await.unwrap();
        }
        for event in suffix {
            projection_split.handle(event).await.unwrap();
        }

        assert_eq!(
            projection_full.stats_for_user(user_id).await,
            projection_split.stats_for_user(user_id).await
        );
    }
}
