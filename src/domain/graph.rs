//! Demonstration domain (SPEC_FULL.md §2.1): a minimal graph of `Node`s owned by a `Graph`
//! aggregate, just enough to exercise the mediator/dispatcher/hub end to end. Grounded in the
//! shape of `services/issues_service.rs`'s static-method service struct, trimmed down.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::aggregate::Aggregate;
use super::event::DomainEvent;
use super::event_store::StoredEvent;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize)]
pub struct NodeCreated {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub user_id: Uuid,
    pub occurred_at: chrono::DateTime<Utc>,
    pub version: i64,
    pub node_id: Uuid,
    pub title: String,
}

impl DomainEvent for NodeCreated {
    fn event_id(&self) -> Uuid {
        self.event_id
    }
    fn aggregate_id(&self) -> Uuid {
        self.aggregate_id
    }
    fn user_id(&self) -> Uuid {
        self.user_id
    }
    fn event_type(&self) -> &'static str {
        "NodeCreated"
    }
    fn occurred_at(&self) -> chrono::DateTime<Utc> {
        self.occurred_at
    }
    fn version(&self) -> i64 {
        self.version
    }
    fn payload(&self) -> JsonValue {
        serde_json::json!({ "nodeId": self.node_id, "title": self.title })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeUpdated {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub user_id: Uuid,
    pub occurred_at: chrono::DateTime<Utc>,
    pub version: i64,
    pub node_id: Uuid,
    pub title: String,
}

impl DomainEvent for NodeUpdated {
    fn event_id(&self) -> Uuid {
        self.event_id
    }
    fn aggregate_id(&self) -> Uuid {
        self.aggregate_id
    }
    fn user_id(&self) -> Uuid {
        self.user_id
    }
    fn event_type(&self) -> &'static str {
        "NodeUpdated"
    }
    fn occurred_at(&self) -> chrono::DateTime<Utc> {
        self.occurred_at
    }
    fn version(&self) -> i64 {
        self.version
    }
    fn payload(&self) -> JsonValue {
        serde_json::json!({ "nodeId": self.node_id, "title": self.title })
    }
}

/// Carries `graph_id` (Open Question (a), SPEC_FULL.md §9): a bare id list isn't enough for
/// `GraphStatsProjection` to know which graph's node count to decrement.
#[derive(Debug, Clone, Serialize)]
pub struct BulkNodesDeleted {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub user_id: Uuid,
    pub occurred_at: chrono::DateTime<Utc>,
    pub version: i64,
    pub graph_id: Uuid,
    pub deleted: Vec<Uuid>,
    pub failed: Vec<Uuid>,
    pub errors: Vec<String>,
}

impl DomainEvent for BulkNodesDeleted {
    fn event_id(&self) -> Uuid {
        self.event_id
    }
    fn aggregate_id(&self) -> Uuid {
        self.aggregate_id
    }
    fn user_id(&self) -> Uuid {
        self.user_id
    }
    fn event_type(&self) -> &'static str {
        "BulkNodesDeleted"
    }
    fn occurred_at(&self) -> chrono::DateTime<Utc> {
        self.occurred_at
    }
    fn version(&self) -> i64 {
        self.version
    }
    fn payload(&self) -> JsonValue {
        serde_json::json!({
            "graphId": self.graph_id,
            "deleted": self.deleted,
            "failed": self.failed,
            "errors": self.errors,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: Uuid,
    pub title: String,
}

/// A user's graph of nodes. Commands mutate it in memory; `take_uncommitted` hands the produced
/// events to the unit of work for durable append + publish.
#[derive(Debug)]
pub struct Graph {
    id: Uuid,
    user_id: Uuid,
    version: i64,
    nodes: Vec<Node>,
    uncommitted: Vec<Box<dyn DomainEvent>>,
}

impl Graph {
    pub fn new(id: Uuid, user_id: Uuid) -> Self {
        Self {
            id,
            user_id,
            version: 0,
            nodes: Vec::new(),
            uncommitted: Vec::new(),
        }
    }

    pub fn load(id: Uuid, user_id: Uuid, version: i64, nodes: Vec<Node>) -> Self {
        Self {
            id,
            user_id,
            version,
            nodes,
            uncommitted: Vec::new(),
        }
    }

    /// Rehydrates a graph's current state from its full stored event stream (spec §4.11 "loads
    /// the aggregate (or starts a new one)"). Unknown event types are skipped rather than
    /// rejected, so a future event type this replay doesn't yet know about doesn't block loading.
    pub fn replay(id: Uuid, user_id: Uuid, events: &[StoredEvent]) -> Self {
        let mut nodes: Vec<Node> = Vec::new();
        let mut version = 0i64;

        for event in events {
            version = event.version;
            match event.event_type.as_str() {
                "NodeCreated" => {
                    let node_id = event.payload["nodeId"]
                        .as_str()
                        .and_then(|s| Uuid::parse_str(s).ok())
                        .unwrap_or_else(Uuid::new_v4);
                    let title = event.payload["title"].as_str().unwrap_or_default().to_string();
                    nodes.push(Node { id: node_id, title });
                }
                "NodeUpdated" => {
                    if let Some(node_id) = event.payload["nodeId"].as_str().and_then(|s| Uuid::parse_str(s).ok()) {
                        if let Some(node) = nodes.iter_mut().find(|n| n.id == node_id) {
                            node.title = event.payload["title"].as_str().unwrap_or_default().to_string();
                        }
                    }
                }
                "BulkNodesDeleted" => {
                    if let Some(deleted) = event.payload["deleted"].as_array() {
                        let deleted_ids: Vec<Uuid> = deleted
                            .iter()
                            .filter_map(|v| v.as_str().and_then(|s| Uuid::parse_str(s).ok()))
                            .collect();
                        nodes.retain(|n| !deleted_ids.contains(&n.id));
                    }
                }
                _ => {}
            }
        }

        Self::load(id, user_id, version, nodes)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn next_version(&self) -> i64 {
        self.version + self.uncommitted.len() as i64 + 1
    }

    pub fn create_node(&mut self, title: String) -> Uuid {
        let node_id = Uuid::new_v4();
        let event = NodeCreated {
            event_id: Uuid::new_v4(),
            aggregate_id: self.id,
            user_id: self.user_id,
            occurred_at: Utc::now(),
            version: self.next_version(),
            node_id,
            title: title.clone(),
        };
        self.nodes.push(Node {
            id: node_id,
            title,
        });
        self.uncommitted.push(Box::new(event));
        node_id
    }

    pub fn update_node(&mut self, node_id: Uuid, title: String) -> Result<(), AppError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| AppError::not_found(format!("node {node_id}")))?;
        node.title = title.clone();
        let event = NodeUpdated {
            event_id: Uuid::new_v4(),
            aggregate_id: self.id,
            user_id: self.user_id,
            occurred_at: Utc::now(),
            version: self.next_version(),
            node_id,
            title,
        };
        self.uncommitted.push(Box::new(event));
        Ok(())
    }

    /// Deletes as many of `node_ids` as exist; missing ids are reported in `failed`/`errors`
    /// rather than aborting the whole batch (spec §8 scenario 2).
    pub fn bulk_delete_nodes(&mut self, node_ids: Vec<Uuid>) {
        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        let mut errors = Vec::new();

        for node_id in node_ids {
            if let Some(pos) = self.nodes.iter().position(|n| n.id == node_id) {
                self.nodes.remove(pos);
                deleted.push(node_id);
            } else {
                failed.push(node_id);
                errors.push(format!("{node_id} not found"));
            }
        }

        let event = BulkNodesDeleted {
            event_id: Uuid::new_v4(),
            aggregate_id: self.id,
            user_id: self.user_id,
            occurred_at: Utc::now(),
            version: self.next_version(),
            graph_id: self.id,
            deleted,
            failed,
            errors,
        };
        self.uncommitted.push(Box::new(event));
    }

    /// Id of the most recently produced-but-not-yet-committed event, if any. Lets a command
    /// handler hand the caller a stable id (e.g. for `BulkDeleteNodes`, the operation id the
    /// `OperationListener` later keys its record on) without waiting for the unit of work to run.
    pub fn peek_uncommitted_event_id(&self) -> Option<Uuid> {
        self.uncommitted.last().map(|e| e.event_id())
    }
}

impl Aggregate for Graph {
    fn id(&self) -> Uuid {
        self.id
    }

    fn user_id(&self) -> Uuid {
        self.user_id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn take_uncommitted(&mut self) -> Vec<Box<dyn DomainEvent>> {
        self.version += self.uncommitted.len() as i64;
        std::mem::take(&mut self.uncommitted)
    }
}
