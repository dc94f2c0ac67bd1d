//! Command and query handlers for the demonstration graph domain (SPEC_FULL.md §2.1, §8): the
//! concrete `Command`/`Query` types the Mediator dispatches, wired to the event-sourced write
//! path (`domain::unit_of_work::execute_command`) and the read-model ports (`GraphStatsProjection`,
//! `OperationStorePort`).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event_store::EventStorePort;
use crate::domain::graph::Graph;
use crate::domain::graph_stats::{GraphStats, GraphStatsProjection};
use crate::domain::unit_of_work::execute_command;
use crate::error::AppError;
use crate::eventing::BridgedPublisher;
use crate::mediator::{Command, CommandHandler, Query, QueryHandler};
use crate::operations::{OperationRecord, OperationStorePort};

async fn load_graph(
    store: &dyn EventStorePort,
    graph_id: Uuid,
    user_id: Uuid,
) -> Result<Graph, AppError> {
    let events = store.load(graph_id).await?;
    if events.is_empty() {
        Ok(Graph::new(graph_id, user_id))
    } else {
        Ok(Graph::replay(graph_id, user_id, &events))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNode {
    pub user_id: Uuid,
    pub graph_id: Uuid,
    pub title: String,
}

impl Command for CreateNode {
    type Response = Uuid;
    const REQUEST_TYPE: &'static str = "CreateNode";

    fn validate(&self) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::validation("title must not be empty"));
        }
        Ok(())
    }
}

pub struct CreateNodeHandler {
    store: Arc<dyn EventStorePort>,
    publisher: Arc<BridgedPublisher>,
}

impl CreateNodeHandler {
    pub fn new(store: Arc<dyn EventStorePort>, publisher: Arc<BridgedPublisher>) -> Self {
        Self { store, publisher }
    }
}

#[async_trait]
impl CommandHandler<CreateNode> for CreateNodeHandler {
    async fn handle(&self, command: CreateNode) -> Result<Uuid, AppError> {
        let graph = load_graph(self.store.as_ref(), command.graph_id, command.user_id).await?;
        execute_command(self.store.as_ref(), &self.publisher, graph, |g| {
            Ok(g.create_node(command.title.clone()))
        })
        .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateNode {
    pub user_id: Uuid,
    pub graph_id: Uuid,
    pub node_id: Uuid,
    pub title: String,
}

impl Command for UpdateNode {
    type Response = ();
    const REQUEST_TYPE: &'static str = "UpdateNode";

    fn validate(&self) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::validation("title must not be empty"));
        }
        Ok(())
    }
}

pub struct UpdateNodeHandler {
    store: Arc<dyn EventStorePort>,
    publisher: Arc<BridgedPublisher>,
}

impl UpdateNodeHandler {
    pub fn new(store: Arc<dyn EventStorePort>, publisher: Arc<BridgedPublisher>) -> Self {
        Self { store, publisher }
    }
}

#[async_trait]
impl CommandHandler<UpdateNode> for UpdateNodeHandler {
    async fn handle(&self, command: UpdateNode) -> Result<(), AppError> {
        let graph = load_graph(self.store.as_ref(), command.graph_id, command.user_id).await?;
        execute_command(self.store.as_ref(), &self.publisher, graph, |g| {
            g.update_node(command.node_id, command.title.clone())
        })
        .await
    }
}

/// Returns the freshly-minted `BulkNodesDeleted` event's id so the caller can poll it through
/// `GetOperation` once the `OperationListener` projection has recorded it (spec §4.8, §8 scenario 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDeleteNodes {
    pub user_id: Uuid,
    pub graph_id: Uuid,
    pub node_ids: Vec<Uuid>,
}

impl Command for BulkDeleteNodes {
    type Response = Uuid;
    const REQUEST_TYPE: &'static str = "BulkDeleteNodes";

    fn validate(&self) -> Result<(), AppError> {
        if self.node_ids.is_empty() {
            return Err(AppError::validation("node_ids must not be empty"));
        }
        Ok(())
    }
}

pub struct BulkDeleteNodesHandler {
    store: Arc<dyn EventStorePort>,
    publisher: Arc<BridgedPublisher>,
}

impl BulkDeleteNodesHandler {
    pub fn new(store: Arc<dyn EventStorePort>, publisher: Arc<BridgedPublisher>) -> Self {
        Self { store, publisher }
    }
}

#[async_trait]
impl CommandHandler<BulkDeleteNodes> for BulkDeleteNodesHandler {
    async fn handle(&self, command: BulkDeleteNodes) -> Result<Uuid, AppError> {
        let graph = load_graph(self.store.as_ref(), command.graph_id, command.user_id).await?;
        execute_command(self.store.as_ref(), &self.publisher, graph, |g| {
            g.bulk_delete_nodes(command.node_ids.clone());
            g.peek_uncommitted_event_id()
                .ok_or_else(|| AppError::internal("bulk delete produced no event"))
        })
        .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetGraphStats {
    pub user_id: Uuid,
}

impl Query for GetGraphStats {
    type Response = GraphStats;
    const REQUEST_TYPE: &'static str = "GetGraphStats";
}

pub struct GetGraphStatsHandler {
    projection: Arc<GraphStatsProjection>,
}

impl GetGraphStatsHandler {
    pub fn new(projection: Arc<GraphStatsProjection>) -> Self {
        Self { projection }
    }
}

#[async_trait]
impl QueryHandler<GetGraphStats> for GetGraphStatsHandler {
    async fn handle(&self, query: GetGraphStats) -> Result<GraphStats, AppError> {
        Ok(self.projection.stats_for_user(query.user_id).await)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOperation {
    pub operation_id: Uuid,
}

impl Query for GetOperation {
    type Response = Option<OperationRecord>;
    const REQUEST_TYPE: &'static str = "GetOperation";
}

pub struct GetOperationHandler {
    store: Arc<dyn OperationStorePort>,
}

impl GetOperationHandler {
    pub fn new(store: Arc<dyn OperationStorePort>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl QueryHandler<GetOperation> for GetOperationHandler {
    async fn handle(&self, query: GetOperation) -> Result<Option<OperationRecord>, AppError> {
        self.store.get(query.operation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event_store::InMemoryEventStore;
    use crate::eventing::remote_publisher::InMemoryRemotePublisher;
    use crate::eventing::{LocalDispatcher, ProjectionRegistry};
    use crate::operations::InMemoryOperationStore;

    fn publisher(registry: Arc<ProjectionRegistry>) -> BridgedPublisher {
        let local = Arc::new(LocalDispatcher::new(registry));
        let remote = Arc::new(InMemoryRemotePublisher::new());
        BridgedPublisher::new(local, remote, "knowledge-graph.core".to_string())
    }

    #[tokio::test]
    async fn create_then_update_then_bulk_delete_round_trips_through_the_handlers() {
        let store: Arc<dyn EventStorePort> = Arc::new(InMemoryEventStore::new());
        let registry = Arc::new(ProjectionRegistry::new(None));
        let bus = Arc::new(publisher(registry.clone()));

        let user_id = Uuid::new_v4();
        let graph_id = Uuid::new_v4();

        let create_handler = CreateNodeHandler::new(store.clone(), bus.clone());
        let node_id = create_handler
            .handle(CreateNode {
                user_id,
                graph_id,
                title: "first".to_string(),
            })
            .await
            .unwrap();

        let update_handler = UpdateNodeHandler::new(store.clone(), bus.clone());
        update_handler
            .handle(UpdateNode {
                user_id,
                graph_id,
                node_id,
                title: "renamed".to_string(),
            })
            .await
            .unwrap();

        let delete_handler = BulkDeleteNodesHandler::new(store.clone(), bus.clone());
        let operation_id = delete_handler
            .handle(BulkDeleteNodes {
                user_id,
                graph_id,
                node_ids: vec![node_id],
            })
            .await
            .unwrap();

        assert_ne!(operation_id, Uuid::nil());

        let events = store.load(graph_id).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events.last().unwrap().event_type, "BulkNodesDeleted");
    }

    #[tokio::test]
    async fn get_graph_stats_reflects_registered_projection() {
        let projection = Arc::new(GraphStatsProjection::new());
        let registry = Arc::new(ProjectionRegistry::new(None));
        registry
            .register(&["NodeCreated", "NodeUpdated", "BulkNodesDeleted"], projection.clone())
            .await
            .unwrap();
        let bus = Arc::new(publisher(registry));

        let store: Arc<dyn EventStorePort> = Arc::new(InMemoryEventStore::new());
        let user_id = Uuid::new_v4();
        let graph_id = Uuid::new_v4();

        let create_handler = CreateNodeHandler::new(store.clone(), bus.clone());
        create_handler
            .handle(CreateNode {
                user_id,
                graph_id,
                title: "first".to_string(),
            })
            .await
            .unwrap();

        let stats_handler = GetGraphStatsHandler::new(projection);
        let stats = stats_handler
            .handle(GetGraphStats { user_id })
            .await
            .unwrap();
        assert_eq!(stats.node_count, 1);
    }

    #[tokio::test]
    async fn get_operation_returns_none_for_unknown_id() {
        let store: Arc<dyn OperationStorePort> = Arc::new(InMemoryOperationStore::new());
        let handler = GetOperationHandler::new(store);
        let result = handler
            .handle(GetOperation {
                operation_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn update_missing_node_surfaces_not_found_without_mutating_the_stream() {
        let store: Arc<dyn EventStorePort> = Arc::new(InMemoryEventStore::new());
        let registry = Arc::new(ProjectionRegistry::new(None));
        let bus = Arc::new(publisher(registry));

        let user_id = Uuid::new_v4();
        let graph_id = Uuid::new_v4();
        let handler = UpdateNodeHandler::new(store.clone(), bus);

        let err = handler
            .handle(UpdateNode {
                user_id,
                graph_id,
                node_id: Uuid::new_v4(),
                title: "x".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound { .. }));
        assert!(store.load(graph_id).await.unwrap().is_empty());
    }
}
