pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod eventing;
pub mod handlers;
pub mod mediator;
pub mod middleware;
pub mod operations;
pub mod websocket;

use std::sync::Arc;

use crate::config::Config;
use crate::db::DbPool;
use crate::domain::event_store::{DieselEventStore, EventStorePort};
use crate::domain::graph_stats::GraphStatsProjection;
use crate::eventing::checkpoint_store::DieselCheckpointStore;
use crate::eventing::remote_publisher::HttpRemotePublisher;
use crate::eventing::{BridgedPublisher, LocalDispatcher, ProjectionRegistry};
use crate::handlers::{
    BulkDeleteNodesHandler, CreateNodeHandler, GetGraphStatsHandler, GetOperationHandler,
    UpdateNodeHandler,
};
use crate::mediator::behaviors::{
    LoggingBehavior, MetricsBehavior, PerformanceBehavior, ValidationBehavior,
};
use crate::mediator::Mediator;
use crate::middleware::auth::{AuthConfig, AuthService};
use crate::operations::{DieselOperationStore, OperationListener, OperationStorePort};
use crate::websocket::{Broadcaster, Hub};

/// Application state assembled once at startup: the event-sourced write path, the read-model
/// projections it feeds, the Hub that fans events out over WebSocket, and the Mediator the HTTP
/// surface dispatches through (SPEC_FULL.md §2, §4).
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub auth_service: Arc<AuthService>,
    pub event_store: Arc<dyn EventStorePort>,
    pub operation_store: Arc<dyn OperationStorePort>,
    pub graph_stats: Arc<GraphStatsProjection>,
    pub hub: Hub,
    pub mediator: Arc<Mediator>,
    pub create_node_handler: Arc<CreateNodeHandler>,
    pub update_node_handler: Arc<UpdateNodeHandler>,
    pub bulk_delete_handler: Arc<BulkDeleteNodesHandler>,
    pub graph_stats_handler: Arc<GetGraphStatsHandler>,
    pub operation_handler: Arc<GetOperationHandler>,
}

impl AppState {
    /// Wires every port named in SPEC_FULL.md §4 to its Diesel/HTTP adapter and registers the
    /// three projections (`GraphStatsProjection`, `OperationListener`, `Broadcaster`) against a
    /// single `ProjectionRegistry` so every event dispatched through the Bridged Publisher's
    /// local leg reaches all three.
    pub async fn new(db: DbPool, config: Config) -> Result<Self, crate::error::AppError> {
        let config = Arc::new(config);
        let eventing_config = config.eventing();

        let event_store: Arc<dyn EventStorePort> = Arc::new(DieselEventStore::new(db.clone()));
        let operation_store: Arc<dyn OperationStorePort> =
            Arc::new(DieselOperationStore::new(db.clone()));
        let checkpoint_store = Arc::new(DieselCheckpointStore::new(db.clone()));

        let registry = Arc::new(ProjectionRegistry::with_handler_timeout(
            Some(checkpoint_store),
            eventing_config.handler_timeout,
        ));

        let graph_stats = Arc::new(GraphStatsProjection::new());
        registry
            .register(
                &["NodeCreated", "NodeUpdated", "BulkNodesDeleted"],
                graph_stats.clone(),
            )
            .await?;

        let operation_listener = Arc::new(OperationListener::new(operation_store.clone()));
        registry
            .register(&["BulkNodesDeleted"], operation_listener)
            .await?;

        let hub = Hub::spawn(&eventing_config);
        let broadcaster = Arc::new(Broadcaster::new(hub.clone()));
        registry.register(&["*"], broadcaster).await?;

        let local = Arc::new(LocalDispatcher::new(registry));
        let remote = Arc::new(HttpRemotePublisher::new(
            eventing_config.publish_remote_endpoint.clone(),
            eventing_config.publish_batch_max,
            eventing_config.publish_retry_max,
            eventing_config.publish_backoff_initial,
        ));
        let publisher = Arc::new(BridgedPublisher::new(
            local,
            remote,
            eventing_config.publish_remote_source.clone(),
        ));

        let auth_service = Arc::new(AuthService::new(AuthConfig::default()));

        let mediator = Arc::new(Mediator::new(
            Arc::new(ValidationBehavior),
            Arc::new(LoggingBehavior),
            Arc::new(MetricsBehavior::new()),
            Arc::new(PerformanceBehavior::new(
                eventing_config.perf_command_threshold.as_millis() as u64,
                eventing_config.perf_query_threshold.as_millis() as u64,
            )),
        ));

        Ok(Self {
            db,
            config,
            auth_service,
            create_node_handler: Arc::new(CreateNodeHandler::new(
                event_store.clone(),
                publisher.clone(),
            )),
            update_node_handler: Arc::new(UpdateNodeHandler::new(
                event_store.clone(),
                publisher.clone(),
            )),
            bulk_delete_handler: Arc::new(BulkDeleteNodesHandler::new(
                event_store.clone(),
                publisher,
            )),
            graph_stats_handler: Arc::new(GetGraphStatsHandler::new(graph_stats.clone())),
            operation_handler: Arc::new(GetOperationHandler::new(operation_store.clone())),
            event_store,
            operation_store,
            graph_stats,
            hub,
            mediator,
        })
    }
}

pub fn init_tracing(config: &Config) {
    let level_filter = match config.log_level.as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    unsafe {
        std::env::set_var("RUST_LOG", level_filter);
    }

    match config.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt().json().init();
        }
        _ => {
            tracing_subscriber::fmt().init();
        }
    }
}
