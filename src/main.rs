use std::sync::Arc;

use axum::{
    extract::{Extension, Json, Path, State},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post, put},
    Router, Server,
};
use diesel::{
    r2d2::{self, ConnectionManager as DbConnectionManager},
    PgConnection,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use knowledge_graph_core::{
    config::Config,
    db::DbPool,
    error::{ApiResponse, AppError},
    handlers::{BulkDeleteNodes, CreateNode, GetGraphStats, GetOperation, UpdateNode},
    middleware::auth::{auth_middleware, Claims},
    middleware::logger::logger,
    websocket::{self, WebSocketRouteState},
    AppState,
};

#[derive(Deserialize)]
struct CreateNodeBody {
    title: String,
}

#[derive(Deserialize)]
struct UpdateNodeBody {
    title: String,
}

#[derive(Deserialize)]
struct BulkDeleteBody {
    node_ids: Vec<Uuid>,
}

async fn create_node(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(graph_id): Path<Uuid>,
    Json(body): Json<CreateNodeBody>,
) -> Result<impl IntoResponse, AppError> {
    let node_id = state
        .mediator
        .send(
            CreateNode {
                user_id: claims.sub,
                graph_id,
                title: body.title,
            },
            state.create_node_handler.clone(),
        )
        .await?;
    Ok(Json(ApiResponse::ok(node_id)))
}

async fn update_node(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path((graph_id, node_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateNodeBody>,
) -> Result<impl IntoResponse, AppError> {
    state
        .mediator
        .send(
            UpdateNode {
                user_id: claims.sub,
                graph_id,
                node_id,
                title: body.title,
            },
            state.update_node_handler.clone(),
        )
        .await?;
    Ok(Json(ApiResponse::ok(())))
}

async fn bulk_delete_nodes(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(graph_id): Path<Uuid>,
    Json(body): Json<BulkDeleteBody>,
) -> Result<impl IntoResponse, AppError> {
    let operation_id = state
        .mediator
        .send(
            BulkDeleteNodes {
                user_id: claims.sub,
                graph_id,
                node_ids: body.node_ids,
            },
            state.bulk_delete_handler.clone(),
        )
        .await?;
    Ok(Json(ApiResponse::ok(operation_id)))
}

async fn get_graph_stats(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let stats = state
        .mediator
        .query(
            GetGraphStats { user_id: claims.sub },
            state.graph_stats_handler.clone(),
        )
        .await?;
    Ok(Json(ApiResponse::ok(stats)))
}

async fn get_operation(
    State(state): State<Arc<AppState>>,
    Path(operation_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .mediator
        .query(GetOperation { operation_id }, state.operation_handler.clone())
        .await?;
    Ok(Json(ApiResponse::ok(record)))
}

fn protected_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/graphs/:graph_id/nodes", post(create_node))
        .route("/graphs/:graph_id/nodes/:node_id", put(update_node))
        .route(
            "/graphs/:graph_id/nodes/bulk-delete",
            post(bulk_delete_nodes),
        )
        .route("/stats", get(get_graph_stats))
        .route("/operations/:operation_id", get(get_operation))
}

#[tokio::main]
async fn main() {
    let config = Config::from_env().expect("failed to load configuration");
    knowledge_graph_core::init_tracing(&config);

    let manager = DbConnectionManager::<PgConnection>::new(config.db_url());
    let db: DbPool = r2d2::Pool::builder()
        .build(manager)
        .expect("failed to create database connection pool");

    let state = Arc::new(
        AppState::new(db, config)
            .await
            .expect("failed to assemble application state"),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = protected_routes()
        .layer(from_fn_with_state(
            state.auth_service.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    let ws_state = WebSocketRouteState {
        hub: state.hub.clone(),
        auth_service: state.auth_service.clone(),
        eventing_config: state.config.eventing(),
    };
    let ws_routes = websocket::create_websocket_routes().with_state(ws_state);

    let app = Router::new()
        .merge(protected)
        .merge(ws_routes)
        .layer(cors)
        .layer(axum::middleware::from_fn(logger));

    let addr = state.config.server_address().parse().expect("invalid server address");
    tracing::info!("server listening on http://{}", addr);
    tracing::info!("websocket endpoint at ws://{}/ws", addr);
    Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .unwrap();
}
