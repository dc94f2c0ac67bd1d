//! WebSocket surface: handshake authentication plus the event-propagation core's Hub,
//! per-connection loop, and Broadcaster (spec §4.9-§4.10).

pub mod auth;
pub mod broadcaster;
pub mod connection;
pub mod hub;

pub use auth::{AuthenticatedUser, WebSocketAuth, WebSocketAuthError, WebSocketAuthQuery};
pub use broadcaster::Broadcaster;
pub use connection::run_connection;
pub use hub::{BroadcastMessage as HubBroadcastMessage, Hub};

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::config::EventingConfig;
use crate::middleware::auth::AuthService;

/// State the `/ws` route needs to authenticate the handshake and hand the accepted socket to
/// the Hub.
#[derive(Clone)]
pub struct WebSocketRouteState {
    pub hub: Hub,
    pub auth_service: std::sync::Arc<AuthService>,
    pub eventing_config: EventingConfig,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WebSocketRouteState>,
    Query(query): Query<WebSocketAuthQuery>,
) -> Response {
    let token = match query.token {
        Some(token) => token,
        None => {
            let (status, message) = WebSocketAuth::error_response(WebSocketAuthError::MissingToken);
            return (status, message).into_response();
        }
    };

    let authenticated = match WebSocketAuth::authenticate_websocket(&state.auth_service, &token) {
        Ok(user) => user,
        Err(err) => {
            let (status, message) = WebSocketAuth::error_response(err);
            return (status, message).into_response();
        }
    };

    ws.on_upgrade(move |socket| async move {
        run_connection(state.hub, socket, authenticated.user_id, &state.eventing_config).await;
    })
}

pub fn create_websocket_routes() -> Router<WebSocketRouteState> {
    Router::new().route("/ws", get(ws_handler))
}
