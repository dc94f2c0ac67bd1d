//! Broadcaster (spec §4.10): projects domain events onto WebSocket message envelopes addressed
//! to the event's `user_id`, then hands them to the `Hub`. Grounded on
//! `websocket/events/middleware.rs`'s event-type-to-handler dispatch shape and the
//! `DASHBOARD_EVENT_TYPES` const-array filtering idiom used for a similar purpose in the wider
//! example pack (`adapters/websocket/event_bridge.rs`).

use async_trait::async_trait;
use tracing::debug;

use crate::domain::DomainEvent;
use crate::error::AppError;
use crate::eventing::handler::EventHandler;
use crate::eventing::projection::Projection;

use super::hub::Hub;

/// Required client `type` tags the hub sends (spec §6). `event_type -> ws type tag` is a fixed
/// table rather than a pass-through of the domain event's own `event_type` string, since the
/// wire vocabulary the client speaks is intentionally smaller than the domain's.
fn ws_type_for(event_type: &str) -> Option<&'static str> {
    match event_type {
        "NodeCreated" => Some("NODE_CREATED"),
        "NodeUpdated" => Some("NODE_UPDATED"),
        "NodeDeleted" => Some("NODE_DELETED"),
        "EdgeCreated" => Some("EDGE_CREATED"),
        "EdgeDeleted" => Some("EDGE_DELETED"),
        "GraphUpdated" => Some("GRAPH_UPDATED"),
        "GraphDeleted" => Some("GRAPH_DELETED"),
        // BulkNodesDeleted intentionally has no per-node envelope (spec §8 scenario 2): the
        // operation listener already reports status, and the hub has no natural way to
        // describe "N nodes across one graph" as a single node/edge/graph update.
        _ => None,
    }
}

/// Registered in the `ProjectionRegistry` under the wildcard `"*"` type (spec §4.2) so it sees
/// every event and decides per-event whether it has a mapping, rather than being registered
/// once per concrete event type.
pub struct Broadcaster {
    hub: Hub,
}

impl Broadcaster {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl EventHandler for Broadcaster {
    async fn handle(&self, event: &dyn DomainEvent) -> Result<(), AppError> {
        let Some(ws_type) = ws_type_for(event.event_type()) else {
            debug!(event_type = event.event_type(), "broadcaster: no ws mapping, dropping");
            return Ok(());
        };

        match self.hub.send_to_user(event.user_id(), ws_type, &event.payload()).await {
            Ok(()) => Ok(()),
            Err(err @ AppError::BroadcastFull { .. }) => {
                // Spec §7: callers log and continue; one user's backpressure never blocks a
                // command or fails the broadcaster's own caller.
                tracing::warn!(user_id = %event.user_id(), error = %err, "broadcast queue full, dropping");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn name(&self) -> &'static str {
        "broadcaster"
    }

    fn supported_types(&self) -> &'static [&'static str] {
        &["*"]
    }

    fn priority(&self) -> i32 {
        200
    }
}

#[async_trait]
impl Projection for Broadcaster {
    fn projection_name(&self) -> &'static str {
        "broadcaster"
    }

    async fn reset(&self) -> Result<(), AppError> {
        // Nothing cached beyond the hub's own connection state, which the broadcaster doesn't own.
        Ok(())
    }
}
