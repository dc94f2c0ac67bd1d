//! WebSocket Hub (spec §4.9): a single cooperative loop owning every connection. All mutation
//! of the per-user connection map happens inside this one task, driven by `register` /
//! `unregister` / `broadcast` channels plus a 30 s health-check ticker. This is the spec's
//! design note (§9) "coroutines/goroutines -> an explicit concurrency boundary with a bounded
//! channel" applied literally: unlike `unified_manager.rs`'s `UnifiedWebSocketManager`, which
//! mutates `Connection` fields through `RwLock`s from whichever task happens to call a method
//! (its `update_connection_activity`/`add_subscription` are logging-only no-ops precisely
//! because that approach doesn't actually synchronize anything useful), every state change here
//! is a message sent into the loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EventingConfig;
use crate::error::AppError;

/// `{type, timestamp, data}` envelope enqueued on every recipient's send queue (spec §3, §6).
/// Serialized once at broadcast time; the hub and every connection share the same `Arc<Vec<u8>>`
/// rather than re-encoding per recipient.
#[derive(Debug, Clone, Serialize)]
struct OutboundEnvelope<'a> {
    #[serde(rename = "type")]
    type_tag: &'a str,
    timestamp: chrono::DateTime<chrono::Utc>,
    data: &'a JsonValue,
}

#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    pub target_user_id: Uuid,
    pub type_tag: String,
    pub payload: Arc<Vec<u8>>,
}

impl BroadcastMessage {
    pub fn new(target_user_id: Uuid, type_tag: impl Into<String>, data: &JsonValue) -> Result<Self, AppError> {
        let type_tag = type_tag.into();
        let envelope = OutboundEnvelope {
            type_tag: &type_tag,
            timestamp: chrono::Utc::now(),
            data,
        };
        let payload = serde_json::to_vec(&envelope)
            .map_err(|e| AppError::internal(format!("failed to serialize broadcast message: {e}")))?;
        Ok(Self {
            target_user_id,
            type_tag,
            payload: Arc::new(payload),
        })
    }
}

/// Registration handed to the hub when a socket is accepted; `outbound` is what the connection's
/// own write task reads from to push frames to the client.
pub struct NewConnection {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub outbound: mpsc::Sender<Message>,
    pub ack: oneshot::Sender<Result<(), AppError>>,
}

struct Connection {
    id: Uuid,
    outbound: mpsc::Sender<Message>,
    liveness_deadline: tokio::time::Instant,
}

/// Handle returned to the rest of the application; clones are cheap and every clone talks to
/// the same loop task through its channels.
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<NewConnection>,
    unregister_tx: mpsc::Sender<(Uuid, Uuid)>,
    broadcast_tx: mpsc::Sender<BroadcastMessage>,
    pong_tx: mpsc::Sender<(Uuid, Uuid)>,
    send_buffer: usize,
    broadcast_wait: Duration,
    connections_per_user_hint: Arc<tokio::sync::RwLock<HashMap<Uuid, usize>>>,
    stop: Arc<tokio::sync::Notify>,
    connection_counter: Arc<AtomicU64>,
}

impl Hub {
    /// Spawns the single cooperative loop task and returns a cloneable handle to it.
    pub fn spawn(config: &EventingConfig) -> Self {
        let (register_tx, mut register_rx) = mpsc::channel::<NewConnection>(config.hub_channel_size);
        let (unregister_tx, mut unregister_rx) = mpsc::channel::<(Uuid, Uuid)>(config.hub_channel_size);
        let (broadcast_tx, mut broadcast_rx) = mpsc::channel::<BroadcastMessage>(config.hub_channel_size);
        let (pong_tx, mut pong_rx) = mpsc::channel::<(Uuid, Uuid)>(config.hub_channel_size);
        let stop = Arc::new(tokio::sync::Notify::new());
        let connections_per_user_hint = Arc::new(tokio::sync::RwLock::new(HashMap::new()));

        let send_buffer = config.hub_send_buffer;
        let max_connections_per_user = config.hub_max_connections_per_user;
        let pong_wait = config.hub_pong_wait;

        let loop_stop = stop.clone();
        let hint_for_loop = connections_per_user_hint.clone();
        tokio::spawn(async move {
            let mut connections: HashMap<Uuid, Vec<Connection>> = HashMap::new();
            let mut health_tick = tokio::time::interval(Duration::from_secs(30));

            loop {
                tokio::select! {
                    _ = loop_stop.notified() => {
                        for conns in connections.values() {
                            for conn in conns {
                                let _ = conn.outbound.try_send(Message::Close(None));
                            }
                        }
                        connections.clear();
                        break;
                    }
                    Some(new_conn) = register_rx.recv() => {
                        let user_slot = connections.entry(new_conn.user_id).or_default();
                        if user_slot.len() >= max_connections_per_user {
                            let _ = new_conn.ack.send(Err(AppError::validation(format!(
                                "connection cap ({max_connections_per_user}) reached for user {}",
                                new_conn.user_id
                            ))));
                            continue;
                        }
                        user_slot.push(Connection {
                            id: new_conn.connection_id,
                            outbound: new_conn.outbound,
                            liveness_deadline: tokio::time::Instant::now() + pong_wait,
                        });
                        hint_for_loop.write().await.insert(new_conn.user_id, user_slot.len());
                        let _ = new_conn.ack.send(Ok(()));
                        debug!(user_id = %new_conn.user_id, connection_id = %new_conn.connection_id, "connection registered");
                    }
                    Some((connection_id, user_id)) = unregister_rx.recv() => {
                        remove_connection(&mut connections, user_id, connection_id, "unregister requested");
                        update_hint(&hint_for_loop, &connections, user_id).await;
                    }
                    Some((connection_id, user_id)) = pong_rx.recv() => {
                        if let Some(conns) = connections.get_mut(&user_id) {
                            if let Some(conn) = conns.iter_mut().find(|c| c.id == connection_id) {
                                conn.liveness_deadline = tokio::time::Instant::now() + pong_wait;
                            }
                        }
                    }
                    Some(message) = broadcast_rx.recv() => {
                        if let Some(conns) = connections.get_mut(&message.target_user_id) {
                            let mut evicted = Vec::new();
                            for conn in conns.iter() {
                                // The payload is already-serialized JSON (spec §6: one
                                // `{type,timestamp,data}` text envelope), matching the
                                // `CONNECTION_ESTABLISHED`/`PING`/`ERROR` frames the connection's
                                // own write loop sends as `Message::Text`.
                                let text = String::from_utf8_lossy(&message.payload).into_owned();
                                let frame = Message::Text(text);
                                match conn.outbound.try_send(frame) {
                                    Ok(()) => {}
                                    Err(mpsc::error::TrySendError::Full(_)) => {
                                        warn!(
                                            user_id = %message.target_user_id,
                                            connection_id = %conn.id,
                                            "send queue full, evicting slow client"
                                        );
                                        evicted.push(conn.id);
                                    }
                                    Err(mpsc::error::TrySendError::Closed(_)) => {
                                        evicted.push(conn.id);
                                    }
                                }
                            }
                            for connection_id in evicted {
                                remove_connection(&mut connections, message.target_user_id, connection_id, "slow client evicted");
                            }
                            update_hint(&hint_for_loop, &connections, message.target_user_id).await;
                        }
                    }
                    _ = health_tick.tick() => {
                        let now = tokio::time::Instant::now();
                        let mut stale: Vec<(Uuid, Uuid)> = Vec::new();
                        for (user_id, conns) in connections.iter() {
                            for conn in conns {
                                if conn.liveness_deadline <= now {
                                    stale.push((*user_id, conn.id));
                                }
                            }
                        }
                        for (user_id, connection_id) in &stale {
                            remove_connection(&mut connections, *user_id, *connection_id, "pong deadline elapsed");
                        }
                        for user_id in stale.iter().map(|(u, _)| *u).collect::<std::collections::HashSet<_>>() {
                            update_hint(&hint_for_loop, &connections, user_id).await;
                        }
                    }
                }
            }
        });

        Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            pong_tx,
            send_buffer,
            broadcast_wait: Duration::from_secs(5),
            connections_per_user_hint,
            stop,
            connection_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn send_buffer_capacity(&self) -> usize {
        self.send_buffer
    }

    pub fn next_connection_id(&self) -> Uuid {
        self.connection_counter.fetch_add(1, Ordering::Relaxed);
        Uuid::new_v4()
    }

    /// Registers a connection with the hub loop, waiting for its admission decision.
    pub async fn register(&self, connection_id: Uuid, user_id: Uuid, outbound: mpsc::Sender<Message>) -> Result<(), AppError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.register_tx
            .send(NewConnection {
                connection_id,
                user_id,
                outbound,
                ack: ack_tx,
            })
            .await
            .map_err(|_| AppError::internal("hub register channel closed"))?;
        ack_rx
            .await
            .map_err(|_| AppError::internal("hub dropped the registration ack"))?
    }

    pub async fn unregister(&self, connection_id: Uuid, user_id: Uuid) {
        let _ = self.unregister_tx.send((connection_id, user_id)).await;
    }

    pub async fn record_pong(&self, connection_id: Uuid, user_id: Uuid) {
        let _ = self.pong_tx.send((connection_id, user_id)).await;
    }

    /// Serializes `data` once, then enqueues the envelope onto the broadcast channel. If the
    /// channel would not accept within the 5 s wait budget, returns `BroadcastFull` so the
    /// caller can log and continue (spec §4.9, §5).
    pub async fn send_to_user(&self, user_id: Uuid, type_tag: impl Into<String>, data: &JsonValue) -> Result<(), AppError> {
        let message = BroadcastMessage::new(user_id, type_tag, data)?;
        match tokio::time::timeout(self.broadcast_wait, self.broadcast_tx.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(AppError::BroadcastFull {
                user_id: user_id.to_string(),
            }),
            Err(_) => Err(AppError::BroadcastFull {
                user_id: user_id.to_string(),
            }),
        }
    }

    /// Best-effort count of open connections for a user, for admin/debug endpoints. Read from a
    /// hint map updated by the loop after every mutation rather than queried synchronously, so
    /// callers never block the loop to ask.
    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.connections_per_user_hint
            .read()
            .await
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }

    /// Stops the hub: closes every connection's send queue and socket, then returns. Callers of
    /// `send_to_user` during shutdown receive `BroadcastFull` once their wait expires (spec §4.9
    /// "Cancellation").
    pub fn stop(&self) {
        self.stop.notify_one();
        info!("websocket hub stop requested");
    }
}

fn remove_connection(
    connections: &mut HashMap<Uuid, Vec<Connection>>,
    user_id: Uuid,
    connection_id: Uuid,
    reason: &'static str,
) {
    if let Some(conns) = connections.get_mut(&user_id) {
        if let Some(pos) = conns.iter().position(|c| c.id == connection_id) {
            let conn = conns.remove(pos);
            let _ = conn.outbound.try_send(Message::Close(None));
            debug!(%user_id, %connection_id, reason, "connection removed");
        }
        if conns.is_empty() {
            connections.remove(&user_id);
        }
    }
}

async fn update_hint(
    hint: &Arc<tokio::sync::RwLock<HashMap<Uuid, usize>>>,
    connections: &HashMap<Uuid, Vec<Connection>>,
    user_id: Uuid,
) {
    let mut hint = hint.write().await;
    match connections.get(&user_id) {
        Some(conns) if !conns.is_empty() => {
            hint.insert(user_id, conns.len());
        }
        _ => {
            hint.remove(&user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eventing_config() -> EventingConfig {
        // Minimal config built by hand so tests don't depend on environment variables.
        EventingConfig {
            handler_timeout: Duration::from_secs(30),
            publish_batch_max: 10,
            publish_retry_max: 3,
            publish_backoff_initial: Duration::from_millis(100),
            publish_remote_endpoint: "http://localhost:9000/events".to_string(),
            publish_remote_source: "knowledge-graph.core".to_string(),
            hub_channel_size: 1000,
            hub_send_buffer: 4,
            hub_ping_period: Duration::from_secs(54),
            hub_pong_wait: Duration::from_secs(60),
            hub_max_connections_per_user: 10,
            perf_command_threshold: Duration::from_millis(500),
            perf_query_threshold: Duration::from_millis(200),
        }
    }

    async fn register_test_connection(hub: &Hub, user_id: Uuid) -> (Uuid, mpsc::Receiver<Message>) {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(hub.send_buffer_capacity());
        hub.register(connection_id, user_id, tx).await.unwrap();
        (connection_id, rx)
    }

    #[tokio::test]
    async fn broadcast_is_delivered_to_every_registered_connection() {
        let hub = Hub::spawn(&eventing_config());
        let user_id = Uuid::new_v4();
        let (_c1, mut rx1) = register_test_connection(&hub, user_id).await;
        let (_c2, mut rx2) = register_test_connection(&hub, user_id).await;

        hub.send_to_user(user_id, "NODE_CREATED", &serde_json::json!({"nodeId": "n1"}))
            .await
            .unwrap();

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn slow_client_is_evicted_without_affecting_siblings() {
        let hub = Hub::spawn(&eventing_config());
        let user_id = Uuid::new_v4();
        let (_healthy, mut healthy_rx) = register_test_connection(&hub, user_id).await;
        let (_slow, slow_rx) = register_test_connection(&hub, user_id).await;
        // Never drain `slow_rx`; its queue (capacity 4) fills after a handful of broadcasts.
        drop(slow_rx);

        for i in 0..20 {
            let _ = hub
                .send_to_user(user_id, "NODE_CREATED", &serde_json::json!({"i": i}))
                .await;
            // Drain the healthy connection as we go so its queue never fills.
            let _ = tokio::time::timeout(Duration::from_millis(50), healthy_rx.recv()).await;
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.connection_count(user_id).await, 1);
    }

    #[tokio::test]
    async fn admission_cap_rejects_beyond_max_connections_per_user() {
        let mut config = eventing_config();
        config.hub_max_connections_per_user = 1;
        let hub = Hub::spawn(&config);
        let user_id = Uuid::new_v4();
        let _first = register_test_connection(&hub, user_id).await;

        let (tx, _rx) = mpsc::channel(hub.send_buffer_capacity());
        let result = hub.register(Uuid::new_v4(), user_id, tx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unregister_drops_user_entry_once_empty() {
        let hub = Hub::spawn(&eventing_config());
        let user_id = Uuid::new_v4();
        let (connection_id, _rx) = register_test_connection(&hub, user_id).await;

        hub.unregister(connection_id, user_id).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(hub.connection_count(user_id).await, 0);
    }

}
