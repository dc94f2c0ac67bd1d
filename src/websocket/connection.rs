//! Per-connection read/write loops that sit between an accepted `axum` `WebSocket` and the
//! `Hub` (spec §4.9 "Liveness"): a write task forwards whatever the hub enqueues for this
//! connection and pings every `hub.ping.period`; a read task refreshes the pong deadline and
//! rejects anything but `{"type":"pong"}` from the client, unregistering on error or an
//! oversized frame.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EventingConfig;

use super::hub::Hub;

/// Spec §6: "Max inbound frame 512 KB".
const MAX_INBOUND_FRAME_BYTES: usize = 512 * 1024;

#[derive(Debug, Deserialize)]
struct InboundFrame<'a> {
    #[serde(rename = "type")]
    type_tag: &'a str,
}

/// Drives one connection end to end: registers with the hub, runs the write loop (ping +
/// forward) and read loop (pong + reject-everything-else) concurrently, and unregisters on
/// either loop's exit. Returns once the connection is fully torn down.
pub async fn run_connection(hub: Hub, socket: WebSocket, user_id: Uuid, config: &EventingConfig) {
    let connection_id = hub.next_connection_id();
    let (outbound_tx, outbound_rx) = mpsc::channel::<Message>(hub.send_buffer_capacity());
    let (mut sink, mut stream) = socket.split();

    if let Err(err) = hub.register(connection_id, user_id, outbound_tx).await {
        warn!(%user_id, %connection_id, error = %err, "connection rejected at admission");
        let error_frame = serde_json::json!({
            "type": "ERROR",
            "timestamp": chrono::Utc::now(),
            "data": { "message": err.to_string() },
        });
        if let Ok(text) = serde_json::to_string(&error_frame) {
            let _ = sink.send(Message::Text(text)).await;
        }
        let _ = sink.send(Message::Close(None)).await;
        return;
    }

    // Spec §6: `CONNECTION_ESTABLISHED` is one of the required client type values the hub
    // sends. The hub only addresses by user, not by individual connection, so this also
    // reaches this user's other open connections; they receive a harmless duplicate.
    if let Err(err) = hub
        .send_to_user(
            user_id,
            "CONNECTION_ESTABLISHED",
            &serde_json::json!({ "connectionId": connection_id }),
        )
        .await
    {
        debug!(%user_id, %connection_id, error = %err, "failed to send CONNECTION_ESTABLISHED");
    }

    let ping_period = config.hub_ping_period;

    let write_task = {
        let mut outbound_rx = outbound_rx;
        tokio::spawn(async move {
            let mut ping_tick = tokio::time::interval(ping_period);
            ping_tick.tick().await; // first tick fires immediately; skip it

            loop {
                tokio::select! {
                    frame = outbound_rx.recv() => {
                        match frame {
                            Some(Message::Close(_)) | None => break,
                            Some(frame) => {
                                if sink.send(frame).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    _ = ping_tick.tick() => {
                        // Spec §6: `PING` is an application-level `{type, timestamp, data}`
                        // JSON frame the client's own pong handler replies to, not a native
                        // WebSocket control frame.
                        let envelope = serde_json::json!({
                            "type": "PING",
                            "timestamp": chrono::Utc::now(),
                            "data": serde_json::Value::Null,
                        });
                        let Ok(text) = serde_json::to_string(&envelope) else { continue };
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        })
    };

    let read_task = {
        let hub = hub.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let message = match message {
                    Ok(m) => m,
                    Err(err) => {
                        debug!(%user_id, %connection_id, error = %err, "read error, unregistering");
                        break;
                    }
                };

                match message {
                    Message::Close(_) => break,
                    Message::Pong(_) => {
                        hub.record_pong(connection_id, user_id).await;
                    }
                    Message::Text(text) => {
                        if text.len() > MAX_INBOUND_FRAME_BYTES {
                            warn!(%user_id, %connection_id, "inbound frame exceeds 512 KB, dropping");
                            continue;
                        }
                        match serde_json::from_str::<InboundFrame>(&text) {
                            Ok(frame) if frame.type_tag == "pong" => {
                                hub.record_pong(connection_id, user_id).await;
                            }
                            _ => {
                                debug!(%user_id, %connection_id, "ignoring unrecognized inbound frame");
                            }
                        }
                    }
                    Message::Binary(bytes) => {
                        if bytes.len() > MAX_INBOUND_FRAME_BYTES {
                            warn!(%user_id, %connection_id, "inbound frame exceeds 512 KB, dropping");
                        } else {
                            debug!(%user_id, %connection_id, "ignoring binary inbound frame");
                        }
                    }
                    Message::Ping(_) => {}
                }
            }
        })
    };

    let _ = tokio::join!(write_task, read_task);
    hub.unregister(connection_id, user_id).await;
}

/// Ensures the configured ping period stays comfortably inside the pong-wait deadline (spec §4.9:
/// "0.9 * 60s pong-wait"); a misconfigured environment should fail loudly rather than silently
/// evict every connection every cycle.
pub fn validate_ping_pong_timing(config: &EventingConfig) -> Result<(), String> {
    if config.hub_ping_period >= config.hub_pong_wait {
        return Err(format!(
            "hub.ping.period ({:?}) must be smaller than hub.pong.wait ({:?})",
            config.hub_ping_period, config.hub_pong_wait
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ping_period_is_comfortably_inside_pong_wait() {
        let config = EventingConfig {
            handler_timeout: Duration::from_secs(30),
            publish_batch_max: 10,
            publish_retry_max: 3,
            publish_backoff_initial: Duration::from_millis(100),
            publish_remote_endpoint: "http://localhost:9000/events".to_string(),
            publish_remote_source: "knowledge-graph.core".to_string(),
            hub_channel_size: 1000,
            hub_send_buffer: 256,
            hub_ping_period: Duration::from_secs(54),
            hub_pong_wait: Duration::from_secs(60),
            hub_max_connections_per_user: 10,
            perf_command_threshold: Duration::from_millis(500),
            perf_query_threshold: Duration::from_millis(200),
        };
        assert!(validate_ping_pong_timing(&config).is_ok());
    }

    #[test]
    fn ping_period_at_or_past_pong_wait_is_rejected() {
        let mut config = EventingConfig {
            handler_timeout: Duration::from_secs(30),
            publish_batch_max: 10,
            publish_retry_max: 3,
            publish_backoff_initial: Duration::from_millis(100),
            publish_remote_endpoint: "http://localhost:9000/events".to_string(),
            publish_remote_source: "knowledge-graph.core".to_string(),
            hub_channel_size: 1000,
            hub_send_buffer: 256,
            hub_ping_period: Duration::from_secs(60),
            hub_pong_wait: Duration::from_secs(60),
            hub_max_connections_per_user: 10,
            perf_command_threshold: Duration::from_millis(500),
            perf_query_threshold: Duration::from_millis(200),
        };
        assert!(validate_ping_pong_timing(&config).is_err());
        config.hub_ping_period = Duration::from_secs(70);
        assert!(validate_ping_pong_timing(&config).is_err());
    }
}
