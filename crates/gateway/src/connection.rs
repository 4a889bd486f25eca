//! Connection Manager: WebSocket accept, join handshake, and the
//! reader/writer task pair that carries one connection's frames to and
//! from the router.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::codec;
use crate::router::RouterCommand;
use crate::GatewayState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub space: Option<String>,
    pub token: Option<String>,
}

/// `GET /ws?space=<id>`, `Authorization: Bearer <token>` header (or
/// `?token=` query parameter as an equivalent).
pub async fn ws_handler(
    State(state): State<GatewayState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    if let Some(requested_space) = &query.space {
        if requested_space != &state.space_config.space.id {
            return (StatusCode::UNAUTHORIZED, "unknown space").into_response();
        }
    }

    let token = bearer_token(&headers).or(query.token);
    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "missing bearer token").into_response();
    };

    let Some((participant, participant_config)) = state.space_config.authenticate(&token) else {
        return (StatusCode::UNAUTHORIZED, "unknown token").into_response();
    };
    let participant = participant.to_string();
    let capabilities = participant_config.capabilities.clone();
    let routing = participant_config.routing;

    upgrade.on_upgrade(move |socket| handle_socket(socket, state, participant, capabilities, routing))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn handle_socket(
    socket: WebSocket,
    state: GatewayState,
    participant: String,
    capabilities: Vec<common::CapabilityPattern>,
    routing: crate::space_config::RoutingPreference,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(state.config.outbound_queue_capacity);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<u16>(1);
    let pending_bytes = Arc::new(AtomicUsize::new(0));

    let (ack_tx, ack_rx) = oneshot::channel();
    let join = RouterCommand::Join {
        participant: participant.clone(),
        capabilities,
        routing,
        outbound: outbound_tx.clone(),
        disconnect: disconnect_tx,
        pending_bytes: pending_bytes.clone(),
        bytes_limit: state.config.outbound_queue_bytes,
        ack: ack_tx,
    };
    if state.router.send(join).await.is_err() {
        warn!("router channel closed before {participant} could join");
        return;
    }
    let _ = ack_rx.await;

    let heartbeat_interval = Duration::from_secs(state.config.heartbeat_interval_secs);
    let last_pong_unix = Arc::new(AtomicI64::new(unix_now()));

    let writer_pending_bytes = pending_bytes.clone();
    let writer_task = tokio::spawn(async move {
        let mut ping_tick = tokio::time::interval(heartbeat_interval);
        ping_tick.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                biased;
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if let Message::Text(text) = &frame {
                        writer_pending_bytes.fetch_sub(text.len().min(writer_pending_bytes.load(Ordering::SeqCst)), Ordering::SeqCst);
                    }
                    if ws_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                code = disconnect_rx.recv() => {
                    let code = code.unwrap_or(1000);
                    let _ = ws_tx
                        .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                            code,
                            reason: std::borrow::Cow::Borrowed(""),
                        })))
                        .await;
                    break;
                }
                _ = ping_tick.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let idle_limit = heartbeat_interval.saturating_mul(2);
    let max_bytes = state.config.max_envelope_bytes;
    loop {
        let elapsed = unix_now() - last_pong_unix.load(Ordering::Relaxed);
        if elapsed > idle_limit.as_secs() as i64 {
            warn!("{participant} idle beyond {idle_limit:?} without a pong, closing");
            break;
        }

        let next = tokio::time::timeout(idle_limit, ws_rx.next()).await;
        let Ok(Some(Ok(message))) = next else {
            break;
        };
        match message {
            Message::Text(text) => match codec::decode(&text, max_bytes) {
                Ok(envelope) => {
                    let command = RouterCommand::Inbound { participant: participant.clone(), envelope };
                    if state.router.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("rejecting malformed frame from {participant}: {e}");
                    let offending_id = sniff_id(&text);
                    let command = RouterCommand::Invalid {
                        participant: participant.clone(),
                        error: e,
                        offending_id,
                    };
                    if state.router.send(command).await.is_err() {
                        break;
                    }
                }
            },
            Message::Pong(_) => last_pong_unix.store(unix_now(), Ordering::Relaxed),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Binary(_) => {}
        }
    }

    let _ = state.router.send(RouterCommand::Leave { participant: participant.clone() }).await;
    writer_task.abort();
    info!("connection for {participant} closed");
}

/// Best-effort extraction of the `id` field from a frame that failed
/// structural validation, so the `system/error` the gateway sends back can
/// still correlate to the offending message where possible (e.g. an
/// otherwise well-formed envelope with an unknown `kind`). Frames that
/// aren't even valid JSON, or omit `id` entirely, get an uncorrelated
/// error instead.
fn sniff_id(text: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()?
        .get("id")?
        .as_str()
        .map(str::to_string)
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
