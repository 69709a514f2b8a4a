//! WebSocket signaling endpoint.
//!
//! `GET /ws` upgrades an authenticated request to a signaling connection.
//! Browsers cannot set headers on a WebSocket handshake, so the token may
//! also arrive as `?token=`.
//!
//! Each connection runs three tasks:
//!
//! ```text
//! reader (this task) --> SignalingRelay --> rooms
//!                                            |
//! writer task <-- ConnectionActor <----------+
//! ```
//!
//! Inbound frames are handled one at a time, so a client's events reach the
//! relay in the order it sent them.

use crate::actors::ConnectionActor;
use crate::errors::CcError;
use crate::middleware::auth::extract_bearer_token;
use crate::routes::AppState;
use crate::signaling::{ServerEvent, SignalingPeer};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use common::types::UserId;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Buffer between the connection actor and the socket writer.
const OUTBOUND_BUFFER: usize = 64;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Handler for GET /ws
///
/// # Response
///
/// - 101 Switching Protocols: token valid, signaling begins
/// - 401 Unauthorized: token missing or invalid
#[instrument(skip_all, name = "cc.ws.upgrade")]
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, CcError> {
    // Header wins over query so proxies that strip query strings still work
    let token = match extract_bearer_token(&headers) {
        Ok(token) => token.to_string(),
        Err(header_err) => query.token.ok_or(header_err)?,
    };

    let claims = state.jwt_validator.validate(&token)?;
    let user_id = claims
        .user_id()
        .map_err(|_| CcError::InvalidToken("The access token is invalid or expired".to_string()))?;

    if state.relay.membership().is_cancelled() {
        return Err(CcError::Draining);
    }

    debug!(target: "cc.ws", user_id = %user_id, "Upgrading signaling connection");

    Ok(ws.on_upgrade(move |socket| run_connection(socket, state, user_id, claims.name)))
}

/// Drive one signaling connection until the client goes away, the idle
/// timeout fires, or the connection is cancelled (shutdown, or a room
/// closing it for lagging).
///
/// Returns only after the user has been removed from their rooms, so a
/// reconnect never observes a stale member.
#[instrument(skip_all, name = "cc.ws.connection", fields(user_id = %user_id))]
async fn run_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    user_id: UserId,
    username: Option<String>,
) {
    let connection_id = Uuid::new_v4();
    let cancel_token = state.relay.membership().child_token();
    let ping_interval = Duration::from_secs(state.config.ws_ping_interval_seconds);
    let idle_timeout = Duration::from_secs(state.config.ws_idle_timeout_seconds);

    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);

    let (connection, actor_task) = ConnectionActor::spawn(
        connection_id,
        user_id,
        outbound_tx,
        cancel_token.clone(),
        Arc::clone(&state.actor_metrics),
    );

    info!(target: "cc.ws", connection_id = %connection_id, "Signaling connection opened");

    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        // First tick completes immediately
        ping.tick().await;

        loop {
            tokio::select! {
                event = outbound_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(target: "cc.ws", error = %e, "Failed to serialize event");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = sink.close().await;
    });

    let mut peer = SignalingPeer::new(user_id, username, connection.clone());

    loop {
        // Any inbound frame, pongs included, resets the idle timer
        let frame = tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "cc.ws", "Connection cancelled");
                break;
            }
            frame = tokio::time::timeout(idle_timeout, stream.next()) => frame,
        };

        match frame {
            Err(_) => {
                info!(target: "cc.ws", connection_id = %connection_id, "Idle timeout, closing connection");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(target: "cc.ws", error = %e, "WebSocket read error");
                break;
            }
            Ok(Some(Ok(message))) => match message {
                Message::Text(text) => state.relay.handle_text(&mut peer, &text).await,
                Message::Binary(_) => {
                    let err = CcError::BadRequest("Binary frames are not supported".to_string());
                    if let Err(e) = connection.send(ServerEvent::error(&err, None)).await {
                        debug!(target: "cc.ws", error = %e, "Could not deliver error event");
                    }
                }
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {}
            },
        }
    }

    let rooms_left = state.relay.disconnect(&mut peer).await;

    connection.cancel();
    if let Err(e) = actor_task.await {
        warn!(target: "cc.ws", error = %e, "Connection actor task failed");
    }
    // The actor owned the only outbound sender, so the writer drains and exits
    if let Err(e) = writer.await {
        warn!(target: "cc.ws", error = %e, "Writer task failed");
    }

    info!(
        target: "cc.ws",
        connection_id = %connection_id,
        rooms_left,
        "Signaling connection closed"
    );
}
