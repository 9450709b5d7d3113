use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use events::protocol::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use log::*;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer credential carried in the upgrade request, never as a
    /// post-connect message.
    token: Option<String>,
}

/// WebSocket handler that establishes a long-lived realtime connection.
///
/// The credential is verified *before* the upgrade: a missing, invalid or
/// expired token is answered with 401 at the handshake, so an
/// unauthenticated socket is never accepted.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let verified = query
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| realtime::error::Error::auth(realtime::error::AuthErrorKind::MissingToken))
        .and_then(|token| realtime::auth::verify_token(state.config.jwt_secret(), token));

    match verified {
        Ok(claims) => ws.on_upgrade(move |socket| handle_socket(socket, state, claims.sub)),
        Err(e) => {
            warn!("Rejecting realtime handshake: {e}");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

/// Owns one accepted socket for its whole lifetime: registers it with the
/// hub, pumps outbound messages, dispatches inbound ones and enforces the
/// ping/liveness watchdog. On any exit path the connection is unregistered
/// and the presence counter is re-broadcast.
async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    debug!("Establishing realtime connection for user {user_id}");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection_id = state.hub.register_connection(user_id.clone(), tx);

    state.hub.send_to_connection(
        &connection_id,
        ServerMessage::Connected {
            message: "realtime channel established".to_string(),
            user_id: user_id.clone(),
            timestamp: Utc::now(),
        },
    );
    state.hub.broadcast_active_users();

    let (mut sink, mut stream) = socket.split();

    let ping_timeout = Duration::from_millis(state.config.ping_timeout_ms);
    let mut ping_interval =
        tokio::time::interval(Duration::from_millis(state.config.ping_interval_ms));
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(message) => match serde_json::to_string(&message) {
                    Ok(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => error!("Failed to serialize outbound message: {e}"),
                },
                // The hub dropped our sender (close() or unregister).
                None => break,
            },

            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    last_activity = Instant::now();
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => state.hub.handle_client_message(&connection_id, message),
                        Err(e) => state.hub.reject_malformed(&connection_id, &e.to_string()),
                    }
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    last_activity = Instant::now();
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Socket error for user {user_id}: {e}");
                    break;
                }
            },

            _ = ping_interval.tick() => {
                if last_activity.elapsed() > ping_timeout {
                    warn!(
                        "Connection {} missed the liveness window; disconnecting",
                        connection_id.as_str()
                    );
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.unregister_connection(&connection_id);
    state.hub.broadcast_active_users();
    debug!("Realtime connection closed for user {user_id}");
}
