// Connection supervisor: one task per websocket connection.
//
// The task owns the socket. Everything that wants to write to the client
// (broadcasts, heartbeat pings, evictions) goes through the connection's
// outbound channel and is written here, so socket writes are never
// interleaved across tasks.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::header::{HeaderMap, COOKIE},
    response::Response,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use lectern_common::protocol::ws::{
    classify_decode_failure, decode_client_frame, DecodeFailure, ServerFrame,
};
use lectern_common::types::Principal;

use crate::{
    metrics,
    registry::{ClassroomId, Outbound},
    ws::{
        protocol::{reject, send_server_frame},
        router, ChatState, DEFAULT_HISTORY_LIMIT, MAX_FRAME_BYTES,
    },
};

/// Session cookie carrying the JWT for browser clients.
const AUTH_COOKIE: &str = "authToken";

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

/// `GET /ws` upgrade. The client manages rooms explicitly.
pub async fn ws_upgrade(
    State(state): State<ChatState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = extract_token(&headers, query.token);
    ws.max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| run_connection(state, socket, token, None))
}

/// `GET /ws/classroom/{classroom_id}` upgrade. The connection is bound to
/// one classroom and joins it during bring-up.
pub async fn ws_upgrade_classroom(
    State(state): State<ChatState>,
    Path(classroom_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = extract_token(&headers, query.token);
    ws.max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| run_connection(state, socket, token, Some(classroom_id)))
}

/// Browser clients authenticate with the session cookie; non-browser
/// clients fall back to a `?token=` query parameter. The cookie wins when
/// both are present.
fn extract_token(headers: &HeaderMap, query_token: Option<String>) -> Option<String> {
    cookie_value(headers, AUTH_COOKIE)
        .or(query_token)
        .filter(|token| !token.trim().is_empty())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key.trim() == name && !value.trim().is_empty() {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

async fn run_connection(
    state: ChatState,
    mut socket: WebSocket,
    token: Option<String>,
    bound_room: Option<ClassroomId>,
) {
    // Handshake: verify credentials before any state is created.
    let Some(token) = token else {
        reject(socket, "Authentication required").await;
        return;
    };
    let principal = match state.jwt.validate_session_token(&token) {
        Ok(principal) => principal,
        Err(err) => {
            debug!(error = %err, "websocket handshake rejected");
            reject(socket, "Invalid or expired token").await;
            return;
        }
    };

    if let Some(classroom_id) = bound_room {
        match state.access.has_access(&principal, classroom_id).await {
            Ok(true) => {}
            Ok(false) => {
                reject(socket, "You do not have access to this classroom").await;
                return;
            }
            Err(err) => {
                error!(%classroom_id, error = %err, "classroom access check failed");
                reject(socket, "Internal server error").await;
                return;
            }
        }
    }

    // Bring-up writes go straight to the socket, before the connection is
    // visible to the broadcaster, so backfill can never trail a live
    // frame.
    let auth_success = ServerFrame::AuthSuccess {
        user_id: principal.id,
        user_name: principal.name.clone(),
        role: principal.role,
    };
    if !send_server_frame(&mut socket, &auth_success).await {
        return;
    }

    if let Some(classroom_id) = bound_room {
        let messages = match state.store.list_recent(classroom_id, DEFAULT_HISTORY_LIMIT, None).await
        {
            Ok(mut page) => {
                page.reverse();
                page
            }
            Err(err) => {
                error!(%classroom_id, error = %err, "failed to load history during bring-up");
                reject(socket, "Failed to load message history").await;
                return;
            }
        };
        if !send_server_frame(&mut socket, &ServerFrame::MessageHistory { messages }).await {
            return;
        }
    }

    let conn_id = Uuid::new_v4();
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel();
    state.registry.register(conn_id, principal.clone(), outbound_sender).await;
    metrics::set_connected_clients(state.registry.connection_count().await as i64);

    if let Some(classroom_id) = bound_room {
        state.registry.join(conn_id, classroom_id).await;
        metrics::set_active_rooms(state.registry.room_count().await as i64);
        state
            .broadcaster
            .broadcast(
                classroom_id,
                &router::user_joined_frame(&principal, classroom_id),
                Some(conn_id),
            )
            .await;
    }

    info!(
        conn_id = %conn_id,
        user_id = %principal.id,
        role = principal.role.as_str(),
        bound_room = ?bound_room,
        "websocket connected"
    );

    loop {
        tokio::select! {
            outbound = outbound_receiver.recv() => match outbound {
                Some(Outbound::Frame(encoded)) => {
                    if socket.send(Message::Text(encoded.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Ping) => {
                    if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Shutdown) | None => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(raw))) => {
                    if raw.len() > MAX_FRAME_BYTES {
                        let too_large = ServerFrame::error("Message too large");
                        if !send_server_frame(&mut socket, &too_large).await {
                            break;
                        }
                        continue;
                    }

                    let frame = match decode_client_frame(&raw) {
                        Ok(frame) => frame,
                        Err(err) => {
                            debug!(conn_id = %conn_id, error = %err, "undecodable client frame");
                            let reply = match classify_decode_failure(&raw) {
                                DecodeFailure::UnknownType => {
                                    ServerFrame::error("Unknown message type")
                                }
                                DecodeFailure::Malformed => {
                                    ServerFrame::error("Invalid message format")
                                }
                            };
                            if !send_server_frame(&mut socket, &reply).await {
                                break;
                            }
                            continue;
                        }
                    };

                    match router::dispatch(&state, conn_id, &principal, bound_room, frame).await {
                        Ok(replies) => {
                            let mut socket_gone = false;
                            for reply in &replies {
                                if !send_server_frame(&mut socket, reply).await {
                                    socket_gone = true;
                                    break;
                                }
                            }
                            if socket_gone {
                                break;
                            }
                        }
                        Err(error_frame) => {
                            if !send_server_frame(&mut socket, &error_frame).await {
                                break;
                            }
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if socket.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    state.registry.mark_alive(conn_id).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    let unsupported = ServerFrame::error("Binary frames are not supported");
                    if !send_server_frame(&mut socket, &unsupported).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    debug!(conn_id = %conn_id, error = %err, "websocket read failed");
                    break;
                }
            },
        }
    }

    // Teardown runs exactly once per connection: deregister yields each
    // room a single time, then the departures are announced.
    let rooms = state.registry.deregister(conn_id).await;
    metrics::set_connected_clients(state.registry.connection_count().await as i64);
    metrics::set_active_rooms(state.registry.room_count().await as i64);
    for classroom_id in rooms {
        state
            .broadcaster
            .broadcast(classroom_id, &router::user_left_frame(&principal, classroom_id), None)
            .await;
    }

    info!(conn_id = %conn_id, user_id = %principal.id, "websocket disconnected");
}
