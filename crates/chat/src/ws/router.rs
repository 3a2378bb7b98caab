// Per-frame message routing.
//
// Each handler returns `Ok` with the direct replies for the sending
// connection, or `Err` with a single error frame. Room-wide effects go
// through the broadcaster; the connection supervisor only writes the
// returned frames to its own socket.

use std::time::Instant;

use chrono::Utc;
use tracing::error;

use lectern_common::protocol::ws::{ClientFrame, RoomUser, ServerFrame};
use lectern_common::types::{validate_content, Principal};

use crate::{
    metrics,
    registry::{ClassroomId, ConnectionId},
    store::NewMessage,
    ws::{ChatState, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT},
};

pub async fn dispatch(
    state: &ChatState,
    conn_id: ConnectionId,
    principal: &Principal,
    bound_room: Option<ClassroomId>,
    frame: ClientFrame,
) -> Result<Vec<ServerFrame>, ServerFrame> {
    let label = frame_label(&frame);
    let started_at = Instant::now();

    let result = match frame {
        ClientFrame::JoinRoom { classroom_id } => {
            handle_join_room(state, conn_id, principal, classroom_id).await
        }
        ClientFrame::LeaveRoom { classroom_id } => {
            handle_leave_room(state, conn_id, principal, classroom_id).await
        }
        ClientFrame::SendMessage { classroom_id, content } => {
            handle_send_message(state, conn_id, principal, classroom_id.or(bound_room), content)
                .await
        }
        ClientFrame::EditMessage { message_id, content } => {
            handle_edit_message(state, principal, message_id, content).await
        }
        ClientFrame::DeleteMessage { message_id } => {
            handle_delete_message(state, conn_id, principal, message_id).await
        }
        ClientFrame::GetHistory { classroom_id, limit, before } => {
            handle_get_history(state, conn_id, classroom_id, limit, before).await
        }
    };

    metrics::record_ws_request(label, result.is_err(), started_at.elapsed().as_millis() as u64);
    result
}

fn frame_label(frame: &ClientFrame) -> &'static str {
    match frame {
        ClientFrame::JoinRoom { .. } => "join_room",
        ClientFrame::LeaveRoom { .. } => "leave_room",
        ClientFrame::SendMessage { .. } => "send_message",
        ClientFrame::EditMessage { .. } => "edit_message",
        ClientFrame::DeleteMessage { .. } => "delete_message",
        ClientFrame::GetHistory { .. } => "get_history",
    }
}

pub(crate) fn user_joined_frame(principal: &Principal, classroom_id: ClassroomId) -> ServerFrame {
    ServerFrame::UserJoined {
        user_id: principal.id,
        user_name: principal.name.clone(),
        role: principal.role,
        classroom_id,
        timestamp: Utc::now(),
    }
}

pub(crate) fn user_left_frame(principal: &Principal, classroom_id: ClassroomId) -> ServerFrame {
    ServerFrame::UserLeft {
        user_id: principal.id,
        user_name: principal.name.clone(),
        role: principal.role,
        classroom_id,
        timestamp: Utc::now(),
    }
}

async fn handle_join_room(
    state: &ChatState,
    conn_id: ConnectionId,
    principal: &Principal,
    classroom_id: ClassroomId,
) -> Result<Vec<ServerFrame>, ServerFrame> {
    match state.access.has_access(principal, classroom_id).await {
        Ok(true) => {}
        Ok(false) => {
            return Err(ServerFrame::error("You do not have access to this classroom"));
        }
        Err(err) => {
            error!(%classroom_id, error = %err, "classroom access check failed");
            return Err(ServerFrame::error("Internal server error"));
        }
    }

    if !state.registry.join(conn_id, classroom_id).await {
        return Err(ServerFrame::error("Connection is not registered"));
    }
    metrics::set_active_rooms(state.registry.room_count().await as i64);

    let users: Vec<RoomUser> = state
        .registry
        .members_of(classroom_id)
        .await
        .into_iter()
        .map(|member| RoomUser {
            id: member.principal.id,
            name: member.principal.name,
            role: member.principal.role,
        })
        .collect();

    state
        .broadcaster
        .broadcast(classroom_id, &user_joined_frame(principal, classroom_id), Some(conn_id))
        .await;

    Ok(vec![ServerFrame::JoinedRoom { classroom_id, users }])
}

async fn handle_leave_room(
    state: &ChatState,
    conn_id: ConnectionId,
    principal: &Principal,
    classroom_id: ClassroomId,
) -> Result<Vec<ServerFrame>, ServerFrame> {
    if !state.registry.leave(conn_id, classroom_id).await {
        return Err(ServerFrame::error("You are not a member of this classroom"));
    }
    metrics::set_active_rooms(state.registry.room_count().await as i64);

    // The leaver is already out of the index, so no exclusion is needed.
    state.broadcaster.broadcast(classroom_id, &user_left_frame(principal, classroom_id), None).await;

    Ok(vec![ServerFrame::LeftRoom { classroom_id }])
}

async fn handle_send_message(
    state: &ChatState,
    conn_id: ConnectionId,
    principal: &Principal,
    classroom_id: Option<ClassroomId>,
    content: String,
) -> Result<Vec<ServerFrame>, ServerFrame> {
    let Some(classroom_id) = classroom_id else {
        return Err(ServerFrame::error("classroom_id is required"));
    };

    if !state.registry.is_member(conn_id, classroom_id).await {
        return Err(ServerFrame::error("You must join the classroom first"));
    }

    let content = validate_content(&content)
        .map_err(|err| ServerFrame::error(err.to_string()))?
        .to_string();

    let message = state
        .store
        .append(NewMessage {
            classroom_id,
            author: principal.clone(),
            content,
            attachment: None,
        })
        .await
        .map_err(|err| {
            error!(%classroom_id, error = %err, "failed to persist chat message");
            ServerFrame::error("Failed to send message")
        })?;
    metrics::increment_messages_persisted();

    // Everyone in the room, the sender included, sees the same persisted
    // message.
    state.broadcaster.broadcast(classroom_id, &ServerFrame::NewMessage { message }, None).await;

    Ok(Vec::new())
}

async fn handle_edit_message(
    state: &ChatState,
    principal: &Principal,
    message_id: uuid::Uuid,
    content: String,
) -> Result<Vec<ServerFrame>, ServerFrame> {
    let content = validate_content(&content)
        .map_err(|err| ServerFrame::error(err.to_string()))?
        .to_string();

    let message = state
        .store
        .find(message_id)
        .await
        .map_err(|err| {
            error!(%message_id, error = %err, "failed to look up message for edit");
            ServerFrame::error("Internal server error")
        })?
        .filter(|message| !message.deleted)
        .ok_or_else(|| ServerFrame::error("Message not found"))?;

    if message.user_id != principal.id {
        return Err(ServerFrame::error("You can only edit your own messages"));
    }

    let updated = state
        .store
        .edit_content(message_id, &content)
        .await
        .map_err(|err| {
            error!(%message_id, error = %err, "failed to edit chat message");
            ServerFrame::error("Failed to edit message")
        })?
        .ok_or_else(|| ServerFrame::error("Message not found"))?;

    state
        .broadcaster
        .broadcast(
            message.classroom_id,
            &ServerFrame::MessageEdited {
                id: updated.id,
                content: updated.content,
                edited: updated.edited,
                user_id: updated.user_id,
                user_name: updated.user_name,
            },
            None,
        )
        .await;

    Ok(Vec::new())
}

async fn handle_delete_message(
    state: &ChatState,
    conn_id: ConnectionId,
    principal: &Principal,
    message_id: uuid::Uuid,
) -> Result<Vec<ServerFrame>, ServerFrame> {
    let message = state
        .store
        .find(message_id)
        .await
        .map_err(|err| {
            error!(%message_id, error = %err, "failed to look up message for delete");
            ServerFrame::error("Internal server error")
        })?
        .filter(|message| !message.deleted)
        .ok_or_else(|| ServerFrame::error("Message not found"))?;

    // Moderation is scoped: a facilitator may delete someone else's
    // message only in a room they are currently in.
    let is_author = message.user_id == principal.id;
    let is_moderator = principal.role.is_facilitator()
        && state.registry.is_member(conn_id, message.classroom_id).await;
    if !is_author && !is_moderator {
        return Err(ServerFrame::error("You do not have permission to delete this message"));
    }

    let deleted = state.store.soft_delete(message_id).await.map_err(|err| {
        error!(%message_id, error = %err, "failed to delete chat message");
        ServerFrame::error("Failed to delete message")
    })?;
    if !deleted {
        return Err(ServerFrame::error("Message not found"));
    }

    // Only the id crosses the wire; deleted content is never echoed.
    state
        .broadcaster
        .broadcast(message.classroom_id, &ServerFrame::MessageDeleted { message_id }, None)
        .await;

    Ok(Vec::new())
}

async fn handle_get_history(
    state: &ChatState,
    conn_id: ConnectionId,
    classroom_id: ClassroomId,
    limit: Option<i64>,
    before: Option<chrono::DateTime<Utc>>,
) -> Result<Vec<ServerFrame>, ServerFrame> {
    if !state.registry.is_member(conn_id, classroom_id).await {
        return Err(ServerFrame::error("You must join the classroom first"));
    }

    let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);

    let mut messages =
        state.store.list_recent(classroom_id, limit, before).await.map_err(|err| {
            error!(%classroom_id, error = %err, "failed to load message history");
            ServerFrame::error("Failed to load message history")
        })?;
    // Storage returns newest first; clients render oldest first.
    messages.reverse();

    Ok(vec![ServerFrame::MessageHistory { messages }])
}
