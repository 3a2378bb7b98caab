// Socket-side frame plumbing shared by the connection supervisor.

use axum::extract::ws::{Message, WebSocket};
use tracing::warn;

use lectern_common::protocol::ws::{encode_server_frame, ServerFrame};

/// Encode and send a single frame. Returns false when the socket is gone
/// so the caller can stop its loop.
pub async fn send_server_frame(socket: &mut WebSocket, frame: &ServerFrame) -> bool {
    let encoded = match encode_server_frame(frame) {
        Ok(encoded) => encoded,
        Err(err) => {
            warn!(error = %err, "failed to encode server frame");
            return false;
        }
    };

    socket.send(Message::Text(encoded.into())).await.is_ok()
}

/// Send a final error frame and close the socket. Used for handshake
/// failures where no connection state exists yet.
pub async fn reject(mut socket: WebSocket, message: &str) {
    let _ = send_server_frame(&mut socket, &ServerFrame::error(message)).await;
    let _ = socket.send(Message::Close(None)).await;
}
