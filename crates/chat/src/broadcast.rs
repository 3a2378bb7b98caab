// Room broadcaster: fans a server frame out to every member of a room.
//
// Encodes the frame once, snapshots the member list under the registry's
// read lock, then sends on each member's outbound channel outside the
// lock. A full or closed channel means the connection task is already
// tearing down; the send is dropped and the registry catches up when that
// task deregisters.

use std::sync::Arc;

use tracing::{debug, error};

use lectern_common::protocol::ws::{encode_server_frame, ServerFrame};

use crate::{
    metrics,
    registry::{ClassroomId, ConnectionId, ConnectionRegistry, Outbound},
};

#[derive(Clone)]
pub struct RoomBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl RoomBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `frame` to every member of `classroom_id`, skipping
    /// `exclude` when set. Returns the number of connections the frame
    /// was handed to.
    pub async fn broadcast(
        &self,
        classroom_id: ClassroomId,
        frame: &ServerFrame,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let members = self.registry.members_of(classroom_id).await;
        if members.is_empty() {
            return 0;
        }

        let encoded = match encode_server_frame(frame) {
            Ok(encoded) => encoded,
            Err(err) => {
                error!(%classroom_id, error = %err, "failed to encode broadcast frame");
                return 0;
            }
        };

        let mut delivered = 0usize;
        for member in members {
            if Some(member.conn_id) == exclude {
                continue;
            }
            if member.outbound.send(Outbound::Frame(encoded.clone())).is_ok() {
                delivered += 1;
            } else {
                debug!(
                    %classroom_id,
                    conn_id = %member.conn_id,
                    "skipping broadcast to disconnecting member"
                );
            }
        }

        metrics::add_broadcast_fanout(delivered as u64);
        delivered
    }
}
