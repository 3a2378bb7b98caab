// Connection registry: the single source of truth for live websocket
// connections and room membership.
//
// One `RwLock` guards both the room index and the per-connection state so
// the two can never disagree. Broadcast paths take a read lock, snapshot
// the members, and send on the outbound channels outside the lock.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use lectern_common::types::Principal;

pub type ConnectionId = Uuid;
pub type ClassroomId = Uuid;

/// Payload of a connection's outbound channel. Frames are encoded once by
/// the broadcaster; the connection task owns the socket and writes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A pre-encoded JSON server frame.
    Frame(String),
    /// Liveness probe; the connection task sends a websocket ping.
    Ping,
    /// Heartbeat eviction: close the socket and tear the connection down.
    Shutdown,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Snapshot of one room member, taken under the read lock.
#[derive(Debug, Clone)]
pub struct RoomMember {
    pub conn_id: ConnectionId,
    pub principal: Principal,
    pub outbound: OutboundSender,
}

/// A connection the heartbeat sweep marked as dead.
#[derive(Debug, Clone)]
pub struct SweptConnection {
    pub conn_id: ConnectionId,
    pub principal: Principal,
}

#[derive(Debug)]
struct ConnectionEntry {
    principal: Principal,
    outbound: OutboundSender,
    rooms: HashSet<ClassroomId>,
    alive: bool,
}

#[derive(Debug, Default)]
struct RegistryInner {
    rooms: HashMap<ClassroomId, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    /// Track a newly authenticated connection. The connection starts alive
    /// and in no rooms.
    pub async fn register(
        &self,
        conn_id: ConnectionId,
        principal: Principal,
        outbound: OutboundSender,
    ) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            conn_id,
            ConnectionEntry { principal, outbound, rooms: HashSet::new(), alive: true },
        );
    }

    /// Add a connection to a room. Idempotent; returns false for unknown
    /// connections.
    pub async fn join(&self, conn_id: ConnectionId, classroom_id: ClassroomId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.connections.get_mut(&conn_id) else {
            return false;
        };
        entry.rooms.insert(classroom_id);
        inner.rooms.entry(classroom_id).or_default().insert(conn_id);
        true
    }

    /// Remove a connection from a room. Returns false if it was not a
    /// member. Empty rooms are dropped from the index.
    pub async fn leave(&self, conn_id: ConnectionId, classroom_id: ClassroomId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.connections.get_mut(&conn_id) else {
            return false;
        };
        if !entry.rooms.remove(&classroom_id) {
            return false;
        }
        remove_from_room_index(&mut inner.rooms, classroom_id, conn_id);
        true
    }

    /// Drop a connection entirely, returning the rooms it was in so the
    /// caller can announce the departure. Idempotent: a second call
    /// returns an empty list, which keeps departure announcements
    /// exactly-once.
    pub async fn deregister(&self, conn_id: ConnectionId) -> Vec<ClassroomId> {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.connections.remove(&conn_id) else {
            return Vec::new();
        };
        let rooms: Vec<ClassroomId> = entry.rooms.into_iter().collect();
        for classroom_id in &rooms {
            remove_from_room_index(&mut inner.rooms, *classroom_id, conn_id);
        }
        rooms
    }

    /// Snapshot the members of a room.
    pub async fn members_of(&self, classroom_id: ClassroomId) -> Vec<RoomMember> {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(&classroom_id) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|conn_id| {
                inner.connections.get(conn_id).map(|entry| RoomMember {
                    conn_id: *conn_id,
                    principal: entry.principal.clone(),
                    outbound: entry.outbound.clone(),
                })
            })
            .collect()
    }

    pub async fn is_member(&self, conn_id: ConnectionId, classroom_id: ClassroomId) -> bool {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(&conn_id)
            .map(|entry| entry.rooms.contains(&classroom_id))
            .unwrap_or(false)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }

    /// Record a heartbeat response from a connection.
    pub async fn mark_alive(&self, conn_id: ConnectionId) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.connections.get_mut(&conn_id) {
            entry.alive = true;
        }
    }

    /// One heartbeat tick over every connection.
    ///
    /// Connections that never answered the previous tick's ping get a
    /// `Shutdown` pushed onto their outbound channel and are reported to
    /// the caller; their tasks perform the actual teardown so departure
    /// announcements stay exactly-once. Everyone else is flipped to
    /// not-alive and pinged, to be judged on the next tick.
    pub async fn sweep(&self) -> Vec<SweptConnection> {
        let mut inner = self.inner.write().await;
        let mut swept = Vec::new();
        for (conn_id, entry) in inner.connections.iter_mut() {
            if entry.alive {
                entry.alive = false;
                let _ = entry.outbound.send(Outbound::Ping);
            } else {
                let _ = entry.outbound.send(Outbound::Shutdown);
                swept.push(SweptConnection { conn_id: *conn_id, principal: entry.principal.clone() });
            }
        }
        swept
    }
}

fn remove_from_room_index(
    rooms: &mut HashMap<ClassroomId, HashSet<ConnectionId>>,
    classroom_id: ClassroomId,
    conn_id: ConnectionId,
) {
    if let Some(members) = rooms.get_mut(&classroom_id) {
        members.remove(&conn_id);
        if members.is_empty() {
            rooms.remove(&classroom_id);
        }
    }
}
