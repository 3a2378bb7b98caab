pub mod handler;
pub mod protocol;
pub mod router;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::{
    access::ClassroomAccessStore,
    auth::jwt::JwtSessionService,
    broadcast::RoomBroadcaster,
    metrics,
    registry::ConnectionRegistry,
    store::MessageStore,
};

/// Two-tick heartbeat: a connection that answers no ping for two
/// consecutive intervals is evicted.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Hard cap on a single inbound websocket frame.
pub const MAX_FRAME_BYTES: usize = 65_536;

/// History page size when the client does not ask for one.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Largest history page a client may request.
pub const MAX_HISTORY_LIMIT: i64 = 200;

/// Shared state for the websocket routes and the stats endpoint.
#[derive(Clone)]
pub struct ChatState {
    pub jwt: Arc<JwtSessionService>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: RoomBroadcaster,
    pub access: ClassroomAccessStore,
    pub store: MessageStore,
}

impl ChatState {
    pub fn new(
        jwt: Arc<JwtSessionService>,
        access: ClassroomAccessStore,
        store: MessageStore,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::default());
        let broadcaster = RoomBroadcaster::new(Arc::clone(&registry));
        Self { jwt, registry, broadcaster, access, store }
    }
}

/// WebSocket routes. `/ws/classroom/{classroom_id}` binds the connection
/// to one room (auto-join); `/ws` leaves room management to the client.
pub fn router(state: ChatState) -> Router {
    Router::new()
        .route("/ws", get(handler::ws_upgrade))
        .route("/ws/classroom/{classroom_id}", get(handler::ws_upgrade_classroom))
        .with_state(state)
}

/// Start the shared heartbeat sweep.
///
/// Connections that missed the previous tick's ping get a shutdown pushed
/// onto their outbound channel; their own tasks run the teardown so
/// departure announcements stay exactly-once.
pub fn spawn_heartbeat(registry: Arc<ConnectionRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // interval fires immediately; skip so the first real tick is one
        // full period in.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let swept = registry.sweep().await;
            if swept.is_empty() {
                continue;
            }
            metrics::increment_heartbeat_evictions(swept.len() as u64);
            for connection in &swept {
                warn!(
                    conn_id = %connection.conn_id,
                    user_id = %connection.principal.id,
                    "evicting unresponsive websocket connection"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use lectern_common::types::{Principal, Role};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::spawn_heartbeat;
    use crate::registry::{ConnectionRegistry, Outbound};

    #[tokio::test]
    async fn heartbeat_evicts_silent_connections_after_two_ticks() {
        let registry = Arc::new(ConnectionRegistry::default());
        let conn_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let principal = Principal {
            id: Uuid::new_v4(),
            name: "Grace".to_string(),
            role: Role::Learner,
            email: None,
        };
        registry.register(conn_id, principal, tx).await;

        let handle = spawn_heartbeat(Arc::clone(&registry), Duration::from_millis(20));

        // Tick one pings, tick two evicts.
        assert_eq!(rx.recv().await, Some(Outbound::Ping));
        assert_eq!(rx.recv().await, Some(Outbound::Shutdown));

        handle.abort();
    }

    #[tokio::test]
    async fn heartbeat_keeps_responsive_connections() {
        let registry = Arc::new(ConnectionRegistry::default());
        let conn_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let principal = Principal {
            id: Uuid::new_v4(),
            name: "Ada".to_string(),
            role: Role::Facilitator,
            email: None,
        };
        registry.register(conn_id, principal, tx).await;

        let handle = spawn_heartbeat(Arc::clone(&registry), Duration::from_millis(20));

        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(Outbound::Ping));
            registry.mark_alive(conn_id).await;
        }
        assert_eq!(registry.connection_count().await, 1);

        handle.abort();
    }
}
