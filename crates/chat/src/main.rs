use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lectern_chat::{
    access::ClassroomAccessStore,
    auth::jwt::JwtSessionService,
    build_router,
    config::ChatConfig,
    db,
    metrics::{self, ChatMetrics},
    store::MessageStore,
    ws::{self, ChatState, HEARTBEAT_INTERVAL_SECS},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ChatConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    metrics::set_global_metrics(Arc::new(ChatMetrics::default()));

    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set LECTERN_CHAT_JWT_SECRET in production");
    }

    let jwt =
        Arc::new(JwtSessionService::new(&config.jwt_secret).context("invalid chat JWT secret")?);

    let (access, store) = match &config.database_url {
        Some(database_url) => {
            let pool =
                db::pool::create_pg_pool(database_url, config.db_max_connections).await?;
            db::pool::check_pool_health(&pool).await?;
            db::migrations::run_migrations(&pool).await?;
            info!("connected to PostgreSQL");
            (ClassroomAccessStore::Postgres(pool.clone()), MessageStore::Postgres(pool))
        }
        None => {
            warn!(
                "LECTERN_CHAT_DATABASE_URL is unset; using in-memory stores, messages are not durable"
            );
            (ClassroomAccessStore::in_memory(), MessageStore::in_memory())
        }
    };

    let state = ChatState::new(jwt, access, store);
    let heartbeat = ws::spawn_heartbeat(
        Arc::clone(&state.registry),
        Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
    );

    let app = build_router(state, config.cors_origins.as_deref());

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind chat listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting chat server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("chat server exited unexpectedly")?;

    heartbeat.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
