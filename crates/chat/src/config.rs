// Chat server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development.

use std::net::SocketAddr;

const DEV_JWT_SECRET: &str = "lectern_local_development_jwt_secret_32_chars!";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 20;

/// Core chat server configuration.
///
/// Constructed via [`ChatConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// JWT signing secret shared with the credential issuer.
    pub jwt_secret: String,
    /// PostgreSQL connection string. Absent means in-memory stores
    /// (local development and tests only).
    pub database_url: Option<String>,
    /// Upper bound on the PostgreSQL connection pool.
    pub db_max_connections: u32,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `lectern_chat=debug`).
    pub log_filter: String,
}

impl ChatConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `LECTERN_CHAT_HOST` | `0.0.0.0` |
    /// | `LECTERN_CHAT_PORT` | `8080` |
    /// | `LECTERN_CHAT_JWT_SECRET` | dev-only placeholder |
    /// | `LECTERN_CHAT_DATABASE_URL` | *(none — in-memory stores)* |
    /// | `LECTERN_CHAT_DB_MAX_CONNECTIONS` | `20` |
    /// | `LECTERN_CHAT_CORS_ORIGINS` | *(none — dev defaults)* |
    /// | `LECTERN_CHAT_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("LECTERN_CHAT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("LECTERN_CHAT_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret =
            env("LECTERN_CHAT_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let database_url = env("LECTERN_CHAT_DATABASE_URL").ok();
        let db_max_connections = env("LECTERN_CHAT_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
        let cors_origins = env("LECTERN_CHAT_CORS_ORIGINS").ok();

        let log_filter = env("LECTERN_CHAT_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self { listen_addr, jwt_secret, database_url, db_max_connections, cors_origins, log_filter }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}
