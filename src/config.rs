//! Service configuration from environment variables.

use std::time::Duration;

use crate::error::{ExchangeResult, ValidationError};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub max_db_connections: u32,
    /// Default bound on symbol-mutex acquisition when the request carries no
    /// deadline.
    pub lock_timeout: Duration,
    /// Per-write WebSocket deadline.
    pub ws_write_timeout: Duration,
    /// Per-client outbound queue capacity.
    pub client_queue_capacity: usize,
    /// Router → hub pipe capacity.
    pub bus_capacity: usize,
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> ExchangeResult<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ValidationError::MissingParameter("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            max_db_connections: env_parse("MAX_DB_CONNECTIONS", 16),
            lock_timeout: Duration::from_millis(env_parse("LOCK_TIMEOUT_MS", 5_000)),
            ws_write_timeout: Duration::from_secs(env_parse("WS_WRITE_TIMEOUT_SECS", 10)),
            client_queue_capacity: env_parse("CLIENT_QUEUE_CAPACITY", 256),
            bus_capacity: env_parse("BUS_CAPACITY", 4_096),
        })
    }
}
