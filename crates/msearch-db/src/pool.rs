//! Connection pool construction and migrations.

use std::time::Duration;

use sqlx::postgres::{PgPoolOptions, PgSslMode};
use sqlx::PgPool;

use crate::error::DbResult;

/// Database connection configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub require_ssl: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/mediasearch".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(10),
            require_ssl: false,
        }
    }
}

impl DbConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/mediasearch".to_string()),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            acquire_timeout: Duration::from_secs(
                std::env::var("DATABASE_ACQUIRE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            require_ssl: std::env::var("DATABASE_REQUIRE_SSL")
                .ok()
                .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

/// Build a connection pool and apply migrations up to the latest version.
/// Workers should call this once at startup; long-lived services hold the
/// returned pool for their entire lifetime.
pub async fn connect(config: &DbConfig) -> DbResult<PgPool> {
    let mut options: sqlx::postgres::PgConnectOptions = config.database_url.parse()?;
    if !config.require_ssl {
        options = options.ssl_mode(PgSslMode::Prefer);
    }
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}
