//! Postgres connection pool wiring.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::store::StoreError;

/// Bounded pool: a fixed core plus a small overflow.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub database_url: String,
    pub pool_size: u32,
    pub max_overflow: u32,
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            pool_size: 5,
            max_overflow: 2,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_max_overflow(mut self, max_overflow: u32) -> Self {
        self.max_overflow = max_overflow;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn max_connections(&self) -> u32 {
        (self.pool_size + self.max_overflow).max(1)
    }
}

/// Open the pool. Connections are established lazily beyond `pool_size`.
pub async fn connect(config: &PoolConfig) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .min_connections(config.pool_size.min(config.max_connections()))
        .max_connections(config.max_connections())
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.database_url)
        .await
        .map_err(|e| StoreError::Storage(format!("failed to connect to database: {e}")))?;

    info!(
        pool_size = config.pool_size,
        max_overflow = config.max_overflow,
        "database pool ready"
    );
    Ok(pool)
}
