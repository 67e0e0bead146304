//! Shared state for database-backed commands.
//!
//! Owns the connection pool and the query cache, and runs the cache sweep
//! for as long as the context is open. [`AppContext::close`] stops the
//! sweep and closes the pool.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::cache::{QueryCache, SweepHandle};
use crate::config::Config;
use crate::db;

pub struct AppContext {
    pub config: Config,
    pub pool: SqlitePool,
    pub cache: Arc<QueryCache>,
    sweeper: SweepHandle,
}

impl AppContext {
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        Ok(Self::with_pool(config, pool))
    }

    /// Build a context around an existing pool (must run inside a tokio runtime).
    pub fn with_pool(config: Config, pool: SqlitePool) -> Self {
        let cache = Arc::new(QueryCache::from_config(&config.cache));
        let sweeper = cache.start_sweeper();
        Self {
            config,
            pool,
            cache,
            sweeper,
        }
    }

    pub async fn close(self) {
        self.sweeper.stop().await;
        self.pool.close().await;
    }
}
