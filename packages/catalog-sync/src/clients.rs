use catalog_state::infrastructure::redis::{connect, RedisLockManager, RedisStateBackend};
use catalog_state::CheckpointStore;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::extract::PostgresExtractor;
use crate::index::ElasticIndex;
use crate::metrics::SyncMetrics;
use crate::orchestrator::SyncOrchestrator;

/// Connections to the source database, the state store and the search index.
///
/// Opened once per process and shared by every stream run.
pub struct Clients {
    pub pool: PgPool,
    pub redis: redis::aio::ConnectionManager,
    pub elastic: ElasticIndex,
}

impl Clients {
    pub async fn connect(config: &SyncConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(config.postgres.connect_options())
            .await?;
        info!(host = %config.postgres.host, db = %config.postgres.db, "connected to postgres");

        let redis = connect(config.redis.connection_info()).await?;
        info!(host = %config.redis.host, db = config.redis.db, "connected to redis");

        let elastic = ElasticIndex::new(&config.elastic)?;

        Ok(Self {
            pool,
            redis,
            elastic,
        })
    }

    /// Orchestrator wired to these clients.
    pub fn orchestrator(&self, config: &SyncConfig, metrics: SyncMetrics) -> SyncOrchestrator {
        SyncOrchestrator::new(
            Arc::new(PostgresExtractor::new(self.pool.clone())),
            Arc::new(self.elastic.clone()),
            CheckpointStore::new(Arc::new(RedisStateBackend::new(self.redis.clone()))),
            Arc::new(RedisLockManager::new(self.redis.clone())),
            config,
        )
        .with_metrics(metrics)
    }

    /// Close the database pool. Redis and HTTP connections close on drop.
    pub async fn close(self) {
        self.pool.close().await;
        info!("connections closed");
    }
}
