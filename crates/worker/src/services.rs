//! Infrastructure wiring shared by both worker binaries.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use edugen_ai::{AiError, ContentOrchestrator};
use edugen_infra::db::{self, PoolConfig};
use edugen_infra::external::HttpOrchestrator;
use edugen_infra::queue::RedisStreamsQueue;
use edugen_infra::{
    CircuitBreakerRegistry, ContentConsumer, InMemoryQueue, InMemoryRequestStore, MessageQueue,
    PostgresRequestStore, QueueError, RequestStore, RequestTracker, StoreError, TracingNotifier,
};

use crate::config::{ConfigError, QueueConfig, WorkerConfig};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Orchestrator(#[from] AiError),
}

/// Everything a request handler or the pull loop needs.
#[derive(Clone)]
pub struct WorkerServices {
    pub tracker: RequestTracker,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub consumer: ContentConsumer,
}

impl WorkerServices {
    pub fn new(
        store: Arc<dyn RequestStore>,
        orchestrator: Arc<dyn ContentOrchestrator>,
        config: &WorkerConfig,
    ) -> Self {
        let tracker = RequestTracker::new(store);
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker.clone()));
        let consumer = ContentConsumer::new(
            tracker.clone(),
            orchestrator,
            Arc::clone(&breakers),
            Arc::new(TracingNotifier),
        )
        .with_config(config.consumer.clone());

        Self {
            tracker,
            breakers,
            consumer,
        }
    }

    /// Wire storage and the HTTP orchestrator from configuration.
    pub async fn from_config(config: &WorkerConfig) -> Result<Self, ServiceError> {
        let orchestrator = HttpOrchestrator::new(config.orchestrator_url()?)?;
        let store = build_store(config.database.as_ref()).await?;
        Ok(Self::new(store, Arc::new(orchestrator), config))
    }

    /// In-memory storage, for tests and local runs.
    pub fn in_memory(orchestrator: Arc<dyn ContentOrchestrator>, config: &WorkerConfig) -> Self {
        Self::new(InMemoryRequestStore::arc(), orchestrator, config)
    }
}

pub async fn build_store(
    database: Option<&PoolConfig>,
) -> Result<Arc<dyn RequestStore>, ServiceError> {
    match database {
        Some(pool_config) => {
            let pool = db::connect(pool_config).await?;
            let store = PostgresRequestStore::new(pool);
            store.migrate().await?;
            info!("using postgres request store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory request store");
            Ok(InMemoryRequestStore::arc())
        }
    }
}

pub async fn build_queue(config: &QueueConfig) -> Result<Arc<dyn MessageQueue>, ServiceError> {
    let Some(url) = config.redis_url.as_deref() else {
        warn!("REDIS_URL not set; using in-memory queue");
        return Ok(InMemoryQueue::arc(config.max_delivery_attempts));
    };

    let queue = RedisStreamsQueue::new(
        url,
        config.stream.clone(),
        config.group.clone(),
        config.consumer.clone(),
    )?
    .with_max_delivery_attempts(config.max_delivery_attempts)
    .with_redelivery_delay(config.redelivery_delay);

    let setup = queue.clone();
    tokio::task::spawn_blocking(move || setup.ensure_consumer_group())
        .await
        .map_err(|e| QueueError::Internal(format!("consumer group setup panicked: {e}")))??;

    info!(stream = queue.stream_key(), dlq = queue.dlq_key(), "using redis streams queue");
    Ok(Arc::new(queue))
}
