//! Persistence for content requests, their stages and their audit log.
//!
//! One request is stored as a unit: the request row, its stage rows and any
//! events produced by the mutation are written in one transaction, guarded by
//! the request's optimistic `version`.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use edugen_core::{CorrelationId, ExpectedVersion, RequestId};
use edugen_tracker::{ContentRequest, RequestEvent};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryRequestStore;
pub use postgres::PostgresRequestStore;

/// Request store operation error.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("request not found: {0}")]
    NotFound(RequestId),

    #[error("request already exists: {0}")]
    AlreadyExists(RequestId),

    /// Another request already carries this correlation id.
    #[error("correlation id already in use: {0}")]
    DuplicateCorrelationId(CorrelationId),

    /// The stored version moved since the request was loaded.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a new request with its stages and initial events.
    ///
    /// Both `id` and `correlation_id` are unique.
    async fn insert(
        &self,
        request: &ContentRequest,
        events: &[RequestEvent],
    ) -> Result<(), StoreError>;

    async fn get(&self, id: RequestId) -> Result<Option<ContentRequest>, StoreError>;

    /// Write back a mutated request and append `events`.
    ///
    /// Returns the new version.
    async fn save(
        &self,
        request: &ContentRequest,
        expected: ExpectedVersion,
        events: &[RequestEvent],
    ) -> Result<u64, StoreError>;

    /// Append one event without touching the request row.
    async fn append_event(&self, event: &RequestEvent) -> Result<(), StoreError>;

    /// Audit log of a request, oldest first.
    async fn events(&self, id: RequestId) -> Result<Vec<RequestEvent>, StoreError>;

    /// Trivial round trip used by readiness probes.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> RequestStore for Arc<S>
where
    S: RequestStore + ?Sized,
{
    async fn insert(
        &self,
        request: &ContentRequest,
        events: &[RequestEvent],
    ) -> Result<(), StoreError> {
        (**self).insert(request, events).await
    }

    async fn get(&self, id: RequestId) -> Result<Option<ContentRequest>, StoreError> {
        (**self).get(id).await
    }

    async fn save(
        &self,
        request: &ContentRequest,
        expected: ExpectedVersion,
        events: &[RequestEvent],
    ) -> Result<u64, StoreError> {
        (**self).save(request, expected, events).await
    }

    async fn append_event(&self, event: &RequestEvent) -> Result<(), StoreError> {
        (**self).append_event(event).await
    }

    async fn events(&self, id: RequestId) -> Result<Vec<RequestEvent>, StoreError> {
        (**self).events(id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        (**self).ping().await
    }
}
