//! In-memory request store for tests/dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use edugen_core::{ExpectedVersion, RequestId};
use edugen_tracker::{ContentRequest, RequestEvent};

use super::{RequestStore, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryRequestStore {
    requests: RwLock<HashMap<RequestId, ContentRequest>>,
    events: RwLock<HashMap<RequestId, Vec<RequestEvent>>>,
    unavailable: AtomicBool,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Simulate an outage: every call fails with `StoreError::Storage` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.requests.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("store unavailable".to_string()));
        }
        Ok(())
    }

    fn read_requests(
        &self,
    ) -> Result<RwLockReadGuard<'_, HashMap<RequestId, ContentRequest>>, StoreError> {
        self.requests.read().map_err(|_| poisoned())
    }

    fn write_requests(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<RequestId, ContentRequest>>, StoreError> {
        self.requests.write().map_err(|_| poisoned())
    }

    fn write_events(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<RequestId, Vec<RequestEvent>>>, StoreError> {
        self.events.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn insert(
        &self,
        request: &ContentRequest,
        events: &[RequestEvent],
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut requests = self.write_requests()?;
        if requests.contains_key(&request.id) {
            return Err(StoreError::AlreadyExists(request.id));
        }
        if requests
            .values()
            .any(|r| r.correlation_id == request.correlation_id)
        {
            return Err(StoreError::DuplicateCorrelationId(
                request.correlation_id.clone(),
            ));
        }
        let mut stored = request.clone();
        stored.version = 1;
        requests.insert(request.id, stored);
        self.write_events()?
            .entry(request.id)
            .or_default()
            .extend_from_slice(events);
        Ok(())
    }

    async fn get(&self, id: RequestId) -> Result<Option<ContentRequest>, StoreError> {
        self.check_available()?;
        Ok(self.read_requests()?.get(&id).cloned())
    }

    async fn save(
        &self,
        request: &ContentRequest,
        expected: ExpectedVersion,
        events: &[RequestEvent],
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut requests = self.write_requests()?;
        let current = requests
            .get(&request.id)
            .ok_or(StoreError::NotFound(request.id))?
            .version;
        if !expected.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "expected {expected:?}, found {current}"
            )));
        }

        let mut stored = request.clone();
        stored.version = current + 1;
        let version = stored.version;
        requests.insert(request.id, stored);
        self.write_events()?
            .entry(request.id)
            .or_default()
            .extend_from_slice(events);
        Ok(version)
    }

    async fn append_event(&self, event: &RequestEvent) -> Result<(), StoreError> {
        self.check_available()?;
        self.write_events()?
            .entry(event.request_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn events(&self, id: RequestId) -> Result<Vec<RequestEvent>, StoreError> {
        self.check_available()?;
        let events = self.events.read().map_err(|_| poisoned())?;
        Ok(events.get(&id).cloned().unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use edugen_core::{CorrelationId, StudentId};
    use edugen_tracker::{NewContentRequest, StageName};

    fn request() -> (ContentRequest, RequestEvent) {
        ContentRequest::create(
            NewContentRequest::new(StudentId::new("s"), "tides"),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn insert_then_get_assigns_first_version() {
        let store = InMemoryRequestStore::new();
        let (req, event) = request();
        store.insert(&req, &[event]).await.unwrap();

        let loaded = store.get(req.id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(store.events(req.id).await.unwrap().len(), 1);
        assert!(matches!(
            store.insert(&req, &[]).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn correlation_id_is_unique_across_requests() {
        let store = InMemoryRequestStore::new();
        let new = |query: &str| {
            ContentRequest::create(
                NewContentRequest::new(StudentId::new("s"), query)
                    .with_correlation_id(CorrelationId::from("dup")),
                Utc::now(),
            )
            .unwrap()
            .0
        };
        let first = new("tides");
        let second = new("moons");

        store.insert(&first, &[]).await.unwrap();
        assert!(matches!(
            store.insert(&second, &[]).await,
            Err(StoreError::DuplicateCorrelationId(ref c)) if c.as_str() == "dup"
        ));
        assert_eq!(store.len(), 1);
        assert!(store.get(second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_save_is_a_concurrency_error() {
        let store = InMemoryRequestStore::new();
        let (req, _) = request();
        store.insert(&req, &[]).await.unwrap();

        let mut a = store.get(req.id).await.unwrap().unwrap();
        let mut b = a.clone();
        let ev = a.start_stage(StageName::Validation, Utc::now()).unwrap();
        assert_eq!(
            store.save(&a, ExpectedVersion::Exact(a.version), &[ev]).await.unwrap(),
            2
        );

        b.start_stage(StageName::Validation, Utc::now()).unwrap();
        assert!(matches!(
            store.save(&b, ExpectedVersion::Exact(b.version), &[]).await,
            Err(StoreError::Concurrency(_))
        ));
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let store = InMemoryRequestStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.ping().await, Err(StoreError::Storage(_))));
        assert!(store.get(RequestId::new()).await.is_err());
        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }
}
