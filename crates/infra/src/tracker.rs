//! Request State Tracker service: loads a request, applies one transition
//! and persists the request together with the events it produced.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use edugen_core::{CorrelationId, ExpectedVersion, RequestId};
use edugen_tracker::{
    ContentRequest, EventSeverity, GenerationResults, NewContentRequest, RequestEvent,
    RequestStatusSnapshot, StageName, TrackerError,
};

use crate::store::{RequestStore, StoreError};

#[derive(Debug, Clone, Error)]
pub enum TrackingError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TrackingError {
    /// Worth retrying by redelivery: storage outage or a lost version race.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TrackingError::Store(StoreError::Storage(_) | StoreError::Concurrency(_))
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TrackingError::Tracker(TrackerError::RequestNotFound(_))
                | TrackingError::Store(StoreError::NotFound(_))
        )
    }
}

#[derive(Clone)]
pub struct RequestTracker {
    store: Arc<dyn RequestStore>,
}

impl RequestTracker {
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    async fn load(&self, id: RequestId) -> Result<ContentRequest, TrackingError> {
        self.store
            .get(id)
            .await?
            .ok_or(TrackingError::Tracker(TrackerError::RequestNotFound(id)))
    }

    /// Load, mutate, save. `apply` returns its result plus the events to append.
    async fn mutate<T>(
        &self,
        id: RequestId,
        apply: impl FnOnce(&mut ContentRequest, DateTime<Utc>) -> Result<(T, Vec<RequestEvent>), TrackerError>,
    ) -> Result<T, TrackingError> {
        let mut request = self.load(id).await?;
        let expected = ExpectedVersion::Exact(request.version);
        let (value, events) = apply(&mut request, Utc::now())?;
        request.version = self.store.save(&request, expected, &events).await?;
        Ok(value)
    }

    pub async fn create_request(
        &self,
        new: NewContentRequest,
    ) -> Result<(RequestId, CorrelationId), TrackingError> {
        let (request, event) = ContentRequest::create(new, Utc::now())?;
        self.store.insert(&request, &[event]).await?;

        info!(
            request_id = %request.id,
            correlation_id = %request.correlation_id,
            student_id = %request.student_id,
            "content request created"
        );
        Ok((request.id, request.correlation_id))
    }

    pub async fn start_stage(&self, id: RequestId, stage: StageName) -> Result<(), TrackingError> {
        self.mutate(id, |req, now| Ok(((), vec![req.start_stage(stage, now)?])))
            .await?;
        info!(request_id = %id, stage = %stage, "stage started");
        Ok(())
    }

    pub async fn complete_stage(
        &self,
        id: RequestId,
        stage: StageName,
        output_data: Option<JsonValue>,
    ) -> Result<(), TrackingError> {
        self.mutate(id, |req, now| {
            Ok(((), vec![req.complete_stage(stage, output_data, now)?]))
        })
        .await?;
        info!(request_id = %id, stage = %stage, "stage completed");
        Ok(())
    }

    pub async fn fail_stage(
        &self,
        id: RequestId,
        stage: StageName,
        error_message: &str,
        error_details: Option<JsonValue>,
        retryable: bool,
    ) -> Result<(), TrackingError> {
        self.mutate(id, |req, now| {
            let event = req.fail_stage(stage, error_message, error_details, retryable, now)?;
            Ok(((), vec![event]))
        })
        .await?;
        warn!(request_id = %id, stage = %stage, retryable, error = error_message, "stage failed");
        Ok(())
    }

    /// Returns `false` once the stage's retry budget is spent; the refusal is
    /// still written to the audit log.
    pub async fn retry_stage(&self, id: RequestId, stage: StageName) -> Result<bool, TrackingError> {
        let mut request = self.load(id).await?;
        let expected = ExpectedVersion::Exact(request.version);
        let (retried, event) = request.retry_stage(stage, Utc::now())?;

        if retried {
            self.store.save(&request, expected, &[event]).await?;
            info!(request_id = %id, stage = %stage, "stage reset for retry");
        } else {
            self.store.append_event(&event).await?;
            warn!(request_id = %id, stage = %stage, "stage retry limit exceeded");
        }
        Ok(retried)
    }

    pub async fn complete_request(
        &self,
        id: RequestId,
        results: GenerationResults,
    ) -> Result<(), TrackingError> {
        self.mutate(id, |req, now| Ok(((), vec![req.complete(results, now)?])))
            .await?;
        info!(request_id = %id, "content request completed");
        Ok(())
    }

    pub async fn fail_request(
        &self,
        id: RequestId,
        error_message: &str,
        error_stage: Option<StageName>,
        error_details: Option<JsonValue>,
    ) -> Result<(), TrackingError> {
        self.mutate(id, |req, now| {
            let event = req.fail(
                error_message,
                error_stage.map(|s| s.as_str().to_string()),
                error_details,
                now,
            )?;
            Ok(((), vec![event]))
        })
        .await?;
        warn!(request_id = %id, error = error_message, "content request failed");
        Ok(())
    }

    pub async fn await_clarification(
        &self,
        id: RequestId,
        questions: Vec<String>,
        reasoning: Option<String>,
    ) -> Result<(), TrackingError> {
        let count = questions.len();
        self.mutate(id, |req, now| {
            Ok(((), vec![req.await_clarification(questions, reasoning, now)?]))
        })
        .await?;
        info!(request_id = %id, questions = count, "awaiting clarification");
        Ok(())
    }

    /// Mirror the broker's delivery count into `retry_count`. No write when
    /// the count does not grow.
    pub async fn record_delivery_attempt(
        &self,
        id: RequestId,
        delivery_attempt: u32,
    ) -> Result<u32, TrackingError> {
        let mut request = self.load(id).await?;
        let expected = ExpectedVersion::Exact(request.version);
        if let Some(event) = request.record_delivery_attempt(delivery_attempt, Utc::now())? {
            self.store.save(&request, expected, &[event]).await?;
        }
        Ok(request.retry_count)
    }

    pub async fn cancel_request(&self, id: RequestId, reason: &str) -> Result<(), TrackingError> {
        self.mutate(id, |req, now| Ok(((), vec![req.cancel(reason, now)?])))
            .await?;
        info!(request_id = %id, reason, "content request cancelled");
        Ok(())
    }

    /// Write a metadata key. Allowed on terminal requests.
    pub async fn annotate(
        &self,
        id: RequestId,
        key: &str,
        value: JsonValue,
    ) -> Result<(), TrackingError> {
        self.mutate(id, |req, now| {
            req.annotate(key, value, now);
            Ok(((), Vec::new()))
        })
        .await
    }

    /// Append an audit event. Failures are logged and swallowed.
    pub async fn log_event(
        &self,
        id: RequestId,
        event_type: &str,
        message: &str,
        stage: Option<StageName>,
        severity: EventSeverity,
        event_data: Option<JsonValue>,
    ) {
        let mut event = RequestEvent::new(id, event_type, severity, message, Utc::now());
        if let Some(stage) = stage {
            event = event.with_stage(stage);
        }
        if let Some(data) = event_data {
            event = event.with_data(data);
        }

        match self.store.append_event(&event).await {
            Ok(()) => debug!(request_id = %id, event_type, "event logged"),
            Err(err) => warn!(request_id = %id, event_type, error = %err, "failed to log event"),
        }
    }

    pub async fn get_request(&self, id: RequestId) -> Result<Option<ContentRequest>, TrackingError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn get_request_status(
        &self,
        id: RequestId,
    ) -> Result<RequestStatusSnapshot, TrackingError> {
        Ok(self.load(id).await?.snapshot())
    }

    pub async fn events(&self, id: RequestId) -> Result<Vec<RequestEvent>, TrackingError> {
        Ok(self.store.events(id).await?)
    }

    pub async fn ping(&self) -> Result<(), TrackingError> {
        Ok(self.store.ping().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edugen_core::StudentId;
    use edugen_tracker::{EventType, RequestStatus, StageStatus};
    use serde_json::json;

    use crate::store::InMemoryRequestStore;

    fn tracker() -> (RequestTracker, Arc<InMemoryRequestStore>) {
        let store = InMemoryRequestStore::arc();
        (RequestTracker::new(store.clone()), store)
    }

    async fn create(tracker: &RequestTracker) -> RequestId {
        tracker
            .create_request(NewContentRequest::new(StudentId::new("s-1"), "gravity"))
            .await
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn full_lifecycle_is_logged_in_order() {
        let (tracker, _) = tracker();
        let id = create(&tracker).await;

        tracker.start_stage(id, StageName::Validation).await.unwrap();
        tracker.complete_stage(id, StageName::Validation, None).await.unwrap();
        tracker
            .complete_request(
                id,
                GenerationResults {
                    video_url: "https://cdn/v.mp4".into(),
                    script_text: None,
                    thumbnail_url: None,
                },
            )
            .await
            .unwrap();

        let snap = tracker.get_request_status(id).await.unwrap();
        assert_eq!(snap.status, RequestStatus::Completed);
        assert_eq!(snap.progress_percentage, 100);

        let types: Vec<String> = tracker
            .events(id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                EventType::REQUEST_CREATED,
                EventType::STAGE_STARTED,
                EventType::STAGE_COMPLETED,
                EventType::REQUEST_COMPLETED,
            ]
        );
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let (tracker, _) = tracker();
        let err = tracker
            .start_stage(RequestId::new(), StageName::Validation)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn retry_refusal_is_logged_without_mutation() {
        let (tracker, _) = tracker();
        let id = tracker
            .create_request(
                NewContentRequest::new(StudentId::new("s"), "t").with_stage_max_retries(0),
            )
            .await
            .unwrap()
            .0;
        tracker.start_stage(id, StageName::Script).await.unwrap();
        tracker
            .fail_stage(id, StageName::Script, "boom", None, true)
            .await
            .unwrap();

        assert!(!tracker.retry_stage(id, StageName::Script).await.unwrap());
        let req = tracker.get_request(id).await.unwrap().unwrap();
        assert_eq!(req.stage(StageName::Script).unwrap().status, StageStatus::Failed);
        let last = tracker.events(id).await.unwrap().pop().unwrap();
        assert_eq!(last.event_type, EventType::RETRY_LIMIT_EXCEEDED);
    }

    #[tokio::test]
    async fn terminal_request_rejects_mutation_but_accepts_annotation() {
        let (tracker, _) = tracker();
        let id = create(&tracker).await;
        tracker.fail_request(id, "bad input", None, None).await.unwrap();

        let err = tracker.start_stage(id, StageName::Validation).await.unwrap_err();
        assert!(matches!(
            err,
            TrackingError::Tracker(TrackerError::InvalidRequestState { .. })
        ));
        tracker.annotate(id, "reviewed", json!(true)).await.unwrap();
    }

    #[tokio::test]
    async fn log_event_swallows_storage_errors() {
        let (tracker, store) = tracker();
        let id = create(&tracker).await;
        store.set_unavailable(true);
        tracker
            .log_event(id, "custom", "hello", None, EventSeverity::Info, None)
            .await;
        store.set_unavailable(false);
        assert_eq!(tracker.events(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delivery_attempts_raise_retry_count() {
        let (tracker, _) = tracker();
        let id = create(&tracker).await;
        assert_eq!(tracker.record_delivery_attempt(id, 1).await.unwrap(), 0);
        assert_eq!(tracker.record_delivery_attempt(id, 4).await.unwrap(), 3);
        assert_eq!(tracker.record_delivery_attempt(id, 2).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn storage_outage_is_transient() {
        let (tracker, store) = tracker();
        let id = create(&tracker).await;
        store.set_unavailable(true);
        let err = tracker.start_stage(id, StageName::Validation).await.unwrap_err();
        assert!(err.is_transient());
    }
}
