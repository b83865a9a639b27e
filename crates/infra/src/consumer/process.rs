use std::sync::Arc;

use serde_json::json;
use tracing::{Instrument, Span, debug, field, info, info_span, warn};

use edugen_ai::{AiError, ContentOrchestrator, GeneratedContent, GenerationOutcome};
use edugen_core::{RequestId, StudentId};
use edugen_tracker::{
    ContentRequest, GenerationResults, NewContentRequest, RequestStatus, StageName, StageStatus,
    TrackerError,
};

use super::message::ContentMessage;
use super::{ConsumerConfig, OutcomeKind, ProcessOutcome};
use crate::circuit_breaker::{BreakerError, CircuitBreakerRegistry};
use crate::notify::{Notification, NotificationPublisher};
use crate::store::StoreError;
use crate::tracker::{RequestTracker, TrackingError};

/// Drives one content-generation message from payload to settled outcome.
///
/// Safe to run concurrently with itself; duplicate deliveries are caught by
/// the request's persisted status.
#[derive(Clone)]
pub struct ContentConsumer {
    tracker: RequestTracker,
    orchestrator: Arc<dyn ContentOrchestrator>,
    breakers: Arc<CircuitBreakerRegistry>,
    notifier: Arc<dyn NotificationPublisher>,
    config: ConsumerConfig,
}

impl ContentConsumer {
    pub fn new(
        tracker: RequestTracker,
        orchestrator: Arc<dyn ContentOrchestrator>,
        breakers: Arc<CircuitBreakerRegistry>,
        notifier: Arc<dyn NotificationPublisher>,
    ) -> Self {
        Self {
            tracker,
            orchestrator,
            breakers,
            notifier,
            config: ConsumerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Process one raw payload. Never fails: every path maps to an outcome.
    pub async fn process(&self, data: &[u8], delivery_attempt: u32) -> ProcessOutcome {
        let message = match ContentMessage::decode(data) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, delivery_attempt, "rejecting invalid message");
                return ProcessOutcome::new(OutcomeKind::Rejected, None).with_detail(err.to_string());
            }
        };

        let span = info_span!(
            "content_message",
            request_id = %message.request_id,
            correlation_id = field::Empty,
            delivery_attempt,
        );
        self.handle(message, delivery_attempt).instrument(span).await
    }

    async fn handle(&self, message: ContentMessage, delivery_attempt: u32) -> ProcessOutcome {
        let id = message.request_id;

        let request = match self.load_or_create(&message).await {
            Ok(request) => request,
            Err(err) => return self.tracking_outcome(id, err).await,
        };
        Span::current().record("correlation_id", request.correlation_id.as_str());

        if is_settled(request.status) {
            info!(status = %request.status, "request already settled, acknowledging duplicate");
            return ProcessOutcome::new(OutcomeKind::Duplicate, Some(id))
                .with_detail(request.status.as_str());
        }

        match self.tracker.record_delivery_attempt(id, delivery_attempt).await {
            Ok(retry_count) if delivery_attempt > self.config.poison_warning_threshold => warn!(
                retry_count,
                threshold = self.config.poison_warning_threshold,
                "message redelivered past warning threshold, possible poison message"
            ),
            Ok(_) => {}
            Err(err) => return self.tracking_outcome(id, err).await,
        }

        if let Err(err) = self.dispatch(&request, &message).await {
            return self.tracking_outcome(id, err).await;
        }
        self.notify_progress(
            &request,
            RequestStatus::GeneratingScript,
            StageName::Script.start_progress(),
            "Generating content",
        )
        .await;

        let generation = message.generation_request(request.correlation_id.clone());
        let breaker = self.breakers.get_or_create(&self.config.breaker_name);
        let call_timeout = breaker.config().call_timeout;
        let orchestrator = Arc::clone(&self.orchestrator);

        let result = breaker
            .call(|| async move {
                match tokio::time::timeout(call_timeout, orchestrator.generate(generation)).await {
                    Ok(result) => result,
                    Err(_) => Err(AiError::Timeout(call_timeout)),
                }
            })
            .await;

        match result {
            Ok(GenerationOutcome::Completed(content)) => self.finish(&request, content, false).await,
            Ok(GenerationOutcome::Cached(content)) => self.finish(&request, content, true).await,
            Ok(GenerationOutcome::ClarificationNeeded { questions, reasoning }) => {
                self.clarify(&request, questions, reasoning).await
            }
            Ok(GenerationOutcome::Failed { message }) => {
                let details = json!({ "kind": "orchestrator_failed" });
                self.fail(&request, OutcomeKind::Failed, &message, details).await
            }
            Err(BreakerError::Open { name }) => {
                let details = json!({ "kind": "circuit_open", "breaker": name });
                let message = format!("circuit breaker '{name}' is open");
                self.fail(&request, OutcomeKind::CircuitOpen, &message, details).await
            }
            Err(BreakerError::Inner(err)) => {
                let kind = match err {
                    AiError::Timeout(_) => "timeout",
                    _ => "orchestrator_error",
                };
                let details = json!({ "kind": kind });
                self.fail(&request, OutcomeKind::Failed, &err.to_string(), details).await
            }
        }
    }

    /// Fetch the tracking row, creating it from the message when the producer
    /// did not.
    async fn load_or_create(&self, message: &ContentMessage) -> Result<ContentRequest, TrackingError> {
        let id = message.request_id;
        if let Some(request) = self.tracker.get_request(id).await? {
            return Ok(request);
        }
        warn!(request_id = %id, "request not found in tracker, creating it from the message");

        let mut new = NewContentRequest::new(
            StudentId::new(message.student_id.clone()),
            message.student_query.clone(),
        )
        .with_id(id)
        .with_grade_level(message.grade_level)
        .with_metadata("requested_modalities", json!(message.requested_modalities));
        if let Some(correlation_id) = &message.correlation_id {
            new = new.with_correlation_id(correlation_id.clone());
        }
        if let Some(interest) = &message.interest {
            new = new.with_metadata("interest", json!(interest));
        }

        match self.tracker.create_request(new).await {
            Ok(_) => {}
            // Another delivery created it first.
            Err(TrackingError::Store(StoreError::AlreadyExists(_))) => {
                debug!(request_id = %id, "request created concurrently");
            }
            Err(err) => return Err(err),
        }

        self.tracker
            .get_request(id)
            .await?
            .ok_or(TrackingError::Tracker(TrackerError::RequestNotFound(id)))
    }

    /// Validation, then the script stage the orchestrator call runs under.
    /// Stages finished by an earlier delivery are not repeated.
    async fn dispatch(
        &self,
        request: &ContentRequest,
        message: &ContentMessage,
    ) -> Result<(), TrackingError> {
        let id = request.id;
        let done = |stage| {
            request
                .stage(stage)
                .is_some_and(|s| s.status == StageStatus::Completed)
        };

        if !done(StageName::Validation) {
            self.tracker.start_stage(id, StageName::Validation).await?;
            self.tracker
                .complete_stage(
                    id,
                    StageName::Validation,
                    Some(json!({
                        "grade_level": message.grade_level,
                        "requested_modalities": message.requested_modalities,
                    })),
                )
                .await?;
        }
        if !done(StageName::Script) {
            self.tracker.start_stage(id, StageName::Script).await?;
        }
        Ok(())
    }

    async fn finish(
        &self,
        request: &ContentRequest,
        content: GeneratedContent,
        cached: bool,
    ) -> ProcessOutcome {
        let id = request.id;
        let results = GenerationResults {
            video_url: content.video_url,
            script_text: content.script_text,
            thumbnail_url: content.thumbnail_url,
        };
        if let Err(err) = self.tracker.complete_request(id, results).await {
            return self.tracking_outcome(id, err).await;
        }

        info!(cached, "content generated");
        self.notify_progress(request, RequestStatus::Completed, 100, "Content ready")
            .await;
        let outcome = ProcessOutcome::new(OutcomeKind::Completed, Some(id));
        if cached { outcome.with_detail("cached") } else { outcome }
    }

    async fn clarify(
        &self,
        request: &ContentRequest,
        questions: Vec<String>,
        reasoning: Option<String>,
    ) -> ProcessOutcome {
        let id = request.id;
        if let Err(err) = self.tracker.await_clarification(id, questions, reasoning).await {
            return self.tracking_outcome(id, err).await;
        }

        self.notify_progress(
            request,
            RequestStatus::AwaitingClarification,
            StageName::Script.start_progress(),
            "Clarification needed",
        )
        .await;
        ProcessOutcome::new(OutcomeKind::ClarificationRequested, Some(id))
    }

    /// Record the failure on the request, then hand back a nack outcome.
    async fn fail(
        &self,
        request: &ContentRequest,
        kind: OutcomeKind,
        message: &str,
        details: serde_json::Value,
    ) -> ProcessOutcome {
        let id = request.id;
        warn!(error = message, details = %details, "content generation failed");

        if let Err(err) = self
            .tracker
            .fail_request(id, message, Some(StageName::Script), Some(details))
            .await
        {
            return classify(id, &err);
        }

        let notification = Notification {
            request_id: id,
            correlation_id: request.correlation_id.clone(),
            status: RequestStatus::Failed,
            progress_percentage: request
                .progress_percentage
                .max(StageName::Script.start_progress()),
            message: message.to_string(),
        };
        if let Err(err) = self.notifier.failure(&notification).await {
            warn!(error = %err, "failure notification not delivered");
        }
        ProcessOutcome::new(kind, Some(id)).with_detail(message)
    }

    async fn notify_progress(
        &self,
        request: &ContentRequest,
        status: RequestStatus,
        progress: u8,
        message: &str,
    ) {
        let notification = Notification {
            request_id: request.id,
            correlation_id: request.correlation_id.clone(),
            status,
            progress_percentage: progress,
            message: message.to_string(),
        };
        if let Err(err) = self.notifier.progress(&notification).await {
            warn!(error = %err, "progress notification not delivered");
        }
    }

    /// Map a tracker error to an outcome. A rejected transition on an
    /// existing request is recorded as a request failure before the nack.
    async fn tracking_outcome(&self, id: RequestId, err: TrackingError) -> ProcessOutcome {
        let outcome = classify(id, &err);
        if outcome.kind != OutcomeKind::Failed {
            return outcome;
        }

        let details = json!({ "kind": "tracking_error" });
        match self
            .tracker
            .fail_request(id, &err.to_string(), None, Some(details))
            .await
        {
            Ok(()) => info!(request_id = %id, "request failed after rejected transition"),
            Err(e) if e.is_not_found() => {
                debug!(request_id = %id, "no tracking row to record the failure on");
            }
            Err(e) => warn!(request_id = %id, error = %e, "could not record request failure"),
        }
        outcome
    }
}

fn classify(id: RequestId, err: &TrackingError) -> ProcessOutcome {
    if err.is_transient() {
        warn!(request_id = %id, error = %err, "tracker storage unavailable");
        return ProcessOutcome::new(OutcomeKind::StorageUnavailable, Some(id))
            .with_detail(err.to_string());
    }
    match err {
        // A concurrent delivery settled the request first.
        TrackingError::Tracker(TrackerError::InvalidRequestState { status, .. })
            if is_settled(*status) =>
        {
            info!(request_id = %id, status = %status, "request settled concurrently");
            ProcessOutcome::new(OutcomeKind::Duplicate, Some(id)).with_detail(err.to_string())
        }
        // Redelivery cannot fix a correlation id owned by another request.
        TrackingError::Store(StoreError::DuplicateCorrelationId(correlation_id)) => {
            warn!(
                request_id = %id,
                correlation_id = %correlation_id,
                "rejecting message whose correlation id belongs to another request"
            );
            ProcessOutcome::new(OutcomeKind::Rejected, Some(id)).with_detail(err.to_string())
        }
        _ => {
            warn!(request_id = %id, error = %err, "tracker rejected transition");
            ProcessOutcome::new(OutcomeKind::Failed, Some(id)).with_detail(err.to_string())
        }
    }
}

/// Nothing left to do for this request on redelivery.
fn is_settled(status: RequestStatus) -> bool {
    status.is_terminal() || status == RequestStatus::AwaitingClarification
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use edugen_ai::{GenerationRequest, ScriptedOrchestrator};
    use edugen_core::CorrelationId;
    use edugen_tracker::EventType;

    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::consumer::{ConsumerConfig, Disposition};
    use crate::notify::NoopNotifier;
    use crate::store::InMemoryRequestStore;

    struct Harness {
        consumer: ContentConsumer,
        store: Arc<InMemoryRequestStore>,
    }

    fn harness(orchestrator: Arc<dyn ContentOrchestrator>) -> Harness {
        harness_with(orchestrator, CircuitBreakerConfig::default())
    }

    fn harness_with(orchestrator: Arc<dyn ContentOrchestrator>, breaker: CircuitBreakerConfig) -> Harness {
        let store = InMemoryRequestStore::arc();
        let consumer = ContentConsumer::new(
            RequestTracker::new(store.clone()),
            orchestrator,
            Arc::new(CircuitBreakerRegistry::new(breaker)),
            Arc::new(NoopNotifier),
        );
        Harness { consumer, store }
    }

    fn completed() -> GenerationOutcome {
        GenerationOutcome::Completed(GeneratedContent {
            video_url: "https://cdn.example/v.mp4".into(),
            script_text: Some("Volcanoes form when...".into()),
            thumbnail_url: Some("https://cdn.example/t.png".into()),
        })
    }

    fn payload(id: RequestId) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "request_id": id.to_string(),
            "correlation_id": "trace-1",
            "student_id": "stu-42",
            "student_query": "How do volcanoes form?",
            "grade_level": 8,
            "interest": "minecraft"
        }))
        .unwrap()
    }

    async fn seed(h: &Harness) -> RequestId {
        seed_as(h, "trace-1").await
    }

    async fn seed_as(h: &Harness, correlation_id: &str) -> RequestId {
        h.consumer
            .tracker()
            .create_request(
                NewContentRequest::new(StudentId::new("stu-42"), "How do volcanoes form?")
                    .with_correlation_id(CorrelationId::from(correlation_id)),
            )
            .await
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn completed_generation_finishes_request() {
        let orch = Arc::new(ScriptedOrchestrator::always(completed()));
        let h = harness(orch.clone());
        let id = seed(&h).await;

        let outcome = h.consumer.process(&payload(id), 1).await;
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert_eq!(outcome.disposition(), Disposition::Ack);

        let status = h.consumer.tracker().get_request_status(id).await.unwrap();
        assert_eq!(status.status, RequestStatus::Completed);
        assert_eq!(status.progress_percentage, 100);
        assert_eq!(status.video_url.as_deref(), Some("https://cdn.example/v.mp4"));

        let req = h.consumer.tracker().get_request(id).await.unwrap().unwrap();
        assert_eq!(req.stage(StageName::Validation).unwrap().status, StageStatus::Completed);
        assert_eq!(req.stage(StageName::Script).unwrap().status, StageStatus::Completed);
        assert_eq!(req.stage(StageName::Video).unwrap().status, StageStatus::Skipped);

        let sent = &orch.received()[0];
        assert_eq!(sent.query, "How do volcanoes form?");
        assert_eq!(sent.interest.as_deref(), Some("minecraft"));
        assert_eq!(sent.correlation_id.as_str(), "trace-1");
    }

    #[tokio::test]
    async fn cached_generation_is_a_success() {
        let content = GeneratedContent {
            video_url: "https://cdn.example/cached.mp4".into(),
            script_text: None,
            thumbnail_url: None,
        };
        let h = harness(Arc::new(ScriptedOrchestrator::always(GenerationOutcome::Cached(content))));
        let id = seed(&h).await;

        let outcome = h.consumer.process(&payload(id), 1).await;
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert_eq!(outcome.detail.as_deref(), Some("cached"));
    }

    #[tokio::test]
    async fn clarification_is_persisted_and_acked() {
        let questions = vec!["Which volcano type?".to_string(), "Any region?".to_string()];
        let h = harness(Arc::new(ScriptedOrchestrator::always(
            GenerationOutcome::ClarificationNeeded {
                questions: questions.clone(),
                reasoning: Some("query too broad".into()),
            },
        )));
        let id = seed(&h).await;

        let outcome = h.consumer.process(&payload(id), 1).await;
        assert_eq!(outcome.kind, OutcomeKind::ClarificationRequested);
        assert_eq!(outcome.disposition(), Disposition::Ack);

        let req = h.consumer.tracker().get_request(id).await.unwrap().unwrap();
        assert_eq!(req.status, RequestStatus::AwaitingClarification);
        assert!(!req.status.is_terminal());
        assert_eq!(req.clarification_questions(), questions);
    }

    #[tokio::test]
    async fn breaker_opens_after_consecutive_orchestrator_errors() {
        let orch = Arc::new(ScriptedOrchestrator::failing("upstream down"));
        let h = harness(orch.clone());

        for n in 0..5 {
            let id = seed_as(&h, &format!("trace-{n}")).await;
            let outcome = h.consumer.process(&payload(id), 1).await;
            assert_eq!(outcome.kind, OutcomeKind::Failed);
            assert_eq!(outcome.disposition(), Disposition::Nack);
        }

        let id = seed_as(&h, "trace-5").await;
        let outcome = h.consumer.process(&payload(id), 1).await;
        assert_eq!(outcome.kind, OutcomeKind::CircuitOpen);
        assert_eq!(outcome.disposition(), Disposition::Nack);
        assert_eq!(orch.calls(), 5);

        let req = h.consumer.tracker().get_request(id).await.unwrap().unwrap();
        assert_eq!(req.status, RequestStatus::Failed);
        assert_eq!(req.error_stage.as_deref(), Some("script"));
        assert_eq!(
            req.error_details,
            Some(json!({ "kind": "circuit_open", "breaker": "content_generation" }))
        );

        let breaker = h.consumer.breakers().get("content_generation").unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn invalid_request_id_is_rejected_without_side_effects() {
        let orch = Arc::new(ScriptedOrchestrator::always(completed()));
        let h = harness(orch.clone());

        let data = serde_json::to_vec(&json!({
            "request_id": "not-a-uuid",
            "student_id": "stu-42",
            "student_query": "q",
            "grade_level": 3
        }))
        .unwrap();
        let outcome = h.consumer.process(&data, 4).await;

        assert_eq!(outcome.kind, OutcomeKind::Rejected);
        assert_eq!(outcome.disposition(), Disposition::Reject);
        assert_eq!(outcome.request_id, None);
        assert!(h.store.is_empty());
        assert_eq!(orch.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let orch = Arc::new(ScriptedOrchestrator::always(completed()));
        let h = harness(orch.clone());

        let outcome = h.consumer.process(b"{\"request_id\": ", 1).await;
        assert_eq!(outcome.kind, OutcomeKind::Rejected);
        assert!(h.store.is_empty());
        assert_eq!(orch.calls(), 0);
    }

    #[tokio::test]
    async fn redelivery_of_settled_request_is_a_duplicate() {
        let orch = Arc::new(ScriptedOrchestrator::always(completed()));
        let h = harness(orch.clone());
        let id = seed(&h).await;

        h.consumer.process(&payload(id), 1).await;
        let before = h.consumer.tracker().get_request(id).await.unwrap().unwrap();

        let outcome = h.consumer.process(&payload(id), 2).await;
        assert_eq!(outcome.kind, OutcomeKind::Duplicate);
        assert_eq!(outcome.disposition(), Disposition::Ack);
        assert_eq!(orch.calls(), 1);

        let after = h.consumer.tracker().get_request(id).await.unwrap().unwrap();
        assert_eq!(after.version, before.version);
        assert_eq!(after.progress_percentage, 100);
        assert_eq!(after.retry_count, before.retry_count);
    }

    #[tokio::test]
    async fn failed_request_is_not_reprocessed_on_redelivery() {
        let orch = Arc::new(ScriptedOrchestrator::failing("boom"));
        let h = harness(orch.clone());
        let id = seed(&h).await;
        assert_eq!(h.consumer.process(&payload(id), 1).await.kind, OutcomeKind::Failed);
        assert_eq!(h.consumer.process(&payload(id), 2).await.kind, OutcomeKind::Duplicate);
        assert_eq!(orch.calls(), 1);

        let req = h.consumer.tracker().get_request(id).await.unwrap().unwrap();
        assert_eq!(req.status, RequestStatus::Failed);
        assert_eq!(req.error_message.as_deref(), Some("internal error: boom"));
    }

    #[tokio::test]
    async fn unknown_request_is_created_from_message() {
        let h = harness(Arc::new(ScriptedOrchestrator::always(completed())));
        let id = RequestId::new();

        let outcome = h.consumer.process(&payload(id), 1).await;
        assert_eq!(outcome.kind, OutcomeKind::Completed);

        let req = h.consumer.tracker().get_request(id).await.unwrap().unwrap();
        assert_eq!(req.correlation_id.as_str(), "trace-1");
        assert_eq!(req.grade_level, Some(8));
        assert_eq!(req.request_metadata.get("interest"), Some(&json!("minecraft")));
    }

    #[tokio::test]
    async fn correlation_id_owned_by_another_request_is_rejected() {
        let orch = Arc::new(ScriptedOrchestrator::always(completed()));
        let h = harness(orch.clone());
        let owner = seed(&h).await;

        let stranger = RequestId::new();
        let outcome = h.consumer.process(&payload(stranger), 1).await;
        assert_eq!(outcome.kind, OutcomeKind::Rejected);
        assert_eq!(outcome.disposition(), Disposition::Reject);
        assert_eq!(outcome.request_id, Some(stranger));
        assert_eq!(orch.calls(), 0);

        assert_eq!(h.store.len(), 1);
        assert!(h.consumer.tracker().get_request(stranger).await.unwrap().is_none());
        let req = h.consumer.tracker().get_request(owner).await.unwrap().unwrap();
        assert_eq!(req.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn rejected_transition_fails_request_before_nack() {
        let orch = Arc::new(ScriptedOrchestrator::always(completed()));
        let h = harness(orch.clone());
        let id = seed(&h).await;
        h.consumer
            .tracker()
            .start_stage(id, StageName::Video)
            .await
            .unwrap();

        let outcome = h.consumer.process(&payload(id), 1).await;
        assert_eq!(outcome.kind, OutcomeKind::Failed);
        assert_eq!(outcome.disposition(), Disposition::Nack);
        assert_eq!(orch.calls(), 0);

        let req = h.consumer.tracker().get_request(id).await.unwrap().unwrap();
        assert_eq!(req.status, RequestStatus::Failed);
        assert_eq!(req.error_details, Some(json!({ "kind": "tracking_error" })));
        assert_eq!(req.stage(StageName::Video).unwrap().status, StageStatus::Failed);

        assert_eq!(h.consumer.process(&payload(id), 2).await.kind, OutcomeKind::Duplicate);
    }

    #[tokio::test]
    async fn delivery_attempts_raise_retry_count() {
        let h = harness(Arc::new(
            ScriptedOrchestrator::always(completed()).then(GenerationOutcome::Failed {
                message: "render failed".into(),
            }),
        ));
        let h = Harness {
            consumer: h.consumer.with_config(ConsumerConfig::default().with_poison_warning_threshold(1)),
            store: h.store,
        };
        let id = seed(&h).await;

        let outcome = h.consumer.process(&payload(id), 3).await;
        assert_eq!(outcome.kind, OutcomeKind::Failed);

        let req = h.consumer.tracker().get_request(id).await.unwrap().unwrap();
        assert_eq!(req.retry_count, 2);
        assert_eq!(req.error_message.as_deref(), Some("render failed"));
        assert_eq!(req.error_details, Some(json!({ "kind": "orchestrator_failed" })));

        let events = h.consumer.tracker().events(id).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == EventType::DELIVERY_RETRY));
    }

    #[tokio::test]
    async fn storage_outage_nacks_without_calling_orchestrator() {
        let orch = Arc::new(ScriptedOrchestrator::always(completed()));
        let h = harness(orch.clone());
        let id = seed(&h).await;
        h.store.set_unavailable(true);

        let outcome = h.consumer.process(&payload(id), 1).await;
        assert_eq!(outcome.kind, OutcomeKind::StorageUnavailable);
        assert_eq!(outcome.disposition(), Disposition::Nack);
        assert_eq!(orch.calls(), 0);
    }

    struct SlowOrchestrator;

    #[async_trait]
    impl ContentOrchestrator for SlowOrchestrator {
        async fn generate(&self, _: GenerationRequest) -> Result<GenerationOutcome, AiError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(completed())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn orchestrator_call_is_bounded_by_breaker_timeout() {
        let h = harness_with(
            Arc::new(SlowOrchestrator),
            CircuitBreakerConfig::default().with_call_timeout(Duration::from_secs(5)),
        );
        let id = seed(&h).await;

        let outcome = h.consumer.process(&payload(id), 1).await;
        assert_eq!(outcome.kind, OutcomeKind::Failed);

        let req = h.consumer.tracker().get_request(id).await.unwrap().unwrap();
        let details: &Value = req.error_details.as_ref().unwrap();
        assert_eq!(details["kind"], "timeout");

        let stats = h.consumer.breakers().get("content_generation").unwrap().stats();
        assert_eq!(stats.total_failures, 1);
    }
}
