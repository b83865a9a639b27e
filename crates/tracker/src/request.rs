//! The content-generation request record and its transition rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

use edugen_core::{AggregateRoot, CorrelationId, DomainError, RequestId, StudentId};

use crate::error::TrackerError;
use crate::event::{EventSeverity, EventType, RequestEvent};
use crate::snapshot::{RequestStatusSnapshot, StageSnapshot};
use crate::status::{RequestStatus, StageName, StageStatus};
use crate::CLARIFICATION_METADATA_KEY;

/// Default retry budget of a single stage.
pub const DEFAULT_STAGE_MAX_RETRIES: u32 = 3;

/// Input for creating a request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContentRequest {
    pub id: Option<RequestId>,
    pub correlation_id: Option<CorrelationId>,
    pub student_id: StudentId,
    pub topic: String,
    pub grade_level: Option<i32>,
    pub metadata: Map<String, JsonValue>,
    pub stage_max_retries: u32,
}

impl NewContentRequest {
    pub fn new(student_id: StudentId, topic: impl Into<String>) -> Self {
        Self {
            id: None,
            correlation_id: None,
            student_id,
            topic: topic.into(),
            grade_level: None,
            metadata: Map::new(),
            stage_max_retries: DEFAULT_STAGE_MAX_RETRIES,
        }
    }

    /// Use an id allocated by the enqueue path instead of a fresh one.
    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_grade_level(mut self, grade_level: i32) -> Self {
        self.grade_level = Some(grade_level);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_stage_max_retries(mut self, max_retries: u32) -> Self {
        self.stage_max_retries = max_retries;
        self
    }
}

/// Result payload stored on completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResults {
    pub video_url: String,
    pub script_text: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// One tracked pipeline stage of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStage {
    pub stage_name: StageName,
    pub stage_order: i32,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub output_data: Option<JsonValue>,
    pub error_message: Option<String>,
    pub error_details: Option<JsonValue>,
}

impl RequestStage {
    pub fn pending(stage_name: StageName, max_retries: u32) -> Self {
        Self {
            stage_name,
            stage_order: stage_name.order(),
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            retry_count: 0,
            max_retries,
            output_data: None,
            error_message: None,
            error_details: None,
        }
    }

    fn finish(&mut self, status: StageStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
        self.duration_seconds = self.started_at.map(|started| seconds_between(started, now));
    }
}

/// A content-generation job with its ordered stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRequest {
    pub id: RequestId,
    pub correlation_id: CorrelationId,
    pub student_id: StudentId,
    pub topic: String,
    pub grade_level: Option<i32>,
    pub status: RequestStatus,
    pub current_stage: Option<StageName>,
    pub progress_percentage: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub video_url: Option<String>,
    pub script_text: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error_message: Option<String>,
    pub error_stage: Option<String>,
    pub error_details: Option<JsonValue>,
    pub retry_count: u32,
    pub total_duration_seconds: Option<f64>,
    pub request_metadata: Map<String, JsonValue>,
    pub stages: Vec<RequestStage>,
    /// Storage revision; bumped by the store on every save.
    pub version: u64,
}

impl AggregateRoot for ContentRequest {
    type Id = RequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl ContentRequest {
    /// Build a pending request with one pending stage per pipeline step.
    pub fn create(
        new: NewContentRequest,
        now: DateTime<Utc>,
    ) -> Result<(Self, RequestEvent), TrackerError> {
        if new.student_id.as_str().trim().is_empty() {
            return Err(DomainError::validation("student_id cannot be empty").into());
        }
        if new.topic.trim().is_empty() {
            return Err(DomainError::validation("topic cannot be empty").into());
        }

        let id = new.id.unwrap_or_default();
        let correlation_id = new.correlation_id.unwrap_or_else(CorrelationId::generate);
        let stages = StageName::ALL
            .iter()
            .map(|stage| RequestStage::pending(*stage, new.stage_max_retries))
            .collect();

        let request = Self {
            id,
            correlation_id,
            student_id: new.student_id,
            topic: new.topic,
            grade_level: new.grade_level,
            status: RequestStatus::Pending,
            current_stage: None,
            progress_percentage: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            video_url: None,
            script_text: None,
            thumbnail_url: None,
            error_message: None,
            error_stage: None,
            error_details: None,
            retry_count: 0,
            total_duration_seconds: None,
            request_metadata: new.metadata,
            stages,
            version: 0,
        };

        let event = RequestEvent::new(
            id,
            EventType::REQUEST_CREATED,
            EventSeverity::Info,
            format!("Content request created for topic '{}'", request.topic),
            now,
        )
        .with_data(json!({
            "correlation_id": request.correlation_id.as_str(),
            "student_id": request.student_id.as_str(),
            "stage_count": request.stages.len(),
        }));

        Ok((request, event))
    }

    pub fn stage(&self, stage: StageName) -> Option<&RequestStage> {
        self.stages.iter().find(|s| s.stage_name == stage)
    }

    fn stage_mut(&mut self, stage: StageName) -> Result<&mut RequestStage, TrackerError> {
        self.stages
            .iter_mut()
            .find(|s| s.stage_name == stage)
            .ok_or_else(|| TrackerError::StageNotFound(stage.as_str().to_string()))
    }

    fn ensure_active(&self, operation: &'static str) -> Result<(), TrackerError> {
        if self.status.is_terminal() {
            return Err(self.invalid_state(operation));
        }
        Ok(())
    }

    fn invalid_state(&self, operation: &'static str) -> TrackerError {
        TrackerError::InvalidRequestState {
            request_id: self.id,
            status: self.status,
            operation,
        }
    }

    fn bump_progress(&mut self, progress: u8) {
        self.progress_percentage = self.progress_percentage.max(progress.min(100));
    }

    /// Questions stored by the last clarification outcome, if any.
    pub fn clarification_questions(&self) -> Vec<String> {
        self.request_metadata
            .get(CLARIFICATION_METADATA_KEY)
            .and_then(|c| c.get("questions"))
            .and_then(|q| q.as_array())
            .map(|qs| {
                qs.iter()
                    .filter_map(|q| q.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn start_stage(
        &mut self,
        stage: StageName,
        now: DateTime<Utc>,
    ) -> Result<RequestEvent, TrackerError> {
        self.ensure_active("start a stage")?;
        let target = stage.request_status();
        if !self.status.can_transition_to(target) {
            return Err(self.invalid_state("move to an earlier stage"));
        }

        let st = self.stage_mut(stage)?;
        let restarted = match st.status {
            StageStatus::Pending => false,
            // Redelivery after a crash mid-stage.
            StageStatus::InProgress => true,
            status => {
                return Err(TrackerError::InvalidStageState {
                    stage,
                    status,
                    operation: "start",
                });
            }
        };
        st.status = StageStatus::InProgress;
        st.started_at = Some(now);
        st.completed_at = None;
        st.duration_seconds = None;

        self.status = target;
        self.current_stage = Some(stage);
        self.started_at.get_or_insert(now);
        self.bump_progress(stage.start_progress());
        self.updated_at = now;

        Ok(RequestEvent::new(
            self.id,
            EventType::STAGE_STARTED,
            EventSeverity::Info,
            format!("Started stage {stage}"),
            now,
        )
        .with_stage(stage)
        .with_data(json!({
            "progress_percentage": self.progress_percentage,
            "restarted": restarted,
        })))
    }

    pub fn complete_stage(
        &mut self,
        stage: StageName,
        output_data: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> Result<RequestEvent, TrackerError> {
        self.ensure_active("complete a stage")?;

        let st = self.stage_mut(stage)?;
        if st.status != StageStatus::InProgress {
            return Err(TrackerError::InvalidStageState {
                stage,
                status: st.status,
                operation: "complete",
            });
        }
        st.finish(StageStatus::Completed, now);
        st.output_data = output_data;
        let duration = st.duration_seconds;

        self.bump_progress(stage.complete_progress());
        self.updated_at = now;

        Ok(RequestEvent::new(
            self.id,
            EventType::STAGE_COMPLETED,
            EventSeverity::Info,
            format!("Completed stage {stage}"),
            now,
        )
        .with_stage(stage)
        .with_data(json!({
            "duration_seconds": duration,
            "progress_percentage": self.progress_percentage,
        })))
    }

    /// Fail a stage. The parent request fails with it until the stage is retried.
    pub fn fail_stage(
        &mut self,
        stage: StageName,
        error_message: impl Into<String>,
        error_details: Option<JsonValue>,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<RequestEvent, TrackerError> {
        self.ensure_active("fail a stage")?;
        let error_message = error_message.into();

        let st = self.stage_mut(stage)?;
        if !matches!(st.status, StageStatus::Pending | StageStatus::InProgress) {
            return Err(TrackerError::InvalidStageState {
                stage,
                status: st.status,
                operation: "fail",
            });
        }
        st.finish(StageStatus::Failed, now);
        st.error_message = Some(error_message.clone());
        st.error_details = error_details.clone();
        let retry_count = st.retry_count;
        let max_retries = st.max_retries;

        self.status = RequestStatus::Failed;
        self.failed_at = Some(now);
        self.error_message = Some(error_message.clone());
        self.error_stage = Some(stage.as_str().to_string());
        self.error_details = error_details.clone();
        self.updated_at = now;

        Ok(RequestEvent::new(
            self.id,
            EventType::STAGE_FAILED,
            EventSeverity::Error,
            format!("Stage {stage} failed: {error_message}"),
            now,
        )
        .with_stage(stage)
        .with_data(json!({
            "retryable": retryable,
            "retry_count": retry_count,
            "max_retries": max_retries,
            "error_details": error_details,
        })))
    }

    /// Reset a failed stage to pending if its retry budget allows.
    ///
    /// Returns `(false, event)` without touching any state once the budget is
    /// spent; the event still belongs in the audit log.
    pub fn retry_stage(
        &mut self,
        stage: StageName,
        now: DateTime<Utc>,
    ) -> Result<(bool, RequestEvent), TrackerError> {
        let failed_here = self.status == RequestStatus::Failed
            && self.error_stage.as_deref() == Some(stage.as_str());
        if self.status.is_terminal() && !failed_here {
            return Err(self.invalid_state("retry a stage"));
        }

        let request_id = self.id;
        let st = self.stage_mut(stage)?;
        if st.status != StageStatus::Failed {
            return Err(TrackerError::InvalidStageState {
                stage,
                status: st.status,
                operation: "retry",
            });
        }

        if st.retry_count >= st.max_retries {
            let event = RequestEvent::new(
                request_id,
                EventType::RETRY_LIMIT_EXCEEDED,
                EventSeverity::Error,
                format!("Stage {stage} exhausted {} retries", st.max_retries),
                now,
            )
            .with_stage(stage)
            .with_data(json!({
                "retry_count": st.retry_count,
                "max_retries": st.max_retries,
            }));
            return Ok((false, event));
        }

        st.retry_count += 1;
        st.status = StageStatus::Pending;
        st.started_at = None;
        st.completed_at = None;
        st.duration_seconds = None;
        st.error_message = None;
        st.error_details = None;
        let retry_count = st.retry_count;
        let max_retries = st.max_retries;

        if failed_here {
            self.status = stage.request_status();
            self.failed_at = None;
            self.error_message = None;
            self.error_stage = None;
            self.error_details = None;
        }
        self.updated_at = now;

        let event = RequestEvent::new(
            request_id,
            EventType::STAGE_RETRY,
            EventSeverity::Warning,
            format!("Retrying stage {stage} ({retry_count}/{max_retries})"),
            now,
        )
        .with_stage(stage)
        .with_data(json!({
            "retry_count": retry_count,
            "max_retries": max_retries,
        }));
        Ok((true, event))
    }

    pub fn complete(
        &mut self,
        results: GenerationResults,
        now: DateTime<Utc>,
    ) -> Result<RequestEvent, TrackerError> {
        self.ensure_active("complete")?;
        if !self.status.can_transition_to(RequestStatus::Completed) {
            return Err(self.invalid_state("complete"));
        }

        for st in &mut self.stages {
            match st.status {
                StageStatus::InProgress => st.finish(StageStatus::Completed, now),
                StageStatus::Pending => st.status = StageStatus::Skipped,
                _ => {}
            }
        }

        let started = self.started_at.unwrap_or(self.created_at);
        let total = seconds_between(started, now);

        self.status = RequestStatus::Completed;
        self.current_stage = None;
        self.progress_percentage = 100;
        self.completed_at = Some(now);
        self.total_duration_seconds = Some(total);
        self.video_url = Some(results.video_url.clone());
        self.script_text = results.script_text;
        self.thumbnail_url = results.thumbnail_url;
        self.updated_at = now;

        Ok(RequestEvent::new(
            self.id,
            EventType::REQUEST_COMPLETED,
            EventSeverity::Info,
            "Content request completed",
            now,
        )
        .with_data(json!({
            "video_url": results.video_url,
            "total_duration_seconds": total,
        })))
    }

    pub fn fail(
        &mut self,
        error_message: impl Into<String>,
        error_stage: Option<String>,
        error_details: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> Result<RequestEvent, TrackerError> {
        self.ensure_active("fail")?;
        let error_message = error_message.into();

        for st in &mut self.stages {
            if st.status == StageStatus::InProgress {
                st.finish(StageStatus::Failed, now);
                st.error_message = Some(error_message.clone());
                st.error_details = error_details.clone();
            }
        }

        self.status = RequestStatus::Failed;
        self.failed_at = Some(now);
        self.error_message = Some(error_message.clone());
        self.error_stage = error_stage.clone();
        self.error_details = error_details.clone();
        self.updated_at = now;

        Ok(RequestEvent::new(
            self.id,
            EventType::REQUEST_FAILED,
            EventSeverity::Error,
            format!("Content request failed: {error_message}"),
            now,
        )
        .with_data(json!({
            "error_stage": error_stage,
            "error_details": error_details,
        })))
    }

    /// Park the request until the student answers the clarifying questions.
    pub fn await_clarification(
        &mut self,
        questions: Vec<String>,
        reasoning: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RequestEvent, TrackerError> {
        self.ensure_active("await clarification")?;

        for st in &mut self.stages {
            if st.status == StageStatus::InProgress {
                st.status = StageStatus::Pending;
                st.started_at = None;
            }
        }

        let question_count = questions.len();
        self.request_metadata.insert(
            CLARIFICATION_METADATA_KEY.to_string(),
            json!({
                "questions": questions,
                "reasoning": reasoning,
                "requested_at": now,
            }),
        );
        self.status = RequestStatus::AwaitingClarification;
        self.current_stage = None;
        self.updated_at = now;

        Ok(RequestEvent::new(
            self.id,
            EventType::CLARIFICATION_REQUESTED,
            EventSeverity::Info,
            format!("Clarification needed ({question_count} questions)"),
            now,
        )
        .with_data(json!({ "question_count": question_count })))
    }

    /// Reflect the broker's delivery count in `retry_count`.
    pub fn record_delivery_attempt(
        &mut self,
        delivery_attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<RequestEvent>, TrackerError> {
        self.ensure_active("record a delivery attempt")?;

        let observed = delivery_attempt.saturating_sub(1);
        if observed <= self.retry_count {
            return Ok(None);
        }
        self.retry_count = observed;
        self.updated_at = now;

        Ok(Some(
            RequestEvent::new(
                self.id,
                EventType::DELIVERY_RETRY,
                EventSeverity::Warning,
                format!("Message redelivered (attempt {delivery_attempt})"),
                now,
            )
            .with_data(json!({ "delivery_attempt": delivery_attempt })),
        ))
    }

    pub fn cancel(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<RequestEvent, TrackerError> {
        self.ensure_active("cancel")?;
        let reason = reason.into();

        self.status = RequestStatus::Cancelled;
        self.request_metadata.insert(
            "cancellation".to_string(),
            json!({ "reason": reason, "cancelled_at": now }),
        );
        self.updated_at = now;

        Ok(RequestEvent::new(
            self.id,
            EventType::REQUEST_CANCELLED,
            EventSeverity::Warning,
            format!("Content request cancelled: {reason}"),
            now,
        ))
    }

    /// Metadata annotations are the only write allowed on terminal rows.
    pub fn annotate(&mut self, key: impl Into<String>, value: JsonValue, now: DateTime<Utc>) {
        self.request_metadata.insert(key.into(), value);
        self.updated_at = now;
    }

    pub fn snapshot(&self) -> RequestStatusSnapshot {
        let mut stages: Vec<StageSnapshot> = self.stages.iter().map(StageSnapshot::from).collect();
        stages.sort_by_key(|s| s.stage_order);

        RequestStatusSnapshot {
            request_id: self.id,
            correlation_id: self.correlation_id.clone(),
            status: self.status,
            current_stage: self.current_stage,
            progress_percentage: self.progress_percentage,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            video_url: self.video_url.clone(),
            script_text: self.script_text.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            error_message: self.error_message.clone(),
            error_stage: self.error_stage.clone(),
            clarifying_questions: self.clarification_questions(),
            retry_count: self.retry_count,
            total_duration_seconds: self.total_duration_seconds,
            stages,
        }
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}
