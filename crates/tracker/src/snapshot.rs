//! Read-only status views handed to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use edugen_core::{CorrelationId, RequestId};

use crate::request::RequestStage;
use crate::status::{RequestStatus, StageName, StageStatus};

/// Per-stage entry of a [`RequestStatusSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSnapshot {
    pub stage_name: StageName,
    pub stage_order: i32,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub retry_count: u32,
    pub error_message: Option<String>,
}

impl From<&RequestStage> for StageSnapshot {
    fn from(stage: &RequestStage) -> Self {
        Self {
            stage_name: stage.stage_name,
            stage_order: stage.stage_order,
            status: stage.status,
            started_at: stage.started_at,
            completed_at: stage.completed_at,
            duration_seconds: stage.duration_seconds,
            retry_count: stage.retry_count,
            error_message: stage.error_message.clone(),
        }
    }
}

/// Full status of one request, stages ordered by `stage_order`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestStatusSnapshot {
    pub request_id: RequestId,
    pub correlation_id: CorrelationId,
    pub status: RequestStatus,
    pub current_stage: Option<StageName>,
    pub progress_percentage: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub video_url: Option<String>,
    pub script_text: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error_message: Option<String>,
    pub error_stage: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub clarifying_questions: Vec<String>,
    pub retry_count: u32,
    pub total_duration_seconds: Option<f64>,
    pub stages: Vec<StageSnapshot>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use edugen_core::StudentId;

    use crate::request::{ContentRequest, NewContentRequest};
    use crate::status::StageName;

    #[test]
    fn snapshot_lists_stages_in_pipeline_order() {
        let new = NewContentRequest::new(StudentId::new("s"), "volcanoes");
        let (mut req, _) = ContentRequest::create(new, Utc::now()).unwrap();
        req.stages.reverse();

        let snap = req.snapshot();
        let names: Vec<StageName> = snap.stages.iter().map(|s| s.stage_name).collect();
        assert_eq!(names, StageName::ALL.to_vec());
    }

    #[test]
    fn snapshot_serializes_status_as_snake_case() {
        let new = NewContentRequest::new(StudentId::new("s"), "volcanoes");
        let (mut req, _) = ContentRequest::create(new, Utc::now()).unwrap();
        req.start_stage(StageName::Script, Utc::now()).unwrap();

        let json = serde_json::to_value(req.snapshot()).unwrap();
        assert_eq!(json["status"], "generating_script");
        assert_eq!(json["current_stage"], "script");
        assert_eq!(json["progress_percentage"], 10);
        assert!(json.get("clarifying_questions").is_none());
    }
}
