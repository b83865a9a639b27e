use serde::{Deserialize, Serialize};

use edugen_core::{CorrelationId, RequestId};

/// Default modality when the message does not name one.
pub const DEFAULT_MODALITY: &str = "video";

/// Input to one orchestrator invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub request_id: RequestId,
    pub correlation_id: CorrelationId,
    pub query: String,
    pub student_id: String,
    pub grade_level: i32,
    pub interest: Option<String>,
    pub requested_modalities: Vec<String>,
    pub preferred_modality: Option<String>,
}

impl GenerationRequest {
    pub fn new(
        request_id: RequestId,
        correlation_id: CorrelationId,
        query: impl Into<String>,
        student_id: impl Into<String>,
        grade_level: i32,
    ) -> Self {
        Self {
            request_id,
            correlation_id,
            query: query.into(),
            student_id: student_id.into(),
            grade_level,
            interest: None,
            requested_modalities: vec![DEFAULT_MODALITY.to_string()],
            preferred_modality: None,
        }
    }

    pub fn with_interest(mut self, interest: impl Into<String>) -> Self {
        self.interest = Some(interest.into());
        self
    }

    pub fn with_modalities(mut self, modalities: Vec<String>) -> Self {
        if !modalities.is_empty() {
            self.requested_modalities = modalities;
        }
        self
    }

    pub fn with_preferred_modality(mut self, modality: impl Into<String>) -> Self {
        self.preferred_modality = Some(modality.into());
        self
    }
}
