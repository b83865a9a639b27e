use thiserror::Error;

use edugen_core::{DomainError, RequestId};

use crate::status::{RequestStatus, StageName, StageStatus};

/// Tracker-level error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("stage not found: {0}")]
    StageNotFound(String),

    #[error("request {request_id} is '{status}' and cannot {operation}")]
    InvalidRequestState {
        request_id: RequestId,
        status: RequestStatus,
        operation: &'static str,
    },

    #[error("stage {stage} is '{status}' and cannot {operation}")]
    InvalidStageState {
        stage: StageName,
        status: StageStatus,
        operation: &'static str,
    },

    #[error("unknown value: {0}")]
    UnknownValue(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}
