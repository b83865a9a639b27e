//! Status enums and the fixed pipeline stage table.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Request-level status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Validating,
    Retrieving,
    GeneratingScript,
    GeneratingVideo,
    ProcessingVideo,
    Notifying,
    /// Holding state: the job stopped and waits for the student to refine the query.
    AwaitingClarification,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Validating => "validating",
            RequestStatus::Retrieving => "retrieving",
            RequestStatus::GeneratingScript => "generating_script",
            RequestStatus::GeneratingVideo => "generating_video",
            RequestStatus::ProcessingVideo => "processing_video",
            RequestStatus::Notifying => "notifying",
            RequestStatus::AwaitingClarification => "awaiting_clarification",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }

    /// Position along the forward pipeline; `None` for states outside it.
    pub fn pipeline_rank(&self) -> Option<u8> {
        match self {
            RequestStatus::Pending => Some(0),
            RequestStatus::Validating => Some(1),
            RequestStatus::Retrieving => Some(2),
            RequestStatus::GeneratingScript => Some(3),
            RequestStatus::GeneratingVideo => Some(4),
            RequestStatus::ProcessingVideo => Some(5),
            RequestStatus::Notifying => Some(6),
            RequestStatus::Completed => Some(7),
            RequestStatus::AwaitingClarification
            | RequestStatus::Failed
            | RequestStatus::Cancelled => None,
        }
    }

    /// Whether moving from `self` to `next` respects the forward-only rule.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            RequestStatus::Failed
            | RequestStatus::Cancelled
            | RequestStatus::AwaitingClarification => true,
            _ => match (self.pipeline_rank(), next.pipeline_rank()) {
                (Some(from), Some(to)) => to >= from,
                _ => false,
            },
        }
    }
}

impl core::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => RequestStatus::Pending,
            "validating" => RequestStatus::Validating,
            "retrieving" => RequestStatus::Retrieving,
            "generating_script" => RequestStatus::GeneratingScript,
            "generating_video" => RequestStatus::GeneratingVideo,
            "processing_video" => RequestStatus::ProcessingVideo,
            "notifying" => RequestStatus::Notifying,
            "awaiting_clarification" => RequestStatus::AwaitingClarification,
            "completed" => RequestStatus::Completed,
            "failed" => RequestStatus::Failed,
            "cancelled" => RequestStatus::Cancelled,
            other => return Err(TrackerError::UnknownValue(format!("request status '{other}'"))),
        })
    }
}

/// Stage-level status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}

impl core::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => StageStatus::Pending,
            "in_progress" => StageStatus::InProgress,
            "completed" => StageStatus::Completed,
            "failed" => StageStatus::Failed,
            "skipped" => StageStatus::Skipped,
            other => return Err(TrackerError::UnknownValue(format!("stage status '{other}'"))),
        })
    }
}

/// Named pipeline stage, in execution order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Validation,
    Retrieval,
    Script,
    Video,
    Processing,
    Notification,
}

impl StageName {
    /// All stages in fixed pipeline order.
    pub const ALL: [StageName; 6] = [
        StageName::Validation,
        StageName::Retrieval,
        StageName::Script,
        StageName::Video,
        StageName::Processing,
        StageName::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Validation => "validation",
            StageName::Retrieval => "retrieval",
            StageName::Script => "script",
            StageName::Video => "video",
            StageName::Processing => "processing",
            StageName::Notification => "notification",
        }
    }

    /// 1-based position in the pipeline.
    pub fn order(&self) -> i32 {
        match self {
            StageName::Validation => 1,
            StageName::Retrieval => 2,
            StageName::Script => 3,
            StageName::Video => 4,
            StageName::Processing => 5,
            StageName::Notification => 6,
        }
    }

    /// Request status while this stage is running.
    pub fn request_status(&self) -> RequestStatus {
        match self {
            StageName::Validation => RequestStatus::Validating,
            StageName::Retrieval => RequestStatus::Retrieving,
            StageName::Script => RequestStatus::GeneratingScript,
            StageName::Video => RequestStatus::GeneratingVideo,
            StageName::Processing => RequestStatus::ProcessingVideo,
            StageName::Notification => RequestStatus::Notifying,
        }
    }

    /// Progress reported once the stage starts.
    pub fn start_progress(&self) -> u8 {
        match self {
            StageName::Validation => 5,
            StageName::Retrieval => 10,
            StageName::Script => 10,
            StageName::Video => 40,
            StageName::Processing => 70,
            StageName::Notification => 90,
        }
    }

    /// Progress reported once the stage completes.
    pub fn complete_progress(&self) -> u8 {
        match self {
            StageName::Validation => 10,
            StageName::Retrieval => 20,
            StageName::Script => 40,
            StageName::Video => 70,
            StageName::Processing => 90,
            StageName::Notification => 95,
        }
    }
}

impl core::fmt::Display for StageName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageName::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| TrackerError::StageNotFound(s.to_string()))
    }
}
