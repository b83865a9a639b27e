//! Append-only lifecycle events.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use edugen_core::RequestId;

use crate::error::TrackerError;
use crate::status::StageName;

/// Event type names written to the audit log.
pub struct EventType;

impl EventType {
    pub const REQUEST_CREATED: &'static str = "request_created";
    pub const STAGE_STARTED: &'static str = "stage_started";
    pub const STAGE_COMPLETED: &'static str = "stage_completed";
    pub const STAGE_FAILED: &'static str = "stage_failed";
    pub const STAGE_RETRY: &'static str = "stage_retry";
    pub const RETRY_LIMIT_EXCEEDED: &'static str = "retry_limit_exceeded";
    pub const REQUEST_COMPLETED: &'static str = "request_completed";
    pub const REQUEST_FAILED: &'static str = "request_failed";
    pub const REQUEST_CANCELLED: &'static str = "request_cancelled";
    pub const CLARIFICATION_REQUESTED: &'static str = "clarification_requested";
    pub const DELIVERY_RETRY: &'static str = "delivery_retry";
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSeverity::Debug => "debug",
            EventSeverity::Info => "info",
            EventSeverity::Warning => "warning",
            EventSeverity::Error => "error",
            EventSeverity::Critical => "critical",
        }
    }
}

impl FromStr for EventSeverity {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "debug" => EventSeverity::Debug,
            "info" => EventSeverity::Info,
            "warning" => EventSeverity::Warning,
            "error" => EventSeverity::Error,
            "critical" => EventSeverity::Critical,
            other => return Err(TrackerError::UnknownValue(format!("severity '{other}'"))),
        })
    }
}

/// One row of the request audit log. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub id: Uuid,
    pub request_id: RequestId,
    pub event_type: String,
    pub stage_name: Option<StageName>,
    pub severity: EventSeverity,
    pub message: String,
    pub event_data: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl RequestEvent {
    pub fn new(
        request_id: RequestId,
        event_type: impl Into<String>,
        severity: EventSeverity,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            request_id,
            event_type: event_type.into(),
            stage_name: None,
            severity,
            message: message.into(),
            event_data: JsonValue::Null,
            created_at: at,
        }
    }

    pub fn with_stage(mut self, stage: StageName) -> Self {
        self.stage_name = Some(stage);
        self
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.event_data = data;
        self
    }
}
