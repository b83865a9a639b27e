//! Message consumer: the one processing routine shared by the pull and push
//! workers.
//!
//! Every message ends in exactly one [`Disposition`]. Failures are written to
//! the tracker before the message is settled, so a poller always sees why a
//! job stopped.

use serde::Serialize;

use edugen_core::RequestId;

pub mod message;
mod process;

pub use message::{ContentMessage, MessageError};
pub use process::ContentConsumer;

/// Breaker guarding the orchestrator call.
pub const CONTENT_GENERATION_BREAKER: &str = "content_generation";

/// Delivery attempts after which a message is logged as a poison candidate.
pub const DEFAULT_POISON_WARNING_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub breaker_name: String,
    pub poison_warning_threshold: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            breaker_name: CONTENT_GENERATION_BREAKER.to_string(),
            poison_warning_threshold: DEFAULT_POISON_WARNING_THRESHOLD,
        }
    }
}

impl ConsumerConfig {
    pub fn with_breaker_name(mut self, name: impl Into<String>) -> Self {
        self.breaker_name = name.into();
        self
    }

    pub fn with_poison_warning_threshold(mut self, threshold: u32) -> Self {
        self.poison_warning_threshold = threshold;
        self
    }
}

/// How the transport should settle a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Ack,
    /// Redeliver later.
    Nack,
    /// Drop; never retried.
    Reject,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Completed,
    ClarificationRequested,
    /// Already settled by an earlier delivery.
    Duplicate,
    /// Payload can never be processed.
    Rejected,
    Failed,
    CircuitOpen,
    StorageUnavailable,
}

impl OutcomeKind {
    pub fn disposition(&self) -> Disposition {
        match self {
            OutcomeKind::Completed | OutcomeKind::ClarificationRequested | OutcomeKind::Duplicate => {
                Disposition::Ack
            }
            OutcomeKind::Rejected => Disposition::Reject,
            OutcomeKind::Failed | OutcomeKind::CircuitOpen | OutcomeKind::StorageUnavailable => {
                Disposition::Nack
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Completed => "completed",
            OutcomeKind::ClarificationRequested => "clarification_requested",
            OutcomeKind::Duplicate => "duplicate",
            OutcomeKind::Rejected => "rejected",
            OutcomeKind::Failed => "failed",
            OutcomeKind::CircuitOpen => "circuit_open",
            OutcomeKind::StorageUnavailable => "storage_unavailable",
        }
    }
}

/// Result of processing one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessOutcome {
    pub kind: OutcomeKind,
    /// `None` when the payload never yielded a usable id.
    pub request_id: Option<RequestId>,
    pub detail: Option<String>,
}

impl ProcessOutcome {
    pub fn new(kind: OutcomeKind, request_id: Option<RequestId>) -> Self {
        Self {
            kind,
            request_id,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn disposition(&self) -> Disposition {
        self.kind.disposition()
    }
}
