//! `edugen-tracker`: request/stage state machine for content-generation jobs.
//!
//! **Responsibility:** the pure decision logic behind the Request State Tracker.
//!
//! - [`ContentRequest`] owns its ordered [`RequestStage`]s and enforces every
//!   transition rule (forward-only status, bounded stage retries, monotonic
//!   progress, terminal-once).
//! - Every successful mutation returns the [`RequestEvent`] to append to the
//!   audit log; persisting both atomically is the storage layer's job.
//! - No IO. Timestamps are passed in by the caller.

pub mod error;
pub mod event;
pub mod request;
pub mod snapshot;
pub mod status;

pub use error::TrackerError;
pub use event::{EventSeverity, EventType, RequestEvent};
pub use request::{ContentRequest, GenerationResults, NewContentRequest, RequestStage};
pub use snapshot::{RequestStatusSnapshot, StageSnapshot};
pub use status::{RequestStatus, StageName, StageStatus};

/// Metadata key under which clarification data is stored.
pub const CLARIFICATION_METADATA_KEY: &str = "clarification";
