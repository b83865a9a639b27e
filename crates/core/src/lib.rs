//! `edugen-core`: shared building blocks for the job-processing subsystem.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{CorrelationId, RequestId, StudentId};
