//! `edugen-ai`
//!
//! **Responsibility:** boundary to the content-generation orchestrator.
//!
//! The NLU/RAG/script/TTS/video pipeline lives behind [`ContentOrchestrator`].
//! This crate only defines what goes in ([`GenerationRequest`]), what comes
//! back ([`GenerationOutcome`]) and how calls fail ([`AiError`]). Transport
//! adapters live in infra.

pub mod orchestrator;
pub mod outcome;
pub mod request;

pub use orchestrator::{ContentOrchestrator, ScriptedOrchestrator};
pub use outcome::{AiError, GeneratedContent, GenerationOutcome, OrchestratorResponse};
pub use request::GenerationRequest;
