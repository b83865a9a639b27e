//! External service clients/adapters.

pub mod orchestrator;

pub use orchestrator::HttpOrchestrator;
