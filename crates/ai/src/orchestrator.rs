use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::outcome::{AiError, GenerationOutcome};
use crate::request::GenerationRequest;

/// The content-generation pipeline as seen by the consumer.
///
/// Implementations must not touch request tracking state; the consumer owns it.
#[async_trait]
pub trait ContentOrchestrator: Send + Sync + 'static {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutcome, AiError>;
}

/// In-process orchestrator replaying a fixed script of results.
///
/// Once the script runs dry every call returns the fallback result. Records
/// the requests it receives.
pub struct ScriptedOrchestrator {
    script: Mutex<VecDeque<Result<GenerationOutcome, String>>>,
    fallback: Result<GenerationOutcome, String>,
    calls: AtomicUsize,
    received: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedOrchestrator {
    pub fn always(outcome: GenerationOutcome) -> Self {
        Self::with_fallback(Ok(outcome))
    }

    /// Every call fails with an internal error carrying `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_fallback(Err(message.into()))
    }

    fn with_fallback(fallback: Result<GenerationOutcome, String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, outcome: GenerationOutcome) -> Self {
        self.push(Ok(outcome))
    }

    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.push(Err(message.into()))
    }

    fn push(self, step: Result<GenerationOutcome, String>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<GenerationRequest> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ContentOrchestrator for ScriptedOrchestrator {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutcome, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut received) = self.received.lock() {
            received.push(request);
        }

        let step = self
            .script
            .lock()
            .map_err(|_| AiError::Internal("script lock poisoned".to_string()))?
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        step.map_err(AiError::Internal)
    }
}
