use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Generated artefacts of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub video_url: String,
    pub script_text: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Interpreted result of an orchestrator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed(GeneratedContent),
    /// Served from cache; handled exactly like `Completed`.
    Cached(GeneratedContent),
    ClarificationNeeded {
        questions: Vec<String>,
        reasoning: Option<String>,
    },
    /// Any other status, or a success status without a video.
    Failed { message: String },
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationOutcome::Completed(_) | GenerationOutcome::Cached(_))
    }
}

/// Raw orchestrator response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorResponse {
    pub status: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub script_text: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub clarifying_questions: Vec<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl OrchestratorResponse {
    pub fn into_outcome(self) -> GenerationOutcome {
        let content = |r: OrchestratorResponse| {
            r.video_url.map(|video_url| GeneratedContent {
                video_url,
                script_text: r.script_text,
                thumbnail_url: r.thumbnail_url,
            })
        };

        match self.status.as_str() {
            "completed" => match content(self) {
                Some(c) => GenerationOutcome::Completed(c),
                None => missing_video("completed"),
            },
            "cached" => match content(self) {
                Some(c) => GenerationOutcome::Cached(c),
                None => missing_video("cached"),
            },
            "clarification_needed" => GenerationOutcome::ClarificationNeeded {
                questions: self.clarifying_questions,
                reasoning: self.reasoning,
            },
            other => GenerationOutcome::Failed {
                message: self
                    .error
                    .unwrap_or_else(|| format!("orchestrator returned status '{other}'")),
            },
        }
    }
}

fn missing_video(status: &str) -> GenerationOutcome {
    GenerationOutcome::Failed {
        message: format!("orchestrator returned '{status}' without a video_url"),
    }
}

#[derive(Debug, Error)]
pub enum AiError {
    #[error("invalid generation input: {0}")]
    InvalidInput(String),

    #[error("orchestrator returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("orchestrator unreachable: {0}")]
    Transport(String),

    #[error("orchestrator call timed out after {0:?}")]
    Timeout(Duration),

    #[error("undecodable orchestrator response: {0}")]
    Decode(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> GenerationOutcome {
        serde_json::from_str::<OrchestratorResponse>(json)
            .unwrap()
            .into_outcome()
    }

    #[test]
    fn completed_and_cached_carry_content() {
        let out = response(r#"{"status":"completed","video_url":"v","script_text":"s"}"#);
        assert!(out.is_success());
        assert!(matches!(out, GenerationOutcome::Completed(ref c) if c.video_url == "v"));

        let out = response(r#"{"status":"cached","video_url":"v"}"#);
        assert!(matches!(out, GenerationOutcome::Cached(_)));
    }

    #[test]
    fn clarification_keeps_questions() {
        let out = response(
            r#"{"status":"clarification_needed","clarifying_questions":["a","b"],"reasoning":"vague"}"#,
        );
        assert_eq!(
            out,
            GenerationOutcome::ClarificationNeeded {
                questions: vec!["a".into(), "b".into()],
                reasoning: Some("vague".into()),
            }
        );
    }

    #[test]
    fn unknown_status_and_missing_video_are_failures() {
        assert!(matches!(
            response(r#"{"status":"exploded","error":"gpu on fire"}"#),
            GenerationOutcome::Failed { ref message } if message == "gpu on fire"
        ));
        assert!(matches!(
            response(r#"{"status":"completed"}"#),
            GenerationOutcome::Failed { .. }
        ));
    }
}
