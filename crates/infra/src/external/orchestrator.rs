//! HTTP client for the content-generation orchestrator.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use edugen_ai::{AiError, ContentOrchestrator, GenerationOutcome, GenerationRequest, OrchestratorResponse};

const MAX_ERROR_BODY: usize = 512;

/// Calls `POST {base_url}/generate`.
///
/// No request timeout is set here; the consumer bounds each call with the
/// breaker's `call_timeout`.
#[derive(Debug, Clone)]
pub struct HttpOrchestrator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOrchestrator {
    pub fn new(base_url: &str) -> Result<Self, AiError> {
        let base = base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(AiError::InvalidInput("orchestrator base url is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AiError::Internal(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{base}/generate"),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ContentOrchestrator for HttpOrchestrator {
    #[instrument(
        skip(self, request),
        fields(request_id = %request.request_id, correlation_id = %request.correlation_id),
        err
    )]
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutcome, AiError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-correlation-id", request.correlation_id.as_str())
            .json(&request)
            .send()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Upstream {
                status: status.as_u16(),
                message: truncate_body(body),
            });
        }

        let body: OrchestratorResponse = response
            .json()
            .await
            .map_err(|e| AiError::Decode(e.to_string()))?;
        debug!(status = %body.status, "orchestrator responded");
        Ok(body.into_outcome())
    }
}

/// Cut `body` to at most `MAX_ERROR_BODY` bytes on a char boundary.
fn truncate_body(mut body: String) -> String {
    let mut end = MAX_ERROR_BODY.min(body.len());
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body.truncate(end);
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use edugen_core::{CorrelationId, RequestId};
    use serde_json::{Value, json};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(RequestId::new(), CorrelationId::from("c-1"), "why is the sky blue", "s-1", 6)
    }

    #[tokio::test]
    async fn decodes_completed_response() {
        let app = Router::new().route(
            "/generate",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["query"], "why is the sky blue");
                Json(json!({
                    "status": "completed",
                    "video_url": "https://cdn/v.mp4",
                    "script_text": "Light scatters..."
                }))
            }),
        );
        let orch = HttpOrchestrator::new(&serve(app).await).unwrap();

        let outcome = orch.generate(request()).await.unwrap();
        assert!(matches!(outcome, GenerationOutcome::Completed(ref c) if c.video_url == "https://cdn/v.mp4"));
    }

    #[tokio::test]
    async fn non_success_status_is_upstream_error() {
        let app = Router::new().route(
            "/generate",
            post(|| async { (StatusCode::BAD_GATEWAY, "tts backend down") }),
        );
        let orch = HttpOrchestrator::new(&serve(app).await).unwrap();

        let err = orch.generate(request()).await.unwrap_err();
        assert!(matches!(err, AiError::Upstream { status: 502, ref message } if message == "tts backend down"));
    }

    #[tokio::test]
    async fn long_multibyte_error_body_is_cut_on_char_boundary() {
        let app = Router::new().route(
            "/generate",
            post(|| async { (StatusCode::BAD_GATEWAY, format!("{}é tail", "a".repeat(511))) }),
        );
        let orch = HttpOrchestrator::new(&serve(app).await).unwrap();

        let err = orch.generate(request()).await.unwrap_err();
        match err {
            AiError::Upstream { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "a".repeat(511));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn short_bodies_are_kept_whole() {
        assert_eq!(truncate_body("ünïcode".to_string()), "ünïcode");
        assert_eq!(truncate_body("x".repeat(600)).len(), MAX_ERROR_BODY);
    }

    #[test]
    fn empty_base_url_is_rejected() {
        assert!(HttpOrchestrator::new("/").is_err());
    }
}
