use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::app::errors::json_error;
use crate::app::Readiness;
use crate::services::WorkerServices;

pub async fn health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

/// Storage answers a trivial query and, for the pull worker, the queue answers a ping.
pub async fn ready(Extension(readiness): Extension<Readiness>) -> Response {
    if let Err(err) = readiness.services.tracker.ping().await {
        warn!(error = %err, "readiness: storage unavailable");
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable", err.to_string());
    }
    if let Some(queue) = &readiness.queue {
        if let Err(err) = queue.ping().await {
            warn!(error = %err, "readiness: queue unavailable");
            return json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", err.to_string());
        }
    }
    (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response()
}

pub async fn breakers(Extension(services): Extension<Arc<WorkerServices>>) -> Response {
    Json(services.breakers.stats()).into_response()
}
