use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use edugen_core::RequestId;

use crate::app::errors::{json_error, tracking_error_to_response};
use crate::services::WorkerServices;

/// Polling projection of one request.
pub async fn get_request_status(
    Extension(services): Extension<Arc<WorkerServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: RequestId = match id.parse() {
        Ok(id) => id,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("{err}")),
    };

    match services.tracker.get_request_status(id).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => tracking_error_to_response(err),
    }
}
