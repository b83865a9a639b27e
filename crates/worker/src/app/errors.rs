use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use edugen_infra::TrackingError;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn tracking_error_to_response(err: TrackingError) -> Response {
    if err.is_not_found() {
        return json_error(StatusCode::NOT_FOUND, "not_found", err.to_string());
    }
    if err.is_transient() {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable", err.to_string());
    }
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "tracker_error", err.to_string())
}
