use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{info, warn};

use edugen_infra::Disposition;

use crate::app::dto::PushEnvelope;
use crate::app::errors::json_error;
use crate::services::WorkerServices;

/// One broker delivery. 200 settles it, 400 drops it, 500 asks for redelivery.
pub async fn push(Extension(services): Extension<Arc<WorkerServices>>, body: Bytes) -> Response {
    let envelope: PushEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "rejecting undecodable push envelope");
            return json_error(StatusCode::BAD_REQUEST, "invalid_envelope", err.to_string());
        }
    };
    let message_id = envelope.message.message_id.clone().unwrap_or_default();

    let data = match envelope.decode_data() {
        Ok(data) => data,
        Err(err) => {
            warn!(message_id = %message_id, error = %err, "rejecting push message with invalid base64 data");
            return json_error(StatusCode::BAD_REQUEST, "invalid_data", err.to_string());
        }
    };

    let outcome = services
        .consumer
        .process(&data, envelope.delivery_attempt())
        .await;
    info!(
        message_id = %message_id,
        request_id = ?outcome.request_id,
        outcome = outcome.kind.as_str(),
        "push message processed"
    );

    let status = match outcome.disposition() {
        Disposition::Ack => StatusCode::OK,
        Disposition::Reject => StatusCode::BAD_REQUEST,
        Disposition::Nack => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({
            "status": outcome.kind,
            "request_id": outcome.request_id,
            "detail": outcome.detail,
        })),
    )
        .into_response()
}
