//! Outbound progress/failure notifications. Delivery is best-effort.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use edugen_core::{CorrelationId, RequestId};
use edugen_tracker::RequestStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub request_id: RequestId,
    pub correlation_id: CorrelationId,
    pub status: RequestStatus,
    pub progress_percentage: u8,
    pub message: String,
}

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn progress(&self, notification: &Notification) -> Result<(), NotifyError>;

    async fn failure(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Emits notifications as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationPublisher for TracingNotifier {
    async fn progress(&self, n: &Notification) -> Result<(), NotifyError> {
        info!(
            request_id = %n.request_id,
            correlation_id = %n.correlation_id,
            status = %n.status,
            progress = n.progress_percentage,
            "notify: {}",
            n.message
        );
        Ok(())
    }

    async fn failure(&self, n: &Notification) -> Result<(), NotifyError> {
        warn!(
            request_id = %n.request_id,
            correlation_id = %n.correlation_id,
            status = %n.status,
            "notify failure: {}",
            n.message
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationPublisher for NoopNotifier {
    async fn progress(&self, _: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn failure(&self, _: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}
