//! HTTP surfaces of the workers.
//!
//! - `build_app`: push worker (broker delivers to `POST /push`) plus status
//!   polling and health.
//! - `build_health_app`: health-only router served beside the pull loop.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Extension, Router};

use edugen_infra::MessageQueue;

use crate::services::WorkerServices;

pub mod dto;
pub mod errors;
pub mod routes;

/// Dependencies probed by `/health/ready`.
#[derive(Clone)]
pub struct Readiness {
    pub services: Arc<WorkerServices>,
    /// Only the pull worker owns a queue connection.
    pub queue: Option<Arc<dyn MessageQueue>>,
}

fn health_routes() -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/health/ready", get(routes::health::ready))
        .route("/health/breakers", get(routes::health::breakers))
}

pub fn build_app(services: WorkerServices) -> Router {
    let services = Arc::new(services);
    let readiness = Readiness {
        services: Arc::clone(&services),
        queue: None,
    };

    Router::new()
        .route("/push", post(routes::push::push))
        .route("/requests/:id", get(routes::requests::get_request_status))
        .merge(health_routes())
        .layer(Extension(services))
        .layer(Extension(readiness))
}

pub fn build_health_app(services: WorkerServices, queue: Arc<dyn MessageQueue>) -> Router {
    let services = Arc::new(services);
    let readiness = Readiness {
        services: Arc::clone(&services),
        queue: Some(queue),
    };

    health_routes()
        .layer(Extension(services))
        .layer(Extension(readiness))
}
