use anyhow::Context;

use edugen_worker::app::build_health_app;
use edugen_worker::config::{PullConfig, WorkerConfig};
use edugen_worker::pull::PullRunner;
use edugen_worker::services::{WorkerServices, build_queue};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    edugen_observability::init();

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    let pull = PullConfig::from_env().context("invalid pull configuration")?;

    let services = WorkerServices::from_config(&config)
        .await
        .context("failed to wire worker services")?;
    let queue = build_queue(&config.queue)
        .await
        .context("failed to connect to queue")?;

    let health = build_health_app(services.clone(), queue.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", pull.health_port))
        .await
        .with_context(|| format!("failed to bind health port {}", pull.health_port))?;
    tracing::info!("health server listening on {}", listener.local_addr()?);
    let health_server = tokio::spawn(async move { axum::serve(listener, health).await });

    let summary = PullRunner::new(services.consumer, queue, pull).run().await;
    health_server.abort();

    tracing::info!(summary = %serde_json::to_string(&summary)?, "exiting");
    Ok(())
}
