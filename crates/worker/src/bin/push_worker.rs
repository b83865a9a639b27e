use anyhow::Context;

use edugen_worker::app::build_app;
use edugen_worker::config::{PushConfig, WorkerConfig};
use edugen_worker::services::WorkerServices;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    edugen_observability::init();

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    let push = PushConfig::from_env().context("invalid push configuration")?;

    let services = WorkerServices::from_config(&config)
        .await
        .context("failed to wire worker services")?;
    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", push.port))
        .await
        .with_context(|| format!("failed to bind port {}", push.port))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
