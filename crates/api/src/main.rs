use std::sync::Arc;

use anyhow::Context;

use hookrelay_api::app::{build_app, services};
use hookrelay_api::shutdown;
use hookrelay_infra::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loads `.env` before the log filter is read.
    let config = RelayConfig::from_env().context("invalid configuration")?;
    hookrelay_observability::init();

    let bind_addr = config.bind_addr;
    let services = Arc::new(services::build_services(config).await?);

    let workers = if services.config.run_workers {
        Some(services.spawn_workers())
    } else {
        tracing::info!("RUN_WORKERS=false; dispatch is left to hookrelay-worker processes");
        None
    };

    let app = build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        backend = %services.config.backend_url,
        webhook = %services.config.webhook_url,
        storage = ?services.storage,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await
        .context("server error")?;

    if let Some(workers) = workers {
        tracing::info!(stats = ?workers.stats(), "stopping dispatch workers");
        workers.shutdown().await;
    }

    Ok(())
}
