//! Standalone dispatch worker: runs the worker pool against the Postgres
//! queue without serving HTTP.

use anyhow::Context;

use hookrelay_api::app::services::{self, StorageKind};
use hookrelay_api::shutdown;
use hookrelay_infra::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env().context("invalid configuration")?;
    hookrelay_observability::init();

    let services = services::build_services(config).await?;
    if services.storage != StorageKind::Postgres {
        anyhow::bail!("hookrelay-worker needs DATABASE_URL: an in-memory queue cannot be shared between processes");
    }

    tracing::info!(
        queue = %services.config.task_queue,
        concurrency = services.config.worker_concurrency,
        soft_time_limit_secs = services.config.task_soft_time_limit.as_secs_f64(),
        time_limit_secs = services.config.task_time_limit.as_secs_f64(),
        "starting dispatch workers"
    );
    let workers = services.spawn_workers();

    shutdown::shutdown_signal().await;

    tracing::info!(stats = ?workers.stats(), "finishing in-flight tasks");
    workers.shutdown().await;
    Ok(())
}
