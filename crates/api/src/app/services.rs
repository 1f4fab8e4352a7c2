use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use hookrelay_infra::http_client::{HttpTransport, ReqwestTransport};
use hookrelay_infra::queue::{InMemoryTaskQueue, PostgresTaskQueue, TaskQueue};
use hookrelay_infra::store::{InMemoryJobStore, JobStore, PostgresJobStore};
use hookrelay_infra::workers::{DispatchWorker, DispatchWorkerConfig, DispatchWorkerHandle};
use hookrelay_infra::{JobDispatcher, JobIntake, JobLookup, RelayConfig};

/// Connections kept for request handling on top of what the workers hold.
const API_CONNECTIONS: u32 = 8;

/// Which backing stores the services run on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StorageKind {
    /// Process-local store and queue (dev/test). Jobs do not survive a restart.
    InMemory,
    /// Postgres `jobs` table and `dispatch_tasks` queue.
    Postgres,
}

/// Everything the handlers and the worker pool need, wired once at startup.
pub struct AppServices {
    pub config: Arc<RelayConfig>,
    pub storage: StorageKind,
    pub intake: JobIntake,
    pub lookup: JobLookup,
    pub dispatcher: Arc<JobDispatcher>,
    pub queue: Arc<dyn TaskQueue>,
}

impl AppServices {
    fn wire(
        config: RelayConfig,
        storage: StorageKind,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn TaskQueue>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            intake: JobIntake::new(config.clone(), store.clone(), queue.clone()),
            lookup: JobLookup::new(config.clone(), store.clone()),
            dispatcher: Arc::new(JobDispatcher::new(config.clone(), store, transport)),
            queue,
            storage,
            config,
        }
    }

    /// Start the dispatch worker pool on the current runtime.
    pub fn spawn_workers(&self) -> DispatchWorkerHandle {
        DispatchWorker::new(self.queue.clone(), self.dispatcher.clone())
            .spawn(DispatchWorkerConfig::from_relay_config(&self.config))
    }
}

/// Postgres when `DATABASE_URL` is set, in-memory otherwise.
pub async fn build_services(config: RelayConfig) -> anyhow::Result<AppServices> {
    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new().context("failed to build HTTP client")?);

    match config.database_url.clone() {
        Some(url) => build_persistent_services(config, &url, transport).await,
        None => {
            tracing::warn!("DATABASE_URL not set; jobs and queued tasks are kept in memory only");
            Ok(build_in_memory_services(config, transport))
        }
    }
}

pub fn build_in_memory_services(config: RelayConfig, transport: Arc<dyn HttpTransport>) -> AppServices {
    AppServices::wire(
        config,
        StorageKind::InMemory,
        Arc::new(InMemoryJobStore::new()),
        Arc::new(InMemoryTaskQueue::new()),
        transport,
    )
}

async fn build_persistent_services(
    config: RelayConfig,
    database_url: &str,
    transport: Arc<dyn HttpTransport>,
) -> anyhow::Result<AppServices> {
    // A claimed task holds one connection for its whole run and each
    // checkpoint briefly takes another.
    let max_connections = config.worker_concurrency as u32 * 2 + API_CONNECTIONS;
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = PostgresJobStore::new(pool.clone());
    store.ensure_schema().await.context("failed to bootstrap schema")?;
    let queue = PostgresTaskQueue::new(pool, config.task_queue.clone());

    tracing::info!(queue = %config.task_queue, max_connections, "using Postgres job store and queue");

    Ok(AppServices::wire(
        config,
        StorageKind::Postgres,
        Arc::new(store),
        Arc::new(queue),
        transport,
    ))
}
