use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use hookrelay_core::{Checkpoint, Job, JobId, NewJob};

use super::r#trait::{CheckpointOutcome, JobStore, JobStoreError};

const LOCK_SHARDS: usize = 64;

/// In-memory job store for tests/dev.
///
/// Rows live in a plain map; row locks are emulated with a fixed table of
/// async mutexes keyed by job id. Jobs that hash to the same shard serialize
/// their checkpoint writes, which is stricter than Postgres but still correct.
#[derive(Debug)]
pub struct InMemoryJobStore {
    rows: RwLock<HashMap<JobId, Job>>,
    row_locks: Vec<Mutex<()>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            row_locks: (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn row_lock(&self, id: JobId) -> &Mutex<()> {
        let shard = (id.as_uuid().as_u128() % LOCK_SHARDS as u128) as usize;
        &self.row_locks[shard]
    }

    fn load(&self, id: JobId) -> Result<Job, JobStoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| JobStoreError::storage("get", "lock poisoned"))?;
        rows.get(&id).cloned().ok_or(JobStoreError::NotFound(id))
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new: NewJob) -> Result<Job, JobStoreError> {
        let job = Job::create(JobId::new(), new, Utc::now());
        let mut rows = self
            .rows
            .write()
            .map_err(|_| JobStoreError::storage("create", "lock poisoned"))?;
        rows.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        self.load(id)
    }

    async fn record_checkpoint(
        &self,
        id: JobId,
        checkpoint: Checkpoint,
    ) -> Result<CheckpointOutcome, JobStoreError> {
        let _row_lock = self.row_lock(id).lock().await;

        // Work on a copy so a rejected checkpoint leaves the row untouched.
        let mut job = self.load(id)?;
        let effect = job.apply(checkpoint)?;

        let mut rows = self
            .rows
            .write()
            .map_err(|_| JobStoreError::storage("record_checkpoint", "lock poisoned"))?;
        rows.insert(id, job.clone());

        Ok(CheckpointOutcome { job, effect })
    }
}
