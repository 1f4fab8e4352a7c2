//! Read-only job lookup for polling clients.

use std::sync::Arc;

use tracing::instrument;

use hookrelay_core::{JobId, JobPreview};

use crate::config::RelayConfig;
use crate::intake::build_preview;
use crate::store::{JobStore, JobStoreError};

#[derive(Clone)]
pub struct JobLookup {
    config: Arc<RelayConfig>,
    store: Arc<dyn JobStore>,
}

impl JobLookup {
    pub fn new(config: Arc<RelayConfig>, store: Arc<dyn JobStore>) -> Self {
        Self { config, store }
    }

    /// Unlocked read. The preview carries the job's dispatch progress and
    /// depends only on the stored record and `origin`, so repeated lookups of
    /// an unchanged job render identically.
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn get_job(&self, id: JobId, origin: &str) -> Result<JobPreview, JobStoreError> {
        let job = self.store.get(id).await?;
        Ok(build_preview(&self.config, &job, origin).with_progress(&job))
    }
}
