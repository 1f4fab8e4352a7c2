//! Job intake: persist an inbound request, queue its dispatch, answer at once.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, instrument, warn};

use hookrelay_core::{EndpointShape, Job, JobId, JobPreview, NewJob};

use crate::config::RelayConfig;
use crate::queue::{DispatchTask, QueueError, TaskQueue};
use crate::store::{JobStore, JobStoreError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error("job {job_id} was stored but could not be queued: {source}")]
    Queue {
        job_id: JobId,
        #[source]
        source: QueueError,
    },
}

/// A created job and the preview to send back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeReceipt {
    pub job: Job,
    pub preview: JobPreview,
    pub shape: EndpointShape,
}

impl IntakeReceipt {
    /// The preview rendered for the endpoint the caller hit.
    pub fn body(&self) -> JsonValue {
        self.preview.to_json(self.shape)
    }
}

/// Absolute polling URL for a job under `origin` (scheme + authority).
pub fn job_url(origin: &str, id: JobId) -> String {
    format!("{}/jobs/{}/", origin.trim_end_matches('/'), id)
}

/// Preview for a job as seen from `origin`.
pub fn build_preview(config: &RelayConfig, job: &Job, origin: &str) -> JobPreview {
    JobPreview::new(
        job,
        job_url(origin, job.id),
        config.webhook_url_for(job.id).to_string(),
        config.webhook_method,
    )
}

#[derive(Clone)]
pub struct JobIntake {
    config: Arc<RelayConfig>,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn TaskQueue>,
}

impl JobIntake {
    pub fn new(config: Arc<RelayConfig>, store: Arc<dyn JobStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { config, store, queue }
    }

    /// Store the request as a job and enqueue exactly one dispatch task for it.
    #[instrument(skip(self, new), fields(method = %new.method, path = %new.path), err)]
    pub async fn create_job(&self, new: NewJob, origin: &str) -> Result<IntakeReceipt, IntakeError> {
        let shape = match EndpointShape::for_path(&new.path) {
            Some(shape) => shape,
            None => {
                warn!(path = %new.path, "no preview shape for this endpoint; answering with the generic preview");
                EndpointShape::Generic
            }
        };

        let job = self.store.create(new).await?;
        self.queue
            .enqueue(DispatchTask { job_id: job.id })
            .await
            .map_err(|source| IntakeError::Queue { job_id: job.id, source })?;

        info!(job_id = %job.id, "job accepted");

        let preview = build_preview(&self.config, &job, origin);
        Ok(IntakeReceipt { job, preview, shape })
    }
}
