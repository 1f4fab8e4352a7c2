use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use hookrelay_core::{Checkpoint, CheckpointEffect, DomainError, Job, JobId, NewJob};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("checkpoint rejected: {0}")]
    Domain(#[from] DomainError),

    #[error("storage failure during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
}

impl JobStoreError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }
}

/// Result of a committed checkpoint transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointOutcome {
    /// The row as committed.
    pub job: Job,
    pub effect: CheckpointEffect,
}

/// Durable job records.
///
/// Implementations must make `record_checkpoint` atomic per job: two
/// checkpoint transactions on the same id never interleave, and a rejected
/// checkpoint leaves the row untouched.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. The store assigns `created_at`.
    async fn create(&self, new: NewJob) -> Result<Job, JobStoreError>;

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError>;

    /// Lock the row, apply `checkpoint`, persist, release.
    async fn record_checkpoint(
        &self,
        id: JobId,
        checkpoint: Checkpoint,
    ) -> Result<CheckpointOutcome, JobStoreError>;
}

#[async_trait]
impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    async fn create(&self, new: NewJob) -> Result<Job, JobStoreError> {
        (**self).create(new).await
    }

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        (**self).get(id).await
    }

    async fn record_checkpoint(
        &self,
        id: JobId,
        checkpoint: Checkpoint,
    ) -> Result<CheckpointOutcome, JobStoreError> {
        (**self).record_checkpoint(id, checkpoint).await
    }
}
