use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hookrelay_core::JobId;

/// Name the dispatch task is registered under.
pub const DISPATCH_TASK_NAME: &str = "run_job";

/// Instruction to run the dispatch algorithm for one job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTask {
    pub job_id: JobId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    #[error("queue storage failure during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
}

impl QueueError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }
}

/// A task handed to exactly one worker until it is acked or failed.
#[async_trait]
pub trait Delivery: Send {
    fn task(&self) -> DispatchTask;

    /// The task completed; remove it from the queue.
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;

    /// The task ended with an error; park it with the reason. Parked tasks
    /// are not retried automatically.
    async fn fail(self: Box<Self>, reason: &str) -> Result<(), QueueError>;
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: DispatchTask) -> Result<(), QueueError>;

    /// Claim the next available task, or `None` when the queue is empty.
    async fn claim(&self) -> Result<Option<Box<dyn Delivery>>, QueueError>;
}

#[async_trait]
impl<Q> TaskQueue for Arc<Q>
where
    Q: TaskQueue + ?Sized,
{
    async fn enqueue(&self, task: DispatchTask) -> Result<(), QueueError> {
        (**self).enqueue(task).await
    }

    async fn claim(&self) -> Result<Option<Box<dyn Delivery>>, QueueError> {
        (**self).claim().await
    }
}
