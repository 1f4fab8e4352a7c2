use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use super::types::{Delivery, DispatchTask, QueueError, TaskQueue};

/// In-process queue for tests/dev.
///
/// Tasks are lost when the process exits. A failed task is recorded in
/// `failed_tasks` instead of being dropped silently; only the newest
/// `failed_capacity` failures are kept.
#[derive(Debug)]
pub struct InMemoryTaskQueue {
    sender: mpsc::UnboundedSender<DispatchTask>,
    receiver: Mutex<mpsc::UnboundedReceiver<DispatchTask>>,
    pending: Arc<AtomicUsize>,
    failed: Arc<StdMutex<FailedTasks>>,
}

/// Default number of failed tasks retained.
const DEFAULT_FAILED_CAPACITY: usize = 1024;

#[derive(Debug)]
struct FailedTasks {
    entries: VecDeque<(DispatchTask, String)>,
    capacity: usize,
}

impl FailedTasks {
    fn push(&mut self, task: DispatchTask, reason: String) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((task, reason));
    }
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::with_failed_capacity(DEFAULT_FAILED_CAPACITY)
    }

    pub fn with_failed_capacity(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            pending: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(StdMutex::new(FailedTasks {
                entries: VecDeque::new(),
                capacity,
            })),
        }
    }

    /// Tasks enqueued and not yet claimed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn failed_tasks(&self) -> Vec<(DispatchTask, String)> {
        self.failed
            .lock()
            .map(|f| f.entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: DispatchTask) -> Result<(), QueueError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        tracing::debug!(job_id = %task.job_id, "task enqueued");
        Ok(())
    }

    async fn claim(&self) -> Result<Option<Box<dyn Delivery>>, QueueError> {
        let mut receiver = self.receiver.lock().await;
        match receiver.try_recv() {
            Ok(task) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Ok(Some(Box::new(InMemoryDelivery {
                    task,
                    failed: self.failed.clone(),
                })))
            }
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(QueueError::Closed),
        }
    }
}

struct InMemoryDelivery {
    task: DispatchTask,
    failed: Arc<StdMutex<FailedTasks>>,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn task(&self) -> DispatchTask {
        self.task
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        Ok(())
    }

    async fn fail(self: Box<Self>, reason: &str) -> Result<(), QueueError> {
        let mut failed = self
            .failed
            .lock()
            .map_err(|_| QueueError::storage("fail", "lock poisoned"))?;
        failed.push(self.task, reason.to_string());
        Ok(())
    }
}
