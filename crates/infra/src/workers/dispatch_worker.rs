//! Dispatch worker pool: claims tasks from a [`TaskQueue`] and runs them.
//!
//! Each running task is watched by two timers. Past the soft limit it is
//! reported as slow and left running; past the hard limit it is cancelled and
//! its delivery failed. Shutdown is graceful: workers finish the task in hand
//! and then stop.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::dispatcher::{DispatchError, DispatchOutcome, JobDispatcher};
use crate::queue::{Delivery, QueueError, TaskQueue};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct DispatchWorkerConfig {
    /// Idle wait between claims when the queue is empty
    pub poll_interval: Duration,
    /// Number of tasks run concurrently
    pub concurrency: usize,
    /// Name for logging
    pub name: String,
    /// Running longer than this is logged as slow
    pub soft_time_limit: Duration,
    /// Running longer than this cancels the task
    pub time_limit: Duration,
}

impl Default for DispatchWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            concurrency: 1,
            name: "dispatch-worker".to_string(),
            soft_time_limit: Duration::from_secs(120),
            time_limit: Duration::from_secs(150),
        }
    }
}

impl DispatchWorkerConfig {
    pub fn from_relay_config(config: &RelayConfig) -> Self {
        Self {
            poll_interval: config.worker_poll_interval,
            concurrency: config.worker_concurrency,
            name: config.task_queue.clone(),
            soft_time_limit: config.task_soft_time_limit,
            time_limit: config.task_time_limit,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_time_limits(mut self, soft: Duration, hard: Duration) -> Self {
        self.soft_time_limit = soft;
        self.time_limit = hard;
        self
    }
}

/// Worker pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub tasks_processed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_timed_out: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// How one claimed task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskReport {
    Succeeded(DispatchOutcome),
    Failed(DispatchError),
    TimedOut { limit: Duration },
}

/// Handle to control a running worker pool.
#[derive(Debug)]
pub struct DispatchWorkerHandle {
    shutdown: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
    started: Instant,
}

impl DispatchWorkerHandle {
    /// Request graceful shutdown and wait for every worker to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "dispatch worker panicked");
            }
        }
    }

    pub fn stats(&self) -> WorkerStats {
        let mut stats = self.stats.lock().map(|s| s.clone()).unwrap_or_default();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

/// Claims dispatch tasks and runs them under the configured time limits.
#[derive(Clone)]
pub struct DispatchWorker {
    queue: Arc<dyn TaskQueue>,
    dispatcher: Arc<JobDispatcher>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl DispatchWorker {
    pub fn new(queue: Arc<dyn TaskQueue>, dispatcher: Arc<JobDispatcher>) -> Self {
        Self {
            queue,
            dispatcher,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    /// Spawn `config.concurrency` worker loops on the current runtime.
    pub fn spawn(self, config: DispatchWorkerConfig) -> DispatchWorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = config.concurrency.max(1);

        let joins = (0..workers)
            .map(|index| {
                let worker = self.clone();
                let config = config.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { worker.run_loop(index, config, shutdown).await })
            })
            .collect();

        info!(worker = %config.name, concurrency = workers, "dispatch workers started");

        DispatchWorkerHandle {
            shutdown: shutdown_tx,
            joins,
            stats: self.stats,
            started: Instant::now(),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    async fn run_loop(&self, index: usize, config: DispatchWorkerConfig, mut shutdown: watch::Receiver<bool>) {
        debug!(worker = %config.name, index, "dispatch worker loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_next(&config).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(err) => error!(worker = %config.name, error = %err, "failed to claim task"),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        }

        debug!(worker = %config.name, index, "dispatch worker loop stopped");
    }

    /// Claim and run one task. `Ok(None)` means the queue was empty.
    pub async fn run_next(&self, config: &DispatchWorkerConfig) -> Result<Option<TaskReport>, QueueError> {
        let Some(delivery) = self.queue.claim().await? else {
            return Ok(None);
        };
        let task = delivery.task();
        debug!(worker = %config.name, job_id = %task.job_id, "claimed task");

        self.update_stats(|s| s.current_running += 1);
        let report = self.run_with_limits(delivery, config).await;
        self.update_stats(|s| {
            s.current_running = s.current_running.saturating_sub(1);
            s.tasks_processed += 1;
            match &report {
                TaskReport::Succeeded(_) => s.tasks_succeeded += 1,
                TaskReport::Failed(_) => s.tasks_failed += 1,
                TaskReport::TimedOut { .. } => s.tasks_timed_out += 1,
            }
        });

        Ok(Some(report))
    }

    async fn run_with_limits(&self, delivery: Box<dyn Delivery>, config: &DispatchWorkerConfig) -> TaskReport {
        let job_id = delivery.task().job_id;
        let started = Instant::now();

        let dispatch = self.dispatcher.dispatch(job_id);
        tokio::pin!(dispatch);
        let soft_limit = tokio::time::sleep(config.soft_time_limit);
        tokio::pin!(soft_limit);
        let hard_limit = tokio::time::sleep(config.time_limit);
        tokio::pin!(hard_limit);
        let mut reported_slow = false;

        let result = loop {
            tokio::select! {
                result = &mut dispatch => break Some(result),
                _ = &mut soft_limit, if !reported_slow => {
                    reported_slow = true;
                    warn!(
                        worker = %config.name,
                        job_id = %job_id,
                        limit_secs = config.soft_time_limit.as_secs_f64(),
                        "task exceeded its soft time limit"
                    );
                }
                _ = &mut hard_limit => break None,
            }
        };

        let elapsed_ms = elapsed_millis(started.elapsed());
        let (report, settled) = match result {
            Some(Ok(outcome)) => {
                info!(
                    worker = %config.name,
                    job_id = %job_id,
                    backend_status = outcome.backend_status,
                    webhook_delivered = outcome.webhook.is_delivered(),
                    elapsed_ms,
                    "task succeeded"
                );
                (TaskReport::Succeeded(outcome), delivery.ack().await)
            }
            Some(Err(err)) => {
                error!(worker = %config.name, job_id = %job_id, phase = %err.phase(), error = %err, elapsed_ms, "task failed");
                let reason = err.to_string();
                (TaskReport::Failed(err), delivery.fail(&reason).await)
            }
            None => {
                error!(
                    worker = %config.name,
                    job_id = %job_id,
                    limit_secs = config.time_limit.as_secs_f64(),
                    "task exceeded its time limit and was cancelled"
                );
                let reason = format!("time limit of {:?} exceeded", config.time_limit);
                (
                    TaskReport::TimedOut {
                        limit: config.time_limit,
                    },
                    delivery.fail(&reason).await,
                )
            }
        };

        if let Err(err) = settled {
            error!(worker = %config.name, job_id = %job_id, error = %err, "failed to settle task delivery");
        }
        report
    }

    fn update_stats(&self, f: impl FnOnce(&mut WorkerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

fn elapsed_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_millis_saturates() {
        assert_eq!(elapsed_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(elapsed_millis(Duration::MAX), u64::MAX);
    }
}
