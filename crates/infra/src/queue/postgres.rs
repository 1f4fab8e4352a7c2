//! Postgres-backed dispatch queue.
//!
//! A claim opens a transaction and locks one pending row with
//! `FOR UPDATE SKIP LOCKED`, so concurrent workers never claim the same row.
//! The transaction stays open while the task runs:
//!
//! - ack deletes the row and commits;
//! - fail stamps `failed_at` / `last_error` and commits;
//! - a dropped delivery (worker died) rolls back and the row is claimable again.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use hookrelay_core::JobId;

use super::types::{DISPATCH_TASK_NAME, Delivery, DispatchTask, QueueError, TaskQueue};

#[derive(Debug, Clone)]
pub struct PostgresTaskQueue {
    pool: Arc<PgPool>,
    queue: String,
}

impl PostgresTaskQueue {
    pub fn new(pool: PgPool, queue: impl Into<String>) -> Self {
        Self {
            pool: Arc::new(pool),
            queue: queue.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Tasks parked after a failure, oldest first.
    pub async fn failed_tasks(&self) -> Result<Vec<(DispatchTask, String)>, QueueError> {
        let rows = sqlx::query(
            r"
            SELECT job_id, COALESCE(last_error, '') AS last_error
            FROM dispatch_tasks
            WHERE queue = $1 AND failed_at IS NOT NULL
            ORDER BY id ASC
            ",
        )
        .bind(&self.queue)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("failed_tasks", e))?;

        rows.iter()
            .map(|row| {
                let job_id: uuid::Uuid = row.try_get("job_id").map_err(|e| map_sqlx_error("failed_tasks", e))?;
                let error: String = row.try_get("last_error").map_err(|e| map_sqlx_error("failed_tasks", e))?;
                Ok((
                    DispatchTask {
                        job_id: JobId::from_uuid(job_id),
                    },
                    error,
                ))
            })
            .collect()
    }
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    #[instrument(skip(self), fields(queue = %self.queue, job_id = %task.job_id), err)]
    async fn enqueue(&self, task: DispatchTask) -> Result<(), QueueError> {
        sqlx::query("INSERT INTO dispatch_tasks (queue, task_name, job_id) VALUES ($1, $2, $3)")
            .bind(&self.queue)
            .bind(DISPATCH_TASK_NAME)
            .bind(task.job_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("enqueue", e))?;
        Ok(())
    }

    async fn claim(&self) -> Result<Option<Box<dyn Delivery>>, QueueError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(
            r"
            SELECT id, job_id
            FROM dispatch_tasks
            WHERE queue = $1 AND task_name = $2 AND failed_at IS NULL
            ORDER BY id ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            ",
        )
        .bind(&self.queue)
        .bind(DISPATCH_TASK_NAME)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim", e))?;

        let Some(row) = row else {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(None);
        };

        let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("claim", e))?;
        let job_id: uuid::Uuid = row.try_get("job_id").map_err(|e| map_sqlx_error("claim", e))?;

        Ok(Some(Box::new(PostgresDelivery {
            tx,
            id,
            task: DispatchTask {
                job_id: JobId::from_uuid(job_id),
            },
        })))
    }
}

struct PostgresDelivery {
    tx: Transaction<'static, Postgres>,
    id: i64,
    task: DispatchTask,
}

#[async_trait]
impl Delivery for PostgresDelivery {
    fn task(&self) -> DispatchTask {
        self.task
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        let PostgresDelivery { mut tx, id, .. } = *self;
        sqlx::query("DELETE FROM dispatch_tasks WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("ack", e))?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn fail(self: Box<Self>, reason: &str) -> Result<(), QueueError> {
        let PostgresDelivery { mut tx, id, .. } = *self;
        sqlx::query("UPDATE dispatch_tasks SET failed_at = NOW(), last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(reason)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("fail", e))?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> QueueError {
    match err {
        sqlx::Error::PoolClosed => QueueError::Closed,
        other => QueueError::storage(operation, other.to_string()),
    }
}
