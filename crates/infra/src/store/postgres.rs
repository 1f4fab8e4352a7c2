//! Postgres-backed job store.
//!
//! Checkpoints follow the row-lock protocol directly:
//!
//! ```text
//! BEGIN
//! SELECT ... FROM jobs WHERE id = $1 FOR UPDATE   -- get_for_update
//! UPDATE jobs SET <checkpoint fields> WHERE id = $1  -- save
//! COMMIT                                           -- releases the row lock
//! ```
//!
//! Concurrent dispatchers for the same job block on `FOR UPDATE` until the
//! holder commits, then read the committed row.
//!
//! ## Error Mapping
//!
//! | SQLx Error | JobStoreError |
//! |------------|---------------|
//! | no row returned (`fetch_optional`) | `NotFound` |
//! | Database (any code) | `Storage` with the server message |
//! | PoolClosed / PoolTimedOut / Io / other | `Storage` |

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use hookrelay_core::{Checkpoint, HeaderList, HttpMethod, Job, JobId, NewJob};

use super::r#trait::{CheckpointOutcome, JobStore, JobStoreError};
use crate::schema;

const JOB_COLUMNS: &str = r#"
    id,
    request_method,
    request_path,
    request_query,
    request_headers,
    request_body,
    created_at,
    request_sent_at,
    response_received_at,
    response_content,
    response_headers
"#;

/// Postgres-backed job store.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect a pool sized for `max_connections`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, JobStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        schema::ensure_schema(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))
    }

    /// Open a transaction for row-locked checkpoint writes.
    pub async fn begin(&self) -> Result<JobTransaction, JobStoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(JobTransaction { tx })
    }
}

/// An open transaction on the `jobs` table.
///
/// Dropping it without `commit` rolls back and releases any row lock taken.
pub struct JobTransaction {
    tx: Transaction<'static, Postgres>,
}

impl JobTransaction {
    /// `SELECT ... FOR UPDATE`: blocks until no other transaction holds the row.
    #[instrument(skip(self), fields(job_id = %id), err)]
    pub async fn get_for_update(&mut self, id: JobId) -> Result<Job, JobStoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_for_update", e))?
            .ok_or(JobStoreError::NotFound(id))?;

        decode_job(&row)
    }

    /// Write back the checkpoint columns. Request columns are never updated.
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    pub async fn save(&mut self, job: &Job) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                request_sent_at = $2,
                response_received_at = $3,
                response_content = $4,
                response_headers = $5
            WHERE id = $1
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.request_sent_at)
        .bind(job.response_received_at)
        .bind(&job.response_content)
        .bind(Json(&job.response_headers))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job.id));
        }
        Ok(())
    }

    pub async fn commit(self) -> Result<(), JobStoreError> {
        self.tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    pub async fn rollback(self) -> Result<(), JobStoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, new), fields(method = %new.method, path = %new.path), err)]
    async fn create(&self, new: NewJob) -> Result<Job, JobStoreError> {
        let sql = format!(
            r#"
            INSERT INTO jobs (
                id,
                request_method,
                request_path,
                request_query,
                request_headers,
                request_body
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(JobId::new().as_uuid())
            .bind(new.method.as_str())
            .bind(&new.path)
            .bind(&new.query)
            .bind(Json(&new.headers))
            .bind(&new.body)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create", e))?;

        decode_job(&row)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?
            .ok_or(JobStoreError::NotFound(id))?;

        decode_job(&row)
    }

    #[instrument(skip(self, checkpoint), fields(job_id = %id, checkpoint = checkpoint.name()), err)]
    async fn record_checkpoint(
        &self,
        id: JobId,
        checkpoint: Checkpoint,
    ) -> Result<CheckpointOutcome, JobStoreError> {
        let mut tx = self.begin().await?;
        let mut job = tx.get_for_update(id).await?;

        let effect = match job.apply(checkpoint) {
            Ok(effect) => effect,
            Err(err) => {
                tx.rollback().await?;
                return Err(err.into());
            }
        };

        tx.save(&job).await?;
        tx.commit().await?;

        Ok(CheckpointOutcome { job, effect })
    }
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err
                .code()
                .map(|c| c.into_owned())
                .unwrap_or_else(|| "unknown".to_string());
            JobStoreError::storage(operation, format!("database error {code}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => JobStoreError::storage(operation, "connection pool closed"),
        sqlx::Error::PoolTimedOut => JobStoreError::storage(operation, "timed out acquiring a connection"),
        other => JobStoreError::storage(operation, other.to_string()),
    }
}

fn decode_job(row: &PgRow) -> Result<Job, JobStoreError> {
    let row = JobRow::from_row(row).map_err(|e| map_sqlx_error("decode_job", e))?;
    row.try_into()
}

#[derive(Debug)]
struct JobRow {
    id: uuid::Uuid,
    request_method: String,
    request_path: String,
    request_query: String,
    request_headers: Json<HeaderList>,
    request_body: Vec<u8>,
    created_at: DateTime<Utc>,
    request_sent_at: Option<DateTime<Utc>>,
    response_received_at: Option<DateTime<Utc>>,
    response_content: Vec<u8>,
    response_headers: Json<HeaderList>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            request_method: row.try_get("request_method")?,
            request_path: row.try_get("request_path")?,
            request_query: row.try_get("request_query")?,
            request_headers: row.try_get("request_headers")?,
            request_body: row.try_get("request_body")?,
            created_at: row.try_get("created_at")?,
            request_sent_at: row.try_get("request_sent_at")?,
            response_received_at: row.try_get("response_received_at")?,
            response_content: row.try_get("response_content")?,
            response_headers: row.try_get("response_headers")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let request_method = HttpMethod::from_str(&row.request_method)
            .map_err(|e| JobStoreError::storage("decode_job", e.to_string()))?;

        Ok(Job {
            id: JobId::from_uuid(row.id),
            request_method,
            request_path: row.request_path,
            request_query: row.request_query,
            request_headers: row.request_headers.0,
            request_body: row.request_body,
            created_at: row.created_at,
            request_sent_at: row.request_sent_at,
            response_received_at: row.response_received_at,
            response_content: row.response_content,
            response_headers: row.response_headers.0,
        })
    }
}
