//! Idempotent Postgres schema bootstrap.
//!
//! Run once at startup by whichever process connects first; every statement
//! is `IF NOT EXISTS`, so concurrent API and worker processes can both call it.

use sqlx::PgPool;
use tracing::instrument;

const STATEMENTS: &[(&str, &str)] = &[
    (
        "create_jobs_table",
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id                   UUID PRIMARY KEY,
            request_method       TEXT NOT NULL CHECK (request_method IN
                                     ('GET','HEAD','POST','PUT','DELETE','CONNECT','OPTIONS','TRACE','PATCH')),
            request_path         TEXT NOT NULL DEFAULT '',
            request_query        TEXT NOT NULL DEFAULT '',
            request_headers      JSONB NOT NULL DEFAULT '[]'::jsonb,
            request_body         BYTEA NOT NULL DEFAULT ''::bytea,
            created_at           TIMESTAMPTZ NOT NULL DEFAULT now(),
            request_sent_at      TIMESTAMPTZ NULL,
            response_received_at TIMESTAMPTZ NULL,
            response_content     BYTEA NOT NULL DEFAULT ''::bytea,
            response_headers     JSONB NOT NULL DEFAULT '[]'::jsonb,
            CONSTRAINT jobs_response_after_request CHECK (
                response_received_at IS NULL
                OR (request_sent_at IS NOT NULL AND response_received_at >= request_sent_at)
            )
        )
        "#,
    ),
    (
        "create_dispatch_tasks_table",
        r#"
        CREATE TABLE IF NOT EXISTS dispatch_tasks (
            id          BIGSERIAL PRIMARY KEY,
            queue       TEXT NOT NULL,
            task_name   TEXT NOT NULL,
            job_id      UUID NOT NULL,
            enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            failed_at   TIMESTAMPTZ NULL,
            last_error  TEXT NULL
        )
        "#,
    ),
    (
        "create_dispatch_tasks_pending_index",
        r#"
        CREATE INDEX IF NOT EXISTS dispatch_tasks_pending_idx
            ON dispatch_tasks (queue, id)
            WHERE failed_at IS NULL
        "#,
    ),
];

/// Create the `jobs` and `dispatch_tasks` tables if they are missing.
#[instrument(skip(pool), err)]
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for &(name, sql) in STATEMENTS {
        tracing::debug!(statement = name, "applying schema statement");
        sqlx::query(sql).execute(pool).await?;
    }
    Ok(())
}
