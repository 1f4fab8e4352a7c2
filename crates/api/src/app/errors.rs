use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use hookrelay_infra::IntakeError;
use hookrelay_infra::store::JobStoreError;

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(id) => json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found")),
        JobStoreError::Domain(e) => json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", e.to_string()),
        JobStoreError::Storage { .. } => {
            tracing::error!(error = %err, "job store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
        }
    }
}

pub fn intake_error_to_response(err: IntakeError) -> axum::response::Response {
    match err {
        IntakeError::Store(e) => store_error_to_response(e),
        IntakeError::Queue { job_id, source } => {
            tracing::error!(job_id = %job_id, error = %source, "job stored but not queued");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "queue_unavailable",
                format!("job {job_id} could not be queued: {source}"),
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
