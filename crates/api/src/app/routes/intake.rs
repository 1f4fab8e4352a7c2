use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
};

use hookrelay_core::{HeaderList, HttpMethod, NewJob};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::RequestOrigin;

/// Any request not routed elsewhere becomes a job.
pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(origin): Extension<RequestOrigin>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let method = match method.as_str().parse::<HttpMethod>() {
        Ok(method) => method,
        Err(e) => return errors::json_error(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", e.to_string()),
    };

    let new = NewJob {
        method,
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        headers: capture_headers(&headers),
        body: body.to_vec(),
    };

    match services.intake.create_job(new, origin.as_str()).await {
        Ok(receipt) => (StatusCode::OK, Json(receipt.body())).into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}

/// Header names arrive lowercased; values that are not UTF-8 are kept lossily.
fn capture_headers(headers: &HeaderMap) -> HeaderList {
    let mut captured = HeaderList::new();
    for (name, value) in headers {
        captured.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }
    captured
}
