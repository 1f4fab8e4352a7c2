use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::IntoResponse,
};

use hookrelay_core::{EndpointShape, JobId};

use crate::app::errors;
use crate::app::routes::intake;
use crate::app::services::AppServices;
use crate::context::RequestOrigin;

/// `/jobs/{id}/`.
///
/// Only a lowercase hyphenated UUID names a job: `GET`/`HEAD` look it up,
/// other methods get 405. Any other segment is an ordinary path and becomes a
/// job like every unrouted request.
pub async fn job_route(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(origin): Extension<RequestOrigin>,
    Path(raw_id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let Some(id) = parse_job_id(&raw_id) else {
        return intake::create_job(Extension(services), Extension(origin), method, uri, headers, body).await;
    };

    if method != Method::GET && method != Method::HEAD {
        let mut response = errors::json_error(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            format!("{method} is not allowed on a job"),
        );
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        return response;
    }

    match services.lookup.get_job(id, origin.as_str()).await {
        Ok(preview) => Json(preview.to_json(EndpointShape::Generic)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

fn parse_job_id(raw: &str) -> Option<JobId> {
    let hyphenated = raw.len() == 36
        && raw
            .bytes()
            .enumerate()
            .all(|(i, b)| match i {
                8 | 13 | 18 | 23 => b == b'-',
                _ => b.is_ascii_digit() || (b'a'..=b'f').contains(&b),
            });
    if !hyphenated {
        return None;
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_lowercase_hyphenated_uuids_only() {
        let id = JobId::new();
        assert_eq!(parse_job_id(&id.to_string()), Some(id));

        assert_eq!(parse_job_id("not-a-uuid"), None);
        assert_eq!(parse_job_id(&id.to_string().to_uppercase()), None);
        assert_eq!(parse_job_id(&id.as_uuid().simple().to_string()), None);
        assert_eq!(parse_job_id(&format!("{{{id}}}")), None);
    }
}
