use axum::{
    extract::State,
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};

use crate::context::RequestOrigin;

const FORWARDED_PROTO: &str = "x-forwarded-proto";

#[derive(Clone)]
pub struct OriginState {
    /// Fixed public base URL; when set, request headers are ignored.
    pub public_url: Option<String>,
}

pub async fn origin_middleware(
    State(state): State<OriginState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let origin = match &state.public_url {
        Some(url) => RequestOrigin::new(url.clone()),
        None => origin_from_headers(req.headers()),
    };
    req.extensions_mut().insert(origin);

    next.run(req).await
}

fn origin_from_headers(headers: &HeaderMap) -> RequestOrigin {
    let scheme = headers
        .get(FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| *v == "http" || *v == "https")
        .unwrap_or("http");

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("localhost");

    RequestOrigin::new(format!("{scheme}://{host}"))
}
