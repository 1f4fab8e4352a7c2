//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (store, queue, transport, dispatcher)
//! - `routes/`: HTTP handlers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, extract::DefaultBodyLimit, routing::any};
use tower::ServiceBuilder;

use crate::middleware;

pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// `GET /jobs/{id}/` looks a job up; every other path creates one.
pub fn build_app(services: Arc<AppServices>) -> Router {
    let origin_state = middleware::OriginState {
        public_url: services
            .config
            .public_url
            .as_ref()
            .map(|url| url.as_str().to_string()),
    };
    let body_limit = services.config.max_body_bytes;

    Router::new()
        .route("/jobs/:id/", any(routes::jobs::job_route))
        .fallback(routes::intake::create_job)
        .layer(
            ServiceBuilder::new()
                .layer(Extension(services))
                .layer(DefaultBodyLimit::max(body_limit))
                .layer(axum::middleware::from_fn_with_state(
                    origin_state,
                    middleware::origin_middleware,
                )),
        )
}
