//! Outbound HTTP: the backend call and the webhook call.
//!
//! Both go through [`HttpTransport`] so the dispatcher can be driven by a
//! scripted transport in tests. Neither call follows a non-2xx status with an
//! error on its own; callers decide what a status means.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client as HttpClient, Method, Url};
use thiserror::Error;

use hookrelay_core::{HeaderList, HttpMethod};

/// Connection-level headers that describe the inbound hop, not the request.
///
/// `host` and `content-length` are recomputed by the client for the outbound
/// URL and body.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Largest slice of a response body quoted in error messages.
const ERROR_BODY_PREVIEW: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HeaderList,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundResponse {
    pub url: Url,
    pub status: u16,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

impl OutboundResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The status as an error, when it is not 2xx.
    pub fn upstream_status_error(&self) -> Option<UpstreamStatusError> {
        if self.is_success() {
            return None;
        }
        Some(UpstreamStatusError {
            url: self.url.to_string(),
            status: self.status,
            content: body_preview(&self.body),
        })
    }
}

/// No response was obtained: connect failure, timeout, broken body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{method} {url} failed: {message}")]
pub struct TransportError {
    pub method: HttpMethod,
    pub url: String,
    pub message: String,
    pub timed_out: bool,
}

/// A response arrived, but with a non-2xx status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{url} answered HTTP {status}: {content}")]
pub struct UpstreamStatusError {
    pub url: String,
    pub status: u16,
    pub content: String,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, TransportError>;
}

/// `reqwest`-backed transport. One client (and connection pool) per process.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: HttpClient,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = HttpClient::builder()
            .user_agent(concat!("hookrelay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, TransportError> {
        let OutboundRequest {
            method,
            url,
            headers,
            body,
            timeout,
        } = request;

        let fail = |err: reqwest::Error| TransportError {
            method,
            url: url.to_string(),
            message: error_chain(&err),
            timed_out: err.is_timeout(),
        };

        let response = self
            .client
            .request(to_reqwest_method(method), url.clone())
            .headers(forwardable_headers(&headers))
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(fail)?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let mut response_headers = HeaderList::new();
        for (name, value) in response.headers() {
            response_headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }

        let body = response.bytes().await.map_err(fail)?;

        Ok(OutboundResponse {
            url: final_url,
            status,
            headers: response_headers,
            body: body.to_vec(),
        })
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Connect => Method::CONNECT,
        HttpMethod::Options => Method::OPTIONS,
        HttpMethod::Trace => Method::TRACE,
        HttpMethod::Patch => Method::PATCH,
    }
}

/// Captured headers minus hop-by-hop ones, as a `HeaderMap`.
///
/// Entries that are no longer valid header names or values are skipped.
pub fn forwardable_headers(headers: &HeaderList) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            continue;
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => tracing::debug!(header = name, "skipping header that cannot be replayed"),
        }
    }
    map
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn body_preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= ERROR_BODY_PREVIEW {
        return text.into_owned();
    }
    let mut end = ERROR_BODY_PREVIEW;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
