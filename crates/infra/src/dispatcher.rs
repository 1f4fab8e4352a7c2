//! Dispatch: the asynchronous unit of work behind every job.
//!
//! ```text
//! [lock] request_sent_at = now [unlock]
//!        backend call (no lock held)
//! [lock] response_received_at, content, headers [unlock]
//!        webhook call (no lock held)
//! ```
//!
//! Each execution is safe to repeat. The row lock serializes the two
//! checkpoint writes across duplicate executions; the outbound calls are not
//! serialized, so a duplicate delivery fires the webhook again.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use hookrelay_core::{Checkpoint, CheckpointEffect, JobId};

use crate::config::RelayConfig;
use crate::http_client::{HttpTransport, OutboundRequest, TransportError, UpstreamStatusError};
use crate::store::{CheckpointOutcome, JobStore, JobStoreError};

/// Step of a dispatch execution, for error reports and log fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    RequestSent,
    BackendCall,
    ResponseReceived,
    WebhookCall,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::RequestSent => "request_sent",
            Phase::BackendCall => "backend_call",
            Phase::ResponseReceived => "response_received",
            Phase::WebhookCall => "webhook_call",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures that end an execution early.
///
/// Whatever was committed before the failure stays committed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("{phase} failed for job {job_id}: {source}")]
    Store {
        job_id: JobId,
        phase: Phase,
        #[source]
        source: JobStoreError,
    },

    #[error("backend call failed for job {job_id}: {source}")]
    Transport {
        job_id: JobId,
        #[source]
        source: TransportError,
    },
}

impl DispatchError {
    pub fn phase(&self) -> Phase {
        match self {
            DispatchError::JobNotFound(_) => Phase::RequestSent,
            DispatchError::Store { phase, .. } => *phase,
            DispatchError::Transport { .. } => Phase::BackendCall,
        }
    }

    /// True when the backend call timed out.
    pub fn is_backend_timeout(&self) -> bool {
        matches!(self, DispatchError::Transport { source, .. } if source.timed_out)
    }
}

/// How the webhook call ended. None of these undo the recorded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDelivery {
    Delivered { status: u16 },
    Rejected(UpstreamStatusError),
    Failed(TransportError),
}

impl WebhookDelivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, WebhookDelivery::Delivered { .. })
    }
}

/// Result of a completed execution, including non-fatal annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub job_id: JobId,
    /// `AlreadyRecorded` when an earlier execution had claimed the job.
    pub claim: CheckpointEffect,
    pub backend_status: u16,
    /// Set when the backend answered non-2xx. The response was relayed anyway.
    pub backend_error: Option<UpstreamStatusError>,
    /// `Replaced` when an earlier execution had already recorded a response.
    pub response: CheckpointEffect,
    pub webhook: WebhookDelivery,
}

/// Runs the dispatch algorithm against a store and a transport.
#[derive(Clone)]
pub struct JobDispatcher {
    config: Arc<RelayConfig>,
    store: Arc<dyn JobStore>,
    transport: Arc<dyn HttpTransport>,
}

impl JobDispatcher {
    pub fn new(
        config: Arc<RelayConfig>,
        store: Arc<dyn JobStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            store,
            transport,
        }
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    pub async fn dispatch(&self, job_id: JobId) -> Result<DispatchOutcome, DispatchError> {
        let claimed = self
            .checkpoint(job_id, Phase::RequestSent, Checkpoint::RequestSent { at: Utc::now() })
            .await?;
        if claimed.effect == CheckpointEffect::AlreadyRecorded {
            warn!(
                phase = %Phase::RequestSent,
                request_sent_at = ?claimed.job.request_sent_at,
                "job was already claimed by an earlier execution; dispatching again"
            );
        }
        let job = claimed.job;

        let backend_url = self.config.backend_url_for(&job);
        debug!(phase = %Phase::BackendCall, url = %backend_url, method = %job.request_method, "calling backend");
        let response = self
            .transport
            .send(OutboundRequest {
                method: job.request_method,
                url: backend_url,
                headers: job.request_headers,
                body: job.request_body,
                timeout: self.config.backend_timeout,
            })
            .await
            .map_err(|source| {
                error!(
                    phase = %Phase::BackendCall,
                    url = %source.url,
                    timed_out = source.timed_out,
                    error = %source.message,
                    "backend call failed; job left in flight"
                );
                DispatchError::Transport { job_id, source }
            })?;

        let backend_error = response.upstream_status_error();
        if let Some(err) = &backend_error {
            warn!(
                phase = %Phase::BackendCall,
                status = err.status,
                url = %err.url,
                content = %err.content,
                "backend answered with a non-success status; relaying it anyway"
            );
        }

        let recorded = self
            .checkpoint(
                job_id,
                Phase::ResponseReceived,
                Checkpoint::ResponseReceived {
                    at: Utc::now(),
                    content: response.body.clone(),
                    headers: response.headers,
                },
            )
            .await?;
        if recorded.effect == CheckpointEffect::Replaced {
            info!(phase = %Phase::ResponseReceived, "replaced a response recorded by an earlier execution");
        }

        let webhook = self.deliver_webhook(job_id, response.body).await;

        Ok(DispatchOutcome {
            job_id,
            claim: claimed.effect,
            backend_status: response.status,
            backend_error,
            response: recorded.effect,
            webhook,
        })
    }

    async fn checkpoint(
        &self,
        job_id: JobId,
        phase: Phase,
        checkpoint: Checkpoint,
    ) -> Result<CheckpointOutcome, DispatchError> {
        self.store
            .record_checkpoint(job_id, checkpoint)
            .await
            .map_err(|err| match err {
                JobStoreError::NotFound(id) => DispatchError::JobNotFound(id),
                source => DispatchError::Store {
                    job_id,
                    phase,
                    source,
                },
            })
    }

    async fn deliver_webhook(&self, job_id: JobId, body: Vec<u8>) -> WebhookDelivery {
        let url = self.config.webhook_url_for(job_id);
        let request = OutboundRequest {
            method: self.config.webhook_method,
            url,
            headers: Default::default(),
            body,
            timeout: self.config.webhook_timeout,
        };

        match self.transport.send(request).await {
            Ok(response) => match response.upstream_status_error() {
                None => {
                    info!(phase = %Phase::WebhookCall, status = response.status, "webhook delivered");
                    WebhookDelivery::Delivered {
                        status: response.status,
                    }
                }
                Some(err) => {
                    warn!(
                        phase = %Phase::WebhookCall,
                        status = err.status,
                        url = %err.url,
                        content = %err.content,
                        "webhook target rejected the delivery"
                    );
                    WebhookDelivery::Rejected(err)
                }
            },
            Err(err) => {
                warn!(
                    phase = %Phase::WebhookCall,
                    url = %err.url,
                    timed_out = err.timed_out,
                    error = %err.message,
                    "webhook call failed"
                );
                WebhookDelivery::Failed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookrelay_core::{HeaderList, HttpMethod, JobState, NewJob};

    use crate::config::test_config;
    use crate::http_client::testing::{Script, ScriptedTransport};
    use crate::store::InMemoryJobStore;

    const BACKEND: &str = "http://backend.test:11434";
    const WEBHOOK: &str = "http://hooks.test/ollama";

    struct Harness {
        store: Arc<InMemoryJobStore>,
        transport: Arc<ScriptedTransport>,
        dispatcher: JobDispatcher,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryJobStore::new());
        let transport = Arc::new(ScriptedTransport::new());
        let dispatcher = JobDispatcher::new(
            Arc::new(test_config(BACKEND, WEBHOOK)),
            store.clone(),
            transport.clone(),
        );
        Harness {
            store,
            transport,
            dispatcher,
        }
    }

    async fn create(store: &InMemoryJobStore, method: HttpMethod, path: &str, query: &str) -> JobId {
        store
            .create(NewJob {
                method,
                path: path.to_string(),
                query: query.to_string(),
                headers: HeaderList::from_pairs([("content-type", "application/json"), ("x-trace", "abc")]),
                body: b"{\"model\":\"llama3.2\"}".to_vec(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn replays_request_against_backend() {
        let h = harness();
        let id = create(&h.store, HttpMethod::Post, "/api/chat", "keep_alive=5m").await;

        h.dispatcher.dispatch(id).await.unwrap();

        let calls = h.transport.requests_to(BACKEND);
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.method, HttpMethod::Post);
        assert_eq!(call.url.as_str(), "http://backend.test:11434/api/chat?keep_alive=5m");
        assert_eq!(call.headers.get("x-trace"), Some("abc"));
        assert_eq!(call.body, b"{\"model\":\"llama3.2\"}");
    }

    #[tokio::test]
    async fn webhook_carries_job_id_and_backend_body() {
        let h = harness();
        h.transport.route(BACKEND, Script::ok(b"{\"models\":[]}"));
        let id = create(&h.store, HttpMethod::Get, "/api/tags", "").await;

        let outcome = h.dispatcher.dispatch(id).await.unwrap();
        assert!(outcome.webhook.is_delivered());

        let hooks = h.transport.requests_to(WEBHOOK);
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].method, HttpMethod::Post);
        assert_eq!(hooks[0].url.as_str(), format!("{WEBHOOK}?job={id}"));
        assert_eq!(hooks[0].body, b"{\"models\":[]}");
    }

    #[tokio::test]
    async fn unknown_job_is_fatal_and_calls_nothing() {
        let h = harness();
        let id = JobId::new();

        let err = h.dispatcher.dispatch(id).await.unwrap_err();
        assert_eq!(err, DispatchError::JobNotFound(id));
        assert!(h.transport.requests_to("http").is_empty());
    }

    #[tokio::test]
    async fn non_success_backend_status_is_relayed() {
        let h = harness();
        h.transport.route(BACKEND, Script::status(404, b"{\"error\":\"model not found\"}"));
        let id = create(&h.store, HttpMethod::Post, "/api/generate", "").await;

        let outcome = h.dispatcher.dispatch(id).await.unwrap();
        assert_eq!(outcome.backend_status, 404);
        assert_eq!(outcome.backend_error.as_ref().map(|e| e.status), Some(404));

        let job = h.store.get(id).await.unwrap();
        assert_eq!(job.state(), JobState::Responded);
        assert_eq!(job.response_content, b"{\"error\":\"model not found\"}");
        assert_eq!(h.transport.requests_to(WEBHOOK)[0].body, job.response_content);
    }

    #[tokio::test]
    async fn webhook_failure_keeps_recorded_response() {
        let h = harness();
        h.transport.route(BACKEND, Script::ok(b"{\"done\":true}"));
        h.transport.route(WEBHOOK, Script::refused());
        let id = create(&h.store, HttpMethod::Post, "/api/generate", "").await;

        let outcome = h.dispatcher.dispatch(id).await.unwrap();
        assert!(matches!(outcome.webhook, WebhookDelivery::Failed(_)));
        assert_eq!(h.store.get(id).await.unwrap().response_content, b"{\"done\":true}");
    }

    #[tokio::test]
    async fn webhook_rejection_is_annotated() {
        let h = harness();
        h.transport.route(WEBHOOK, Script::status(500, b"boom"));
        let id = create(&h.store, HttpMethod::Post, "/", "").await;

        let outcome = h.dispatcher.dispatch(id).await.unwrap();
        match outcome.webhook {
            WebhookDelivery::Rejected(err) => assert_eq!(err.status, 500),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn backend_failure_leaves_job_in_flight() {
        let h = harness();
        h.transport.route(BACKEND, Script::timeout());
        let id = create(&h.store, HttpMethod::Post, "/api/generate", "").await;

        let err = h.dispatcher.dispatch(id).await.unwrap_err();
        assert!(err.is_backend_timeout());
        assert_eq!(err.phase(), Phase::BackendCall);

        let job = h.store.get(id).await.unwrap();
        assert_eq!(job.state(), JobState::InFlight);
        assert!(job.response_received_at.is_none());
        assert!(h.transport.requests_to(WEBHOOK).is_empty());
    }

    #[tokio::test]
    async fn repeated_execution_reports_earlier_claim() {
        let h = harness();
        let id = create(&h.store, HttpMethod::Post, "/api/generate", "").await;

        let first = h.dispatcher.dispatch(id).await.unwrap();
        let second = h.dispatcher.dispatch(id).await.unwrap();

        assert_eq!(first.claim, CheckpointEffect::Recorded);
        assert_eq!(first.response, CheckpointEffect::Recorded);
        assert_eq!(second.claim, CheckpointEffect::AlreadyRecorded);
        assert_eq!(second.response, CheckpointEffect::Replaced);
        assert_eq!(h.transport.requests_to(WEBHOOK).len(), 2);
    }
}
