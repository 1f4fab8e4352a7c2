//! Preview: the JSON returned to callers in place of the backend's answer.
//!
//! Clients written against the inference backend's API expect that API's
//! response schema. The preview carries the job details and, for a few known
//! endpoints, the minimal fields those clients need to parse the reply.
//!
//! Job lookup renders the same preview plus the job's dispatch progress, so a
//! polling client can see where the job is and recover a missed webhook.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::id::JobId;
use crate::job::{Job, JobState};
use crate::method::HttpMethod;

/// Backend endpoint schemas the preview knows how to mimic.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndpointShape {
    /// Job details only.
    Generic,
    /// Model listing endpoints: adds an empty `models` array.
    ModelList,
    /// Completion endpoint: adds a `response` field carrying the message.
    Generate,
}

impl EndpointShape {
    /// Shape for a request path, or `None` when the path is not simulated.
    pub fn for_path(path: &str) -> Option<Self> {
        match path {
            "/" => Some(EndpointShape::Generic),
            "/api/ps" | "/api/tags" => Some(EndpointShape::ModelList),
            "/api/generate" => Some(EndpointShape::Generate),
            _ => None,
        }
    }
}

/// Where a job is in its dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub state: JobState,
    #[serde(serialize_with = "serialize_optional_timestamp")]
    pub request_sent_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_optional_timestamp")]
    pub response_received_at: Option<DateTime<Utc>>,
    /// Backend response body (lossy UTF-8); `None` until it is recorded.
    pub response_content: Option<String>,
}

impl JobProgress {
    pub fn of(job: &Job) -> Self {
        Self {
            state: job.state(),
            request_sent_at: job.request_sent_at,
            response_received_at: job.response_received_at,
            response_content: job
                .response_received_at
                .map(|_| String::from_utf8_lossy(&job.response_content).into_owned()),
        }
    }
}

/// Job details rendered for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobPreview {
    pub job: JobId,
    pub url: String,
    pub webhook: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: DateTime<Utc>,
    pub message: String,
    /// Set for lookups; intake answers before any progress exists.
    #[serde(skip)]
    pub progress: Option<JobProgress>,
}

fn serialize_timestamp<S: serde::Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_timestamp(at))
}

fn serialize_optional_timestamp<S: serde::Serializer>(
    at: &Option<DateTime<Utc>>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match at {
        Some(at) => s.serialize_str(&format_timestamp(at)),
        None => s.serialize_none(),
    }
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl JobPreview {
    /// Build the preview for a job.
    ///
    /// `job_url` is the absolute polling URL; `webhook_url` already carries
    /// the `job` query parameter. The message describes the job's current
    /// state.
    pub fn new(job: &Job, job_url: String, webhook_url: String, webhook_method: HttpMethod) -> Self {
        let status = match job.state() {
            JobState::Queued => format!(
                "Your request has been accepted by the webhook relay and is waiting in a queue. \
                 Once it has been processed, an HTTP {webhook_method} request will be sent to \
                 {webhook_url} with the backend's response as its body."
            ),
            JobState::InFlight => format!(
                "Your request has been sent to the backend, which has not answered yet. \
                 Once it answers, an HTTP {webhook_method} request will be sent to \
                 {webhook_url} with the backend's response as its body."
            ),
            JobState::Responded => format!(
                "The backend has answered your request. Its response was relayed with an HTTP \
                 {webhook_method} request to {webhook_url} and is included in this job's \
                 details as response_content."
            ),
        };
        let message = format!(
            "{status} You can check on this job at any time by visiting {job_url}.\n\n\
             The job ID is part of this JSON response, and is repeated below in case you need \
             to read it from this message.\n\n\
             {id}",
            id = job.id,
        );

        Self {
            job: job.id,
            url: job_url,
            webhook: webhook_url,
            created_at: job.created_at,
            message,
            progress: None,
        }
    }

    /// Attach the job's dispatch progress.
    pub fn with_progress(mut self, job: &Job) -> Self {
        self.progress = Some(JobProgress::of(job));
        self
    }

    /// Render as a JSON object shaped for `shape`.
    pub fn to_json(&self, shape: EndpointShape) -> JsonValue {
        let mut object = match serde_json::to_value(self) {
            Ok(JsonValue::Object(map)) => map,
            // A struct of strings always serializes to an object.
            _ => Map::new(),
        };

        if let Some(progress) = &self.progress {
            if let Ok(JsonValue::Object(fields)) = serde_json::to_value(progress) {
                object.extend(fields);
            }
        }

        match shape {
            EndpointShape::Generic => {}
            EndpointShape::ModelList => {
                object.insert("models".to_string(), JsonValue::Array(Vec::new()));
            }
            EndpointShape::Generate => {
                object.insert("response".to_string(), JsonValue::String(self.message.clone()));
            }
        }

        JsonValue::Object(object)
    }
}
