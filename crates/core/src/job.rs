//! The job record and its dispatch checkpoints.
//!
//! A job is created once with its request fields, then advanced by exactly two
//! checkpoints:
//!
//! ```text
//! created ──RequestSent──▶ in flight ──ResponseReceived──▶ responded
//! ```
//!
//! The request fields never change after creation. Checkpoints are applied by
//! the store while it holds the job's row lock, so `apply` only has to decide
//! what the new field values are.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{DomainError, DomainResult};
use crate::headers::HeaderList;
use crate::id::JobId;
use crate::method::HttpMethod;

/// Request fields captured from an inbound call, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub method: HttpMethod,
    pub path: String,
    pub query: String,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

/// One relayed request/response/webhook cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub request_method: HttpMethod,
    pub request_path: String,
    pub request_query: String,
    pub request_headers: HeaderList,
    pub request_body: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub request_sent_at: Option<DateTime<Utc>>,
    pub response_received_at: Option<DateTime<Utc>>,
    pub response_content: Vec<u8>,
    pub response_headers: HeaderList,
}

/// Derived lifecycle state. Never stored; computed from the timestamps.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, no dispatcher has picked it up yet.
    Queued,
    /// A dispatcher has claimed it; the backend has not answered (yet).
    InFlight,
    /// The backend response has been captured.
    Responded,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::InFlight => "in_flight",
            JobState::Responded => "responded",
        }
    }
}

/// A mutation the dispatcher records under the job's row lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkpoint {
    /// Phase 1: dispatch has begun.
    RequestSent { at: DateTime<Utc> },
    /// Phase 2: the backend answered (any status).
    ResponseReceived {
        at: DateTime<Utc>,
        content: Vec<u8>,
        headers: HeaderList,
    },
}

impl Checkpoint {
    pub fn name(&self) -> &'static str {
        match self {
            Checkpoint::RequestSent { .. } => "request_sent",
            Checkpoint::ResponseReceived { .. } => "response_received",
        }
    }
}

/// What applying a checkpoint did to the record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CheckpointEffect {
    /// First write of this field group.
    Recorded,
    /// `request_sent_at` was already set by an earlier execution; left as is.
    AlreadyRecorded,
    /// A later execution overwrote the response group (duplicate delivery).
    Replaced,
}

impl Job {
    /// Materialize a freshly created job. Both checkpoint groups start empty.
    pub fn create(id: JobId, new: NewJob, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            request_method: new.method,
            request_path: new.path,
            request_query: new.query,
            request_headers: new.headers,
            request_body: new.body,
            created_at,
            request_sent_at: None,
            response_received_at: None,
            response_content: Vec::new(),
            response_headers: HeaderList::new(),
        }
    }

    pub fn state(&self) -> JobState {
        match (self.request_sent_at, self.response_received_at) {
            (_, Some(_)) => JobState::Responded,
            (Some(_), None) => JobState::InFlight,
            (None, None) => JobState::Queued,
        }
    }

    /// Apply a checkpoint.
    ///
    /// - `RequestSent` keeps the earliest claim: once `request_sent_at` is set
    ///   it never moves.
    /// - `ResponseReceived` replaces the whole response group, so under
    ///   duplicate delivery the last committed execution wins and timestamp,
    ///   content and headers stay consistent with each other. The timestamp is
    ///   clamped to be no earlier than `request_sent_at`.
    pub fn apply(&mut self, checkpoint: Checkpoint) -> DomainResult<CheckpointEffect> {
        match checkpoint {
            Checkpoint::RequestSent { at } => {
                if self.request_sent_at.is_some() {
                    return Ok(CheckpointEffect::AlreadyRecorded);
                }
                self.request_sent_at = Some(at);
                Ok(CheckpointEffect::Recorded)
            }
            Checkpoint::ResponseReceived {
                at,
                content,
                headers,
            } => {
                let sent_at = self.request_sent_at.ok_or_else(|| {
                    DomainError::invariant(format!(
                        "job {} received a response before its request was sent",
                        self.id
                    ))
                })?;
                let effect = if self.response_received_at.is_some() {
                    CheckpointEffect::Replaced
                } else {
                    CheckpointEffect::Recorded
                };
                self.response_received_at = Some(at.max(sent_at));
                self.response_content = content;
                self.response_headers = headers;
                Ok(effect)
            }
        }
    }
}
