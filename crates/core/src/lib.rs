//! `hookrelay-core` — domain building blocks for the relay.
//!
//! This crate contains **pure domain** types (no infrastructure concerns): the
//! job record, its two dispatch checkpoints, and the preview rendered back to
//! callers.

pub mod error;
pub mod headers;
pub mod id;
pub mod job;
pub mod method;
pub mod preview;

pub use error::{DomainError, DomainResult};
pub use headers::HeaderList;
pub use id::JobId;
pub use job::{Checkpoint, CheckpointEffect, Job, JobState, NewJob};
pub use method::HttpMethod;
pub use preview::{EndpointShape, JobPreview, JobProgress};
