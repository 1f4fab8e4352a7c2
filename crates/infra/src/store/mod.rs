//! Job persistence boundary.
//!
//! Every checkpoint write runs as a short transaction that holds the job's row
//! lock: read the row, apply the checkpoint, write it back, release. No lock is
//! held between transactions, so the dispatcher never holds one across network
//! calls.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryJobStore;
pub use postgres::{JobTransaction, PostgresJobStore};
pub use r#trait::{CheckpointOutcome, JobStore, JobStoreError};
