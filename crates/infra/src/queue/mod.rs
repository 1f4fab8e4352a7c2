//! Durable dispatch queue.
//!
//! Delivery is at-least-once: a claimed task that is neither acked nor failed
//! (worker crash, lost connection) becomes claimable again. The dispatcher is
//! written to tolerate running the same task twice.

pub mod in_memory;
pub mod postgres;
pub mod types;

pub use in_memory::InMemoryTaskQueue;
pub use postgres::PostgresTaskQueue;
pub use types::{DISPATCH_TASK_NAME, Delivery, DispatchTask, QueueError, TaskQueue};
