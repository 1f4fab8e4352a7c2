//! Infrastructure layer: storage, queueing, outbound HTTP, and the dispatch
//! pipeline built on them.

pub mod config;
pub mod dispatcher;
pub mod http_client;
pub mod intake;
pub mod lookup;
pub mod queue;
pub mod schema;
pub mod store;
pub mod workers;

mod integration_tests;

pub use config::{ConfigError, RelayConfig};
pub use dispatcher::{DispatchError, DispatchOutcome, JobDispatcher, Phase, WebhookDelivery};
pub use http_client::{HttpTransport, ReqwestTransport};
pub use intake::{IntakeError, IntakeReceipt, JobIntake};
pub use lookup::JobLookup;
