pub mod builder;
pub mod compensator;
pub mod engine;
pub mod error;
pub mod maintenance;
pub mod metrics;
pub mod policy;
pub mod retry;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;

pub use builder::EngineBuilder;
pub use compensator::TicketRefund;
pub use engine::AdmissionEngine;
pub use error::EngineError;
pub use metrics::{EngineMetrics, EngineMetricsSnapshot};
pub use policy::{FailurePolicies, FailurePolicy};
pub use retry::{ContentionController, RetryPolicy};
pub use status::StatusReporter;
