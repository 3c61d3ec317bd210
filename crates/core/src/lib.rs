pub mod admission;
pub mod catalog;
pub mod counter;
pub mod status;
pub mod types;
pub mod window;

pub use admission::{AdmissionResult, AdmissionTicket, DenialReason, Dimension, Plan};
pub use catalog::{CatalogError, Ceilings, LimitCatalog};
pub use counter::{RefundOutcome, UsageCounter};
pub use status::{OperationStatus, StatusReport, WindowUsage};
pub use types::{Operation, Platform, Subject, SubjectError, Tier, validate_subject};
pub use window::{Window, WindowConfig, WindowError, WindowKind};
