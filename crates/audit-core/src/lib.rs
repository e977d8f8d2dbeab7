pub mod config;
pub mod error;
pub mod integrity;
pub mod metrics;
pub mod model;
pub mod validation;

pub use config::Config;
pub use error::{Error, ErrorCode, ErrorContext, ErrorMetrics, Result};
pub use metrics::MetricsRegistry;
pub use model::{AuditEvent, AuditEventBuilder, DataClassification, EventStatus, SessionContext};
pub use validation::{ValidationIssue, ValidationOutcome, ValidatorConfig};

pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
