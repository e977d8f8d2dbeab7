//! # Error Handling Framework
//!
//! Structured error codes, rich context, severity classification, and
//! Prometheus-backed error metrics for the audit pipeline.
//!
//! Every error kind the pipeline's contract names — validation failures,
//! queue/circuit/pool conditions, integrity mismatches, export failures —
//! is represented as an `ErrorCode` variant rather than as ad hoc strings,
//! so callers (and the retry engine) classify errors by code.

pub mod codes;
pub mod context;
pub mod framework;
pub mod metrics;

pub use codes::ErrorCode;
pub use context::{ErrorContext, RequestContext};
pub use framework::{Error, ErrorCategory, ErrorSeverity, Result};
pub use metrics::ErrorMetrics;
