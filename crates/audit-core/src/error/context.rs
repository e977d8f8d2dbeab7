use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request/operation-scoped metadata threaded through an error for debugging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub correlation_id: Option<String>,
    pub organization_id: Option<String>,
    pub principal_id: Option<String>,
}

impl RequestContext {
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_organization_id(mut self, id: impl Into<String>) -> Self {
        self.organization_id = Some(id.into());
        self
    }
}

/// Structured context attached to an `Error`, accumulated as it propagates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub occurred_at: DateTime<Utc>,
    pub request: RequestContext,
    pub trace: Vec<String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            occurred_at: Utc::now(),
            request: RequestContext::default(),
            trace: Vec::new(),
        }
    }
}

impl ErrorContext {
    pub fn add_trace(&mut self, note: impl Into<String>) {
        self.trace.push(note.into());
    }
}
