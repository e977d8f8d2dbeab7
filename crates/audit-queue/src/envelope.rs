//! Queue payload types: the job identity, priority, and delivery envelope
//! carried through the queue.

use audit_core::model::AuditEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum JobPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

/// A single recorded delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

/// The unit of work carried through the queue: an audit event plus delivery
/// bookkeeping, including a `first_failure_at`/`attempts` log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEnvelope {
    pub id: JobId,
    pub queue_name: String,
    pub priority: JobPriority,
    pub event: AuditEvent,
    pub attempt_count: u32,
    pub first_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub attempts: Vec<AttemptRecord>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryEnvelope {
    pub fn new(queue_name: impl Into<String>, event: AuditEvent, priority: JobPriority) -> Self {
        Self {
            id: JobId::new(),
            queue_name: queue_name.into(),
            priority,
            event,
            attempt_count: 0,
            first_failure_at: None,
            last_error: None,
            attempts: Vec::new(),
            scheduled_for: None,
            created_at: Utc::now(),
        }
    }

    pub fn record_attempt(&mut self, error: Option<String>) {
        self.attempt_count += 1;
        if error.is_some() && self.first_failure_at.is_none() {
            self.first_failure_at = Some(Utc::now());
        }
        self.last_error = error.clone();
        self.attempts.push(AttemptRecord { attempt: self.attempt_count, timestamp: Utc::now(), error });
    }

    pub fn is_ready(&self) -> bool {
        self.scheduled_for.map(|t| t <= Utc::now()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::model::{AuditEvent, EventStatus};

    fn sample_event() -> AuditEvent {
        AuditEvent::builder(Utc::now(), "user.login", EventStatus::Success).principal_id("u1").build()
    }

    #[test]
    fn record_attempt_sets_first_failure_once() {
        let mut envelope = DeliveryEnvelope::new("audit-events", sample_event(), JobPriority::Normal);
        envelope.record_attempt(Some("connection-reset".to_string()));
        let first = envelope.first_failure_at.unwrap();
        envelope.record_attempt(Some("connection-reset".to_string()));
        assert_eq!(envelope.first_failure_at.unwrap(), first);
        assert_eq!(envelope.attempt_count, 2);
        assert_eq!(envelope.attempts.len(), 2);
    }

    #[test]
    fn envelope_without_schedule_is_ready() {
        let envelope = DeliveryEnvelope::new("audit-events", sample_event(), JobPriority::Normal);
        assert!(envelope.is_ready());
    }
}
