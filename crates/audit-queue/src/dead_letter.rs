//! Dead-Letter Handler (C6): records permanently-failed deliveries, enforces
//! retention, and fires an alert callback on configured thresholds.

use crate::envelope::{AttemptRecord, JobId};
use audit_core::model::AuditEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: uuid::Uuid,
    pub job_id: JobId,
    pub queue_name: String,
    pub event: AuditEvent,
    pub first_failure_at: DateTime<Utc>,
    pub last_error: String,
    pub attempts: Vec<AttemptRecord>,
    pub recorded_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeadLetterFilter {
    pub queue_name: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl DeadLetterFilter {
    fn matches(&self, record: &DeadLetterRecord) -> bool {
        if let Some(name) = &self.queue_name {
            if &record.queue_name != name {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.recorded_at < since {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterStats {
    pub total_records: usize,
    pub failure_rate: f64,
}

#[derive(Debug, Clone)]
pub struct DeadLetterConfig {
    pub alert_size_threshold: usize,
    pub alert_rate_threshold: f64,
    pub retention_days: i64,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self { alert_size_threshold: 100, alert_rate_threshold: 0.5, retention_days: 90 }
    }
}

pub type AlertCallback = Arc<dyn Fn(DeadLetterStats) + Send + Sync>;

/// In-memory dead-letter store; `audit-storage` is expected to back this
/// with a durable table via the same `DeadLetterRecord` shape.
pub struct DeadLetterHandler {
    config: DeadLetterConfig,
    records: RwLock<Vec<DeadLetterRecord>>,
    total_processed: RwLock<u64>,
    on_alert: Option<AlertCallback>,
}

impl DeadLetterHandler {
    pub fn new(config: DeadLetterConfig) -> Self {
        Self { config, records: RwLock::new(Vec::new()), total_processed: RwLock::new(0), on_alert: None }
    }

    pub fn with_alert_callback(mut self, callback: AlertCallback) -> Self {
        self.on_alert = Some(callback);
        self
    }

    /// Records a permanently-failed delivery, carrying over the envelope's
    /// full per-attempt history rather than just a final error and a count.
    pub async fn add_failed_event(
        &self,
        event: AuditEvent,
        job_id: JobId,
        queue_name: impl Into<String>,
        first_failure_at: DateTime<Utc>,
        attempts: Vec<AttemptRecord>,
    ) -> DeadLetterRecord {
        let last_error = attempts.last().and_then(|a| a.error.clone()).unwrap_or_default();
        let record = DeadLetterRecord {
            id: uuid::Uuid::new_v4(),
            job_id,
            queue_name: queue_name.into(),
            event,
            first_failure_at,
            last_error,
            attempts,
            recorded_at: Utc::now(),
        };

        {
            let mut records = self.records.write().await;
            records.push(record.clone());
        }
        {
            let mut total = self.total_processed.write().await;
            *total += 1;
        }

        self.maybe_alert().await;
        record
    }

    async fn maybe_alert(&self) {
        let Some(callback) = &self.on_alert else { return };
        let stats = self.stats().await;

        if stats.total_records >= self.config.alert_size_threshold
            || stats.failure_rate >= self.config.alert_rate_threshold
        {
            callback(stats);
        }
    }

    pub async fn stats(&self) -> DeadLetterStats {
        let records = self.records.read().await;
        let total_processed = *self.total_processed.read().await;
        let failure_rate = if total_processed == 0 { 0.0 } else { records.len() as f64 / total_processed as f64 };
        DeadLetterStats { total_records: records.len(), failure_rate }
    }

    pub async fn list(&self, filter: &DeadLetterFilter) -> Vec<DeadLetterRecord> {
        self.records.read().await.iter().filter(|r| filter.matches(r)).cloned().collect()
    }

    pub async fn requeue(&self, id: uuid::Uuid) -> Option<DeadLetterRecord> {
        let mut records = self.records.write().await;
        let position = records.iter().position(|r| r.id == id)?;
        Some(records.remove(position))
    }

    pub async fn purge_older_than(&self, days: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.recorded_at >= cutoff);
        before - records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::model::{AuditEvent, EventStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_event() -> AuditEvent {
        AuditEvent::builder(Utc::now(), "user.login", EventStatus::Success).principal_id("u1").build()
    }

    fn sample_attempts(count: u32, error: &str) -> Vec<AttemptRecord> {
        (1..=count).map(|n| AttemptRecord { attempt: n, timestamp: Utc::now(), error: Some(error.to_string()) }).collect()
    }

    #[tokio::test]
    async fn alert_fires_when_size_threshold_is_one() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let handler = DeadLetterHandler::new(DeadLetterConfig { alert_size_threshold: 1, ..Default::default() })
            .with_alert_callback(Arc::new(move |_stats| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }));

        handler.add_failed_event(sample_event(), JobId::new(), "audit-events", Utc::now(), sample_attempts(3, "permanent")).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn list_filters_by_queue_name() {
        let handler = DeadLetterHandler::new(DeadLetterConfig::default());
        handler.add_failed_event(sample_event(), JobId::new(), "queue-a", Utc::now(), sample_attempts(1, "permanent")).await;
        handler.add_failed_event(sample_event(), JobId::new(), "queue-b", Utc::now(), sample_attempts(1, "permanent")).await;

        let filter = DeadLetterFilter { queue_name: Some("queue-a".to_string()), since: None };
        let records = handler.list(&filter).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].queue_name, "queue-a");
    }

    #[tokio::test]
    async fn requeue_removes_record() {
        let handler = DeadLetterHandler::new(DeadLetterConfig::default());
        let record =
            handler.add_failed_event(sample_event(), JobId::new(), "audit-events", Utc::now(), sample_attempts(1, "permanent")).await;

        let requeued = handler.requeue(record.id).await;
        assert!(requeued.is_some());
        assert_eq!(handler.stats().await.total_records, 0);
    }

    #[tokio::test]
    async fn purge_older_than_removes_stale_records() {
        let handler = DeadLetterHandler::new(DeadLetterConfig::default());
        handler.add_failed_event(sample_event(), JobId::new(), "audit-events", Utc::now(), sample_attempts(1, "permanent")).await;

        let purged = handler.purge_older_than(0).await;
        assert_eq!(purged, 1);
    }

    #[tokio::test]
    async fn add_failed_event_carries_over_the_full_attempt_history() {
        let handler = DeadLetterHandler::new(DeadLetterConfig::default());
        let first_failure_at = Utc::now() - chrono::Duration::seconds(30);
        let attempts = sample_attempts(3, "connection-reset");

        let record = handler.add_failed_event(sample_event(), JobId::new(), "audit-events", first_failure_at, attempts).await;

        assert_eq!(record.attempt_count(), 3);
        assert_eq!(record.first_failure_at, first_failure_at);
        assert_eq!(record.last_error, "connection-reset");
    }
}
