//! End-to-end seed scenarios for the queue/retry/breaker/DLQ pipeline.
//! Mirrors the concrete scenarios enumerated for this subsystem: retry then
//! success, DLQ routing on permanent failure, and circuit-opens-then-heals.

use async_trait::async_trait;
use audit_core::error::{Error, ErrorCode, Result};
use audit_core::model::{AuditEvent, EventStatus};
use audit_queue::{
    AttemptRecord, CircuitBreaker, CircuitBreakerConfig, DeadLetterConfig, DeadLetterHandler, DeliveryEnvelope,
    JobId, JobPriority, JobQueue, QueueStats, RetryPolicy, RetryStrategy,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct InMemoryQueue {
    jobs: Mutex<HashMap<String, DeliveryEnvelope>>,
}

impl InMemoryQueue {
    fn new() -> Self {
        Self { jobs: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, envelope: DeliveryEnvelope) -> Result<JobId> {
        let id = envelope.id.clone();
        self.jobs.lock().await.insert(id.as_str().to_string(), envelope);
        Ok(id)
    }

    async fn dequeue(&self, _worker_id: &str) -> Result<Option<DeliveryEnvelope>> {
        Ok(self.jobs.lock().await.values().next().cloned())
    }

    async fn ack(&self, job_id: &JobId) -> Result<()> {
        self.jobs.lock().await.remove(job_id.as_str());
        Ok(())
    }

    async fn nack(&self, job_id: &JobId, error: String) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(envelope) = jobs.get_mut(job_id.as_str()) {
            envelope.record_attempt(Some(error));
        }
        Ok(())
    }

    async fn peek(&self, job_id: &JobId) -> Result<Option<DeliveryEnvelope>> {
        Ok(self.jobs.lock().await.get(job_id.as_str()).cloned())
    }

    async fn get_stats(&self) -> Result<QueueStats> {
        let jobs = self.jobs.lock().await;
        Ok(QueueStats { total_jobs: jobs.len() as u64, queued_jobs: jobs.len() as u64, processing_jobs: 0, completed_jobs: 0, failed_jobs: 0 })
    }
}

fn sample_event() -> AuditEvent {
    AuditEvent::builder(Utc::now(), "user.login", EventStatus::Success).principal_id("u1").build()
}

#[tokio::test]
async fn retry_then_success_makes_three_attempts_with_no_dlq_record() {
    let dlq = Arc::new(DeadLetterHandler::new(DeadLetterConfig::default()));
    let attempt_count = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy {
        max_retries: 5,
        strategy: RetryStrategy::Fixed,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: false,
    };

    let counter = Arc::clone(&attempt_count);
    let outcome = audit_queue::execute_with_retry(
        move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::new(ErrorCode::NetworkConnectionRefused, "connection-reset"))
                } else {
                    Ok(())
                }
            }
        },
        &policy,
    )
    .await;

    assert!(outcome.success);
    assert_eq!(outcome.attempts.len(), 3);
    assert_eq!(dlq.stats().await.total_records, 0);
}

#[tokio::test]
async fn dlq_routing_fires_alert_at_threshold_one() {
    let alerted = Arc::new(AtomicU32::new(0));
    let alerted_clone = Arc::clone(&alerted);
    let dlq = DeadLetterHandler::new(DeadLetterConfig { alert_size_threshold: 1, ..Default::default() })
        .with_alert_callback(Arc::new(move |_stats| {
            alerted_clone.fetch_add(1, Ordering::SeqCst);
        }));

    let policy = RetryPolicy { max_retries: 2, strategy: RetryStrategy::Fixed, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(2), jitter: false };
    let outcome: audit_queue::retry::RetryOutcome<()> =
        audit_queue::execute_with_retry(|| async { Err(Error::permanent_handler_failure("handler always fails")) }, &policy).await;

    assert!(!outcome.success);

    let event = sample_event();
    let attempts: Vec<AttemptRecord> = outcome
        .attempts
        .iter()
        .map(|a| AttemptRecord { attempt: a.attempt, timestamp: a.timestamp, error: a.error.clone() })
        .collect();
    dlq.add_failed_event(event, JobId::new(), "audit-events", Utc::now(), attempts).await;

    let stats = dlq.stats().await;
    assert_eq!(stats.total_records, 1);
    assert_eq!(alerted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn circuit_opens_then_heals_after_recovery_timeout() {
    let breaker = CircuitBreaker::new(
        "seed-scenario",
        CircuitBreakerConfig { failure_threshold: 3, minimum_throughput: 3, recovery_timeout: Duration::from_millis(30), half_open_max_probes: 1 },
    );

    for _ in 0..3 {
        let result: Result<()> = breaker.execute(|| async { Err(Error::new(ErrorCode::NetworkTimeout, "boom")) }).await;
        assert!(result.is_err());
    }
    assert_eq!(breaker.state(), audit_queue::BreakerState::Open);

    let mut handler_invoked = false;
    let rejected: Result<()> = breaker
        .execute(|| async {
            handler_invoked = true;
            Ok(())
        })
        .await;
    assert!(rejected.is_err());
    assert!(!handler_invoked, "handler must not run while circuit is open");

    tokio::time::sleep(Duration::from_millis(40)).await;

    let probe: Result<()> = breaker.execute(|| async { Ok(()) }).await;
    assert!(probe.is_ok());
    assert_eq!(breaker.state(), audit_queue::BreakerState::Closed);
}

#[tokio::test]
async fn queue_enqueue_dequeue_ack_round_trip_has_no_silent_loss() {
    let queue = InMemoryQueue::new();
    let envelope = DeliveryEnvelope::new("audit-events", sample_event(), JobPriority::Normal);
    let id = queue.enqueue(envelope).await.unwrap();

    let dequeued = queue.dequeue("worker-1").await.unwrap().expect("job should be present");
    assert_eq!(dequeued.id, id);

    queue.ack(&id).await.unwrap();
    assert!(queue.peek(&id).await.unwrap().is_none());
}
