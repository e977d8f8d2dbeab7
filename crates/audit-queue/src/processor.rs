//! Reliable Processor (C7): a bounded worker pool orchestrating the queue,
//! retry engine, circuit breaker, and dead-letter handler through a fixed
//! six-step per-job flow: breaker check, retry-wrapped handler execution,
//! then ack/nack/dead-letter routing depending on the outcome.

use crate::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::dead_letter::DeadLetterHandler;
use crate::envelope::{DeliveryEnvelope, JobId};
use crate::queue::JobQueue;
use crate::retry::{execute_with_retry, RetryPolicy};
use audit_core::error::{Error, Result};
use audit_core::model::AuditEvent;
use chrono::Utc;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type Handler = Arc<dyn Fn(AuditEvent) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub queue_name: String,
    pub concurrency: usize,
    pub job_timeout: Duration,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Default)]
struct ProcessorMetrics {
    successes: AtomicU64,
    failures: AtomicU64,
    dlq_count: AtomicU64,
    ema_processing_millis: RwLock<f64>,
}

const EMA_ALPHA: f64 = 0.2;

impl ProcessorMetrics {
    async fn record_success(&self, elapsed: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        let mut ema = self.ema_processing_millis.write().await;
        let sample = elapsed.as_millis() as f64;
        *ema = if *ema == 0.0 { sample } else { EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * *ema };
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dlq(&self) {
        self.dlq_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub success_rate: f64,
    pub average_processing_time_ms: f64,
    pub breaker_state: BreakerState,
    pub dlq_growth_rate: f64,
    pub health_score: f64,
}

/// Orchestrates C3-C6 over a bounded worker pool.
pub struct ReliableProcessor {
    queue: Arc<dyn JobQueue>,
    handler: Handler,
    config: ProcessorConfig,
    retry_policy: RetryPolicy,
    breaker: CircuitBreaker,
    dlq: Arc<DeadLetterHandler>,
    semaphore: Arc<Semaphore>,
    metrics: Arc<ProcessorMetrics>,
    cancellation: CancellationToken,
}

impl ReliableProcessor {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Handler,
        config: ProcessorConfig,
        retry_policy: RetryPolicy,
        breaker: CircuitBreaker,
        dlq: Arc<DeadLetterHandler>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        Self {
            queue,
            handler,
            config,
            retry_policy,
            breaker,
            dlq,
            semaphore,
            metrics: Arc::new(ProcessorMetrics::default()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Drains in-flight work up to `shutdownTimeout`, then abandons
    /// remaining permits (the broker redelivers unacked jobs).
    pub async fn stop(&self) {
        self.cancellation.cancel();
        let _ = tokio::time::timeout(
            self.config.shutdown_timeout,
            self.semaphore.acquire_many(self.config.concurrency as u32),
        )
        .await;
        info!("processor for '{}' stopped", self.config.queue_name);
    }

    pub async fn run(self: Arc<Self>) {
        info!("reliable processor started for queue '{}'", self.config.queue_name);
        let mut poll_interval = tokio::time::interval(Duration::from_millis(200));

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = poll_interval.tick() => {
                    if let Err(err) = self.clone().process_one().await {
                        error!("error driving processor loop: {err}");
                    }
                }
            }
        }
    }

    async fn process_one(self: Arc<Self>) -> Result<()> {
        // Step 1: circuit check before even dequeuing further work.
        if self.breaker.state() == BreakerState::Open {
            debug!("breaker open for '{}', idling", self.config.queue_name);
            return Ok(());
        }

        let envelope = match self.queue.dequeue("reliable-processor").await? {
            Some(envelope) => envelope,
            None => return Ok(()),
        };

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.queue.nack(&envelope.id, "no worker capacity available".to_string()).await?;
                return Ok(());
            }
        };

        let this = Arc::clone(&self);
        tokio::spawn(async move {
            this.execute_job(envelope).await;
            drop(permit);
        });

        Ok(())
    }

    async fn execute_job(&self, mut envelope: DeliveryEnvelope) {
        let job_id = envelope.id.clone();
        let event = envelope.event.clone();
        let handler = Arc::clone(&self.handler);
        let start = std::time::Instant::now();

        let breaker = self.breaker.clone();
        let retry_policy = self.retry_policy.clone();
        let job_timeout = self.config.job_timeout;

        // Steps 2-3: execute inside retry engine, gated by the breaker.
        let outcome = execute_with_retry(
            {
                let handler = Arc::clone(&handler);
                let breaker = breaker.clone();
                let event = event.clone();
                move || {
                    let handler = Arc::clone(&handler);
                    let breaker = breaker.clone();
                    let event = event.clone();
                    async move {
                        match tokio::time::timeout(job_timeout, breaker.execute(|| (handler)(event))).await {
                            Ok(result) => result,
                            Err(_) => Err(Error::new(audit_core::error::ErrorCode::JobTimeout, "job execution timed out")),
                        }
                    }
                }
            },
            &retry_policy,
        )
        .await;

        // Fold the retry engine's per-attempt log into the envelope so its
        // `first_failure_at`/`attempts` reflect what actually happened here,
        // not just whatever the envelope carried in from a prior dequeue.
        for attempt in &outcome.attempts {
            envelope.record_attempt(attempt.error.clone());
        }

        match outcome.error {
            Some(err) if err.code == audit_core::error::ErrorCode::CircuitOpen => {
                // Step 6: breaker-rejected, redeliver without consuming DLQ budget.
                warn!("job {job_id} rejected by open circuit, scheduling redelivery");
                let _ = self.queue.nack(&job_id, err.to_string()).await;
            }
            Some(err) => {
                // Steps 4-5: retries exhausted or non-retryable -> DLQ, ack original.
                warn!("job {job_id} failed permanently: {err}");
                let first_failure_at = envelope.first_failure_at.unwrap_or_else(Utc::now);
                self.dlq
                    .add_failed_event(event, job_id.clone(), self.config.queue_name.clone(), first_failure_at, envelope.attempts.clone())
                    .await;
                self.metrics.record_dlq();
                self.metrics.record_failure();
                let _ = self.queue.ack(&job_id).await;
            }
            None => {
                let elapsed = start.elapsed();
                self.metrics.record_success(elapsed).await;
                let _ = self.queue.ack(&job_id).await;
            }
        }
    }

    pub async fn get_health_status(&self) -> HealthStatus {
        let successes = self.metrics.successes.load(Ordering::Relaxed) as f64;
        let failures = self.metrics.failures.load(Ordering::Relaxed) as f64;
        let total = successes + failures;
        let success_rate = if total == 0.0 { 1.0 } else { successes / total };

        let average_processing_time_ms = *self.metrics.ema_processing_millis.read().await;
        let breaker_state = self.breaker.state();
        let breaker_penalty = match breaker_state {
            BreakerState::Closed => 0.0,
            BreakerState::HalfOpen => 0.5,
            BreakerState::Open => 1.0,
        };

        let dlq_count = self.metrics.dlq_count.load(Ordering::Relaxed) as f64;
        let dlq_growth_rate = if total == 0.0 { 0.0 } else { dlq_count / total };

        let normalized_latency = (average_processing_time_ms / 1000.0).min(1.0);
        let health_score =
            (success_rate * 0.5) + ((1.0 - normalized_latency) * 0.2) + ((1.0 - breaker_penalty) * 0.2) + ((1.0 - dlq_growth_rate.min(1.0)) * 0.1);

        HealthStatus { success_rate, average_processing_time_ms, breaker_state, dlq_growth_rate, health_score }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::dead_letter::DeadLetterConfig;
    use crate::envelope::JobPriority;
    use audit_core::model::EventStatus;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Mutex;

    struct InMemoryQueue {
        pending: Mutex<Vec<DeliveryEnvelope>>,
        acked: Mutex<Vec<JobId>>,
        nacked: Mutex<Vec<JobId>>,
        stats: Mutex<HashMap<String, u64>>,
    }

    impl InMemoryQueue {
        fn new() -> Self {
            Self { pending: Mutex::new(Vec::new()), acked: Mutex::new(Vec::new()), nacked: Mutex::new(Vec::new()), stats: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl JobQueue for InMemoryQueue {
        async fn enqueue(&self, envelope: DeliveryEnvelope) -> Result<JobId> {
            let id = envelope.id.clone();
            self.pending.lock().await.push(envelope);
            Ok(id)
        }

        async fn dequeue(&self, _worker_id: &str) -> Result<Option<DeliveryEnvelope>> {
            Ok(self.pending.lock().await.pop())
        }

        async fn ack(&self, job_id: &JobId) -> Result<()> {
            self.acked.lock().await.push(job_id.clone());
            Ok(())
        }

        async fn nack(&self, job_id: &JobId, _error: String) -> Result<()> {
            self.nacked.lock().await.push(job_id.clone());
            Ok(())
        }

        async fn peek(&self, job_id: &JobId) -> Result<Option<DeliveryEnvelope>> {
            Ok(self.pending.lock().await.iter().find(|e| &e.id == job_id).cloned())
        }

        async fn get_stats(&self) -> Result<crate::queue::QueueStats> {
            let stats = self.stats.lock().await;
            Ok(crate::queue::QueueStats {
                total_jobs: *stats.get("total").unwrap_or(&0),
                queued_jobs: 0,
                processing_jobs: 0,
                completed_jobs: 0,
                failed_jobs: 0,
            })
        }
    }

    fn sample_envelope() -> DeliveryEnvelope {
        let event = AuditEvent::builder(Utc::now(), "user.login", EventStatus::Success).principal_id("u1").build();
        DeliveryEnvelope::new("audit-events", event, JobPriority::Normal)
    }

    fn test_config() -> ProcessorConfig {
        ProcessorConfig {
            queue_name: "audit-events".to_string(),
            concurrency: 2,
            job_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn successful_job_acks_and_records_success() {
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryQueue::new());
        queue.enqueue(sample_envelope()).await.unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let handler: Handler = Arc::new(move |_event| {
            let calls = Arc::clone(&calls_clone);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        let processor = Arc::new(ReliableProcessor::new(
            Arc::clone(&queue),
            handler,
            test_config(),
            RetryPolicy { max_retries: 1, jitter: false, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(5), ..Default::default() },
            CircuitBreaker::new("test", CircuitBreakerConfig::default()),
            Arc::new(DeadLetterHandler::new(DeadLetterConfig::default())),
        ));

        processor.clone().process_one().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let health = processor.get_health_status().await;
        assert_eq!(health.success_rate, 1.0);
    }

    #[tokio::test]
    async fn permanently_failing_job_routes_to_dlq() {
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryQueue::new());
        queue.enqueue(sample_envelope()).await.unwrap();

        let handler: Handler = Arc::new(|_event| {
            Box::pin(async move { Err(Error::validation("permanent failure")) })
        });

        let dlq = Arc::new(DeadLetterHandler::new(DeadLetterConfig::default()));
        let processor = Arc::new(ReliableProcessor::new(
            queue,
            handler,
            test_config(),
            RetryPolicy { max_retries: 1, jitter: false, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(5), ..Default::default() },
            CircuitBreaker::new("test", CircuitBreakerConfig::default()),
            Arc::clone(&dlq),
        ));

        processor.clone().process_one().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(dlq.stats().await.total_records, 1);
    }
}
