//! Durable Queue Adapter (C3): a Redis-backed `JobQueue` using sorted sets
//! for delayed redelivery, lists for FIFO-per-priority, and a processing set
//! for in-flight tracking.

use crate::envelope::{DeliveryEnvelope, JobId, JobPriority};
use async_trait::async_trait;
use audit_core::error::{Error, Result};
use chrono::{Duration, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total_jobs: u64,
    pub queued_jobs: u64,
    pub processing_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
}

/// At-least-once durable queue contract. `peek` never mutates
/// state; `ack`/`nack` finalize a prior `dequeue`.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, envelope: DeliveryEnvelope) -> Result<JobId>;
    async fn dequeue(&self, worker_id: &str) -> Result<Option<DeliveryEnvelope>>;
    async fn ack(&self, job_id: &JobId) -> Result<()>;
    async fn nack(&self, job_id: &JobId, error: String) -> Result<()>;
    async fn peek(&self, job_id: &JobId) -> Result<Option<DeliveryEnvelope>>;
    async fn get_stats(&self) -> Result<QueueStats>;
}

pub struct RedisJobQueue {
    redis: ConnectionManager,
    queue_name: String,
    processing_set: String,
    job_data_prefix: String,
    stats_key: String,
    enqueue_timeout: std::time::Duration,
}

impl RedisJobQueue {
    pub fn new(redis: ConnectionManager, queue_name: impl Into<String>) -> Self {
        let queue_name = queue_name.into();
        Self {
            redis,
            processing_set: format!("{queue_name}:processing"),
            job_data_prefix: format!("{queue_name}:job:"),
            stats_key: format!("{queue_name}:stats"),
            queue_name,
            enqueue_timeout: std::time::Duration::from_secs(5),
        }
    }

    fn job_key(&self, job_id: &JobId) -> String {
        format!("{}{}", self.job_data_prefix, job_id.as_str())
    }

    fn priority_queue_key(&self, priority: JobPriority) -> String {
        format!("{}:priority:{}", self.queue_name, priority as u8)
    }

    fn delayed_jobs_key(&self) -> String {
        format!("{}:delayed", self.queue_name)
    }

    async fn store_envelope(&self, envelope: &DeliveryEnvelope) -> Result<()> {
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(envelope)?;
        conn.set_ex::<_, _, ()>(self.job_key(&envelope.id), json, 86400 * 7).await?;
        Ok(())
    }

    async fn load_envelope(&self, job_id: &JobId) -> Result<Option<DeliveryEnvelope>> {
        let mut conn = self.redis.clone();
        let json: Option<String> = conn.get(self.job_key(job_id)).await?;
        match json {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn promote_delayed_jobs(&self) -> Result<u32> {
        let mut conn = self.redis.clone();
        let now = Utc::now().timestamp();

        let ready: Vec<String> = conn.zrangebyscore_limit(self.delayed_jobs_key(), 0, now, 0, 100).await?;
        if ready.is_empty() {
            return Ok(0);
        }

        let mut promoted = 0;
        for job_id_str in ready {
            let job_id = JobId::from_string(job_id_str);
            if let Some(mut envelope) = self.load_envelope(&job_id).await? {
                let _: u32 = conn.zrem(self.delayed_jobs_key(), job_id.as_str()).await?;
                envelope.scheduled_for = None;

                let priority_key = self.priority_queue_key(envelope.priority);
                conn.lpush::<_, _, ()>(&priority_key, job_id.as_str()).await?;
                self.store_envelope(&envelope).await?;
                promoted += 1;
            }
        }

        if promoted > 0 {
            info!("promoted {promoted} delayed jobs to ready queues on '{}'", self.queue_name);
        }
        Ok(promoted)
    }

    /// Reclaims processing-set entries stuck longer than `timeout` — a
    /// worker crash mid-job otherwise leaks that entry forever.
    pub async fn reclaim_stale_processing(&self, timeout: std::time::Duration) -> Result<u32> {
        let mut conn = self.redis.clone();
        let cutoff = (Utc::now() - Duration::from_std(timeout).unwrap_or_default()).timestamp();

        let in_flight: Vec<String> = conn.smembers(&self.processing_set).await?;
        let mut reclaimed = 0;

        for job_id_str in in_flight {
            let job_id = JobId::from_string(job_id_str);
            if let Some(envelope) = self.load_envelope(&job_id).await? {
                let started = envelope.attempts.last().map(|a| a.timestamp.timestamp()).unwrap_or(0);
                if started < cutoff {
                    warn!("reclaiming stale in-flight job {job_id}");
                    let _: u32 = conn.srem(&self.processing_set, job_id.as_str()).await?;
                    self.nack(&job_id, "worker timed out without ack/nack".to_string()).await?;
                    reclaimed += 1;
                }
            }
        }
        Ok(reclaimed)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, envelope: DeliveryEnvelope) -> Result<JobId> {
        let result = tokio::time::timeout(self.enqueue_timeout, async {
            self.store_envelope(&envelope).await?;
            let mut conn = self.redis.clone();

            if let Some(scheduled_for) = envelope.scheduled_for {
                conn.zadd::<_, _, _, ()>(self.delayed_jobs_key(), envelope.id.as_str(), scheduled_for.timestamp())
                    .await?;
            } else {
                let key = self.priority_queue_key(envelope.priority);
                conn.lpush::<_, _, ()>(&key, envelope.id.as_str()).await?;
            }

            conn.hincr::<_, _, _, ()>(&self.stats_key, "total_jobs", 1).await?;
            conn.hincr::<_, _, _, ()>(&self.stats_key, "queued_jobs", 1).await?;
            Ok::<_, Error>(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                debug!("enqueued job {} on '{}'", envelope.id, self.queue_name);
                Ok(envelope.id)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(Error::queue_unavailable(format!(
                "enqueue on '{}' exceeded timeout",
                self.queue_name
            ))),
        }
    }

    async fn dequeue(&self, worker_id: &str) -> Result<Option<DeliveryEnvelope>> {
        self.promote_delayed_jobs().await?;
        let mut conn = self.redis.clone();

        for priority in [JobPriority::Critical, JobPriority::High, JobPriority::Normal, JobPriority::Low] {
            let key = self.priority_queue_key(priority);
            let job_id_opt: Option<String> = conn.rpop(&key, None).await?;

            if let Some(job_id_str) = job_id_opt {
                let job_id = JobId::from_string(job_id_str);
                if let Some(mut envelope) = self.load_envelope(&job_id).await? {
                    if !envelope.is_ready() {
                        continue;
                    }
                    conn.sadd::<_, _, ()>(&self.processing_set, job_id.as_str()).await?;
                    envelope.record_attempt(None);
                    self.store_envelope(&envelope).await?;

                    conn.hincr::<_, _, _, ()>(&self.stats_key, "queued_jobs", -1).await?;
                    conn.hincr::<_, _, _, ()>(&self.stats_key, "processing_jobs", 1).await?;

                    debug!("dequeued job {job_id} for worker {worker_id}");
                    return Ok(Some(envelope));
                }
            }
        }

        Ok(None)
    }

    async fn ack(&self, job_id: &JobId) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.srem::<_, _, ()>(&self.processing_set, job_id.as_str()).await?;
        conn.hincr::<_, _, _, ()>(&self.stats_key, "processing_jobs", -1).await?;
        conn.hincr::<_, _, _, ()>(&self.stats_key, "completed_jobs", 1).await?;
        Ok(())
    }

    async fn nack(&self, job_id: &JobId, error: String) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.srem::<_, _, ()>(&self.processing_set, job_id.as_str()).await?;

        if let Some(mut envelope) = self.load_envelope(job_id).await? {
            envelope.record_attempt(Some(error));
            let delay_seconds = 2_u64.pow(envelope.attempt_count.min(20)).min(300);
            envelope.scheduled_for = Some(Utc::now() + Duration::seconds(delay_seconds as i64));
            self.store_envelope(&envelope).await?;

            conn.zadd::<_, _, _, ()>(self.delayed_jobs_key(), job_id.as_str(), envelope.scheduled_for.unwrap().timestamp())
                .await?;
        }

        conn.hincr::<_, _, _, ()>(&self.stats_key, "processing_jobs", -1).await?;
        conn.hincr::<_, _, _, ()>(&self.stats_key, "failed_jobs", 1).await?;
        Ok(())
    }

    async fn peek(&self, job_id: &JobId) -> Result<Option<DeliveryEnvelope>> {
        self.load_envelope(job_id).await
    }

    async fn get_stats(&self) -> Result<QueueStats> {
        let mut conn = self.redis.clone();
        let stats: std::collections::HashMap<String, i64> = conn.hgetall(&self.stats_key).await?;

        Ok(QueueStats {
            total_jobs: stats.get("total_jobs").copied().unwrap_or(0).max(0) as u64,
            queued_jobs: stats.get("queued_jobs").copied().unwrap_or(0).max(0) as u64,
            processing_jobs: stats.get("processing_jobs").copied().unwrap_or(0).max(0) as u64,
            completed_jobs: stats.get("completed_jobs").copied().unwrap_or(0).max(0) as u64,
            failed_jobs: stats.get("failed_jobs").copied().unwrap_or(0).max(0) as u64,
        })
    }
}
