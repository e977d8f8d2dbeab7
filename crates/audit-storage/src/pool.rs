//! Connection pool wrapper over `sqlx::PgPool` with acquisition metrics.

use audit_core::config::DatabaseConfig;
use audit_core::error::{Error, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Acquisition counters exposed via `ConnectionPool::stats`.
#[derive(Debug, Default)]
struct PoolCounters {
    total_requests: AtomicU64,
    successful_connections: AtomicU64,
    failed_connections: AtomicU64,
    total_acquisition_millis: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub total_connections: u32,
    pub active_connections: u32,
    pub total_requests: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub average_acquisition_time_ms: f64,
}

/// Thin wrapper over the primary `PgPool` that records per-acquisition
/// latency and outcome so `ConnectionPool::stats` can report health without
/// polling `sqlx`'s internal counters directly.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: PgPool,
    acquire_timeout: Duration,
    counters: Arc<PoolCounters>,
}

impl ConnectionPool {
    pub async fn new(config: &DatabaseConfig, acquire_timeout: Duration) -> Result<Self> {
        info!("initializing primary connection pool");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(acquire_timeout)
            .connect(&config.primary_url)
            .await?;

        Ok(Self { pool, acquire_timeout, counters: Arc::new(PoolCounters::default()) })
    }

    /// Acquires a connection, recording latency and success/failure into the
    /// pool's running counters. Returns `Error::PoolExhausted` if the
    /// underlying pool times out waiting for a free slot.
    pub async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>> {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        match tokio::time::timeout(self.acquire_timeout, self.pool.acquire()).await {
            Ok(Ok(conn)) => {
                self.counters.successful_connections.fetch_add(1, Ordering::Relaxed);
                self.counters.total_acquisition_millis.fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                Ok(conn)
            }
            Ok(Err(err)) => {
                self.counters.failed_connections.fetch_add(1, Ordering::Relaxed);
                Err(Error::from(err))
            }
            Err(_) => {
                self.counters.failed_connections.fetch_add(1, Ordering::Relaxed);
                warn!("connection pool exhausted after {:?}", self.acquire_timeout);
                Err(Error::pool_exhausted(format!("no connection available within {:?}", self.acquire_timeout)))
            }
        }
    }

    pub fn raw(&self) -> &PgPool {
        &self.pool
    }

    pub async fn check_health(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let total_requests = self.counters.total_requests.load(Ordering::Relaxed);
        let successful = self.counters.successful_connections.load(Ordering::Relaxed);
        let failed = self.counters.failed_connections.load(Ordering::Relaxed);
        let total_millis = self.counters.total_acquisition_millis.load(Ordering::Relaxed);

        PoolStats {
            total_connections: self.pool.size(),
            active_connections: self.pool.size() - self.pool.num_idle() as u32,
            total_requests,
            successful_connections: successful,
            failed_connections: failed,
            average_acquisition_time_ms: if successful > 0 { total_millis as f64 / successful as f64 } else { 0.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_acquisition_time_is_zero_with_no_successes() {
        let counters = PoolCounters::default();
        counters.total_requests.fetch_add(3, Ordering::Relaxed);
        counters.failed_connections.fetch_add(3, Ordering::Relaxed);
        let avg = if counters.successful_connections.load(Ordering::Relaxed) > 0 {
            counters.total_acquisition_millis.load(Ordering::Relaxed) as f64
                / counters.successful_connections.load(Ordering::Relaxed) as f64
        } else {
            0.0
        };
        assert_eq!(avg, 0.0);
    }

    #[test]
    fn average_acquisition_time_divides_total_by_successful_count() {
        let counters = PoolCounters::default();
        counters.successful_connections.store(4, Ordering::Relaxed);
        counters.total_acquisition_millis.store(40, Ordering::Relaxed);
        let avg = counters.total_acquisition_millis.load(Ordering::Relaxed) as f64
            / counters.successful_connections.load(Ordering::Relaxed) as f64;
        assert_eq!(avg, 10.0);
    }
}
