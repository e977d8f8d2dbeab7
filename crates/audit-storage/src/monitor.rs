//! Performance monitor (C12): slow-query tracking and maintenance advisories.
//! Grounded in the pool's own acquisition metrics rather than a separate
//! agent — the monitor reads `ConnectionPool`/`PartitionManager` state and
//! the database's own statistics views.

use crate::partition::PartitionManager;
use crate::pool::ConnectionPool;
use audit_core::error::Result;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct SlowQueryRecord {
    pub query_name: String,
    pub duration_ms: u64,
    #[serde(skip)]
    pub recorded_at: Instant,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct MaintenanceReport {
    pub slow_query_count: usize,
    pub slowest_queries: Vec<SlowQueryRecord>,
    pub partition_advisories: Vec<String>,
    pub vacuum_advisories: Vec<String>,
    pub unused_index_count: usize,
}

/// Tracks recent query latencies against a configured threshold and
/// surfaces maintenance advisories (stale partitions, large unanalyzed
/// tables) without taking any destructive action itself.
pub struct PerformanceMonitor {
    slow_query_threshold: Duration,
    recent_slow_queries: Mutex<VecDeque<SlowQueryRecord>>,
    max_tracked: usize,
}

impl PerformanceMonitor {
    pub fn new(slow_query_threshold_ms: u64) -> Self {
        Self {
            slow_query_threshold: Duration::from_millis(slow_query_threshold_ms),
            recent_slow_queries: Mutex::new(VecDeque::new()),
            max_tracked: 500,
        }
    }

    /// Records a query's duration; only durations at or above the threshold
    /// are retained, to bound memory on a busy pipeline.
    pub fn record_query(&self, query_name: impl Into<String>, duration: Duration) {
        if duration < self.slow_query_threshold {
            return;
        }
        let record = SlowQueryRecord { query_name: query_name.into(), duration_ms: duration.as_millis() as u64, recorded_at: Instant::now() };
        warn!("slow query '{}' took {}ms", record.query_name, record.duration_ms);

        let mut queue = self.recent_slow_queries.lock().expect("slow query log lock poisoned");
        queue.push_back(record);
        if queue.len() > self.max_tracked {
            queue.pop_front();
        }
    }

    pub fn slow_query_count(&self) -> usize {
        self.recent_slow_queries.lock().expect("slow query log lock poisoned").len()
    }

    pub async fn run_maintenance(&self, partitions: &PartitionManager, pool: &ConnectionPool) -> Result<MaintenanceReport> {
        pool.check_health().await?;

        let stats = partitions.analyze_performance().await?;
        let mut partition_advisories = Vec::new();
        let mut vacuum_advisories = Vec::new();

        for stat in &stats {
            if stat.last_analyze.is_none() {
                partition_advisories.push(format!("partition '{}' has never been analyzed", stat.name));
            }
            if stat.row_count > 1_000_000 {
                vacuum_advisories.push(format!("partition '{}' holds {} rows, consider VACUUM ANALYZE", stat.name, stat.row_count));
            }
        }

        let unused_index_count = self.count_unused_indexes(pool).await?;

        let queue = self.recent_slow_queries.lock().expect("slow query log lock poisoned");
        let mut slowest: Vec<SlowQueryRecord> = queue.iter().cloned().collect();
        slowest.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));
        slowest.truncate(10);

        Ok(MaintenanceReport {
            slow_query_count: queue.len(),
            slowest_queries: slowest,
            partition_advisories,
            vacuum_advisories,
            unused_index_count,
        })
    }

    /// Indexes Postgres has never used since the last stats reset —
    /// candidates for dropping.
    async fn count_unused_indexes(&self, pool: &ConnectionPool) -> Result<usize> {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM pg_stat_user_indexes WHERE idx_scan = 0")
            .fetch_one(pool.raw())
            .await?;
        Ok(row.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_queries_are_not_retained() {
        let monitor = PerformanceMonitor::new(100);
        monitor.record_query("fast_query", Duration::from_millis(10));
        assert_eq!(monitor.slow_query_count(), 0);
    }

    #[test]
    fn at_or_above_threshold_queries_are_retained() {
        let monitor = PerformanceMonitor::new(100);
        monitor.record_query("slow_query", Duration::from_millis(150));
        assert_eq!(monitor.slow_query_count(), 1);
    }

    #[test]
    fn tracked_queue_is_bounded_by_max_tracked() {
        let monitor = PerformanceMonitor::new(0);
        for i in 0..600 {
            monitor.record_query(format!("q{i}"), Duration::from_millis(1));
        }
        assert_eq!(monitor.slow_query_count(), 500);
    }
}
