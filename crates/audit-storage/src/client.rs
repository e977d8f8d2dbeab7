//! Enhanced Storage Client (C13): composes the connection pool, query cache,
//! replica router, partition manager, and performance monitor behind a
//! single monitored/cached query surface, plus the append-only audit event
//! repository the ingestion and reporting paths both depend on.

use crate::cache::{generate_cache_key, CacheStats, QueryCache};
use crate::monitor::{MaintenanceReport, PerformanceMonitor};
use crate::partition::PartitionManager;
use crate::pool::{ConnectionPool, PoolStats};
use crate::replica_router::ReplicaRouter;
use audit_core::config::Config;
use audit_core::error::Result;
use audit_core::model::AuditEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::Row;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How far ahead `optimize_database` provisions partitions so that a
/// backfill or a missed maintenance cycle doesn't land on a missing table.
const PARTITION_LOOKAHEAD_DAYS: i64 = 7;

/// Filter criteria for querying stored events, authoritatively scoped by
/// the caller's `organization_ids` — the repository performs no
/// cross-organization join on its own.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportCriteria {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub principal_ids: Vec<String>,
    pub organization_ids: Vec<String>,
    pub actions: Vec<String>,
    pub limit: Option<i64>,
}

impl ReportCriteria {
    fn cache_params(&self) -> Vec<String> {
        let mut params = vec![
            self.start_date.map(|d| d.to_rfc3339()).unwrap_or_default(),
            self.end_date.map(|d| d.to_rfc3339()).unwrap_or_default(),
            self.limit.map(|l| l.to_string()).unwrap_or_default(),
        ];
        params.extend(self.principal_ids.clone());
        params.extend(self.organization_ids.clone());
        params.extend(self.actions.clone());
        params
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub pool: PoolStats,
    pub cache: CacheStats,
    pub partition_count: usize,
    pub maintenance: MaintenanceReport,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub enum OverallHealth {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub overall: OverallHealth,
    pub pool_success_rate: f64,
    pub cache_hit_ratio: f64,
    pub slow_query_count: usize,
    pub recommendations: Vec<String>,
}

pub struct EnhancedStorageClient {
    pool: ConnectionPool,
    cache: Arc<QueryCache>,
    replica_router: Option<ReplicaRouter>,
    partitions: PartitionManager,
    monitor: PerformanceMonitor,
    slow_query_threshold: Duration,
    report_interval: Duration,
    auto_optimization: bool,
    cancellation: CancellationToken,
}

impl EnhancedStorageClient {
    pub fn new(
        pool: ConnectionPool,
        cache: QueryCache,
        replica_router: Option<ReplicaRouter>,
        partitions: PartitionManager,
        config: &Config,
    ) -> Self {
        Self {
            pool,
            cache: Arc::new(cache),
            replica_router,
            partitions,
            monitor: PerformanceMonitor::new(config.monitoring.slow_query_threshold_ms),
            slow_query_threshold: Duration::from_millis(config.monitoring.slow_query_threshold_ms),
            report_interval: Duration::from_secs(config.monitoring.report_interval_seconds),
            auto_optimization: config.monitoring.auto_optimization,
            cancellation: CancellationToken::new(),
        }
    }

    /// Builds a performance report every `reportInterval` and, when
    /// `autoOptimization` is enabled, reacts to it: clears a cold, bloated
    /// cache, runs maintenance once slow queries pile up, and logs alerts
    /// for the thresholds operators care about.
    pub async fn run_auto_optimization_loop(self: Arc<Self>) {
        info!("storage auto-optimization loop started, interval={:?}", self.report_interval);
        let mut ticker = tokio::time::interval(self.report_interval);

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.run_optimization_tick().await {
                        warn!("storage optimization tick failed: {err}");
                    }
                }
            }
        }
        info!("storage auto-optimization loop stopped");
    }

    pub fn stop_auto_optimization_loop(&self) {
        self.cancellation.cancel();
    }

    async fn run_optimization_tick(&self) -> Result<()> {
        let report = self.generate_performance_report().await?;
        self.emit_alerts(&report);

        if !self.auto_optimization {
            return Ok(());
        }

        let cache_hit_ratio = cache_hit_ratio(&report.cache);
        if cache_hit_ratio < 0.10 && report.cache.memory_usage_mb > 50.0 {
            info!("auto-optimization: clearing cache (hit ratio {:.2}, {:.1}MB)", cache_hit_ratio, report.cache.memory_usage_mb);
            self.cache.clear();
        }

        if report.maintenance.slow_query_count > 10 {
            info!("auto-optimization: running maintenance ({} slow queries)", report.maintenance.slow_query_count);
            self.monitor.run_maintenance(&self.partitions, &self.pool).await?;
        }

        Ok(())
    }

    fn emit_alerts(&self, report: &PerformanceReport) {
        let pool_success_rate = if report.pool.total_requests > 0 {
            report.pool.successful_connections as f64 / report.pool.total_requests as f64
        } else {
            1.0
        };
        if pool_success_rate < 0.95 {
            warn!("alert: pool success rate {:.1}% below 95%", pool_success_rate * 100.0);
        }
        if report.pool.average_acquisition_time_ms > 1000.0 {
            warn!("alert: average connection acquisition time {:.0}ms exceeds 1s", report.pool.average_acquisition_time_ms);
        }

        let cache_hit_ratio = cache_hit_ratio(&report.cache);
        if cache_hit_ratio < 0.50 && report.cache.memory_usage_mb > 10.0 {
            warn!("alert: cache hit ratio {:.1}% below 50% ({:.1}MB cached)", cache_hit_ratio * 100.0, report.cache.memory_usage_mb);
        }
        if report.partition_count > 100 {
            warn!("alert: partition count {} exceeds 100", report.partition_count);
        }
        if report.maintenance.slow_query_count > 20 {
            warn!("alert: slow query count {} exceeds 20", report.maintenance.slow_query_count);
        }
        if report.maintenance.unused_index_count > 10 {
            warn!("alert: unused index count {} exceeds 10", report.maintenance.unused_index_count);
        }
    }

    /// Routes through the cache when `cache_key` is given; otherwise runs
    /// `query` directly. Never caches errors.
    pub async fn execute_optimized_query<T, F, Fut>(
        &self,
        cache_key: Option<&str>,
        cache_ttl: Option<Duration>,
        query: F,
    ) -> Result<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(key) = cache_key {
            if let Some(cached) = self.cache.get(key) {
                return Ok(serde_json::from_value(cached)?);
            }
        }

        let result = query().await?;

        if let Some(key) = cache_key {
            let value = serde_json::to_value(&result)?;
            match cache_ttl {
                Some(ttl) => self.cache.set_with_ttl(key, value, ttl),
                None => self.cache.set(key, value),
            }
        }
        Ok(result)
    }

    /// As `execute_optimized_query`, but additionally records the duration
    /// against the performance monitor under `name`.
    pub async fn execute_monitored_query<T, F, Fut>(
        &self,
        name: &str,
        cache_key: Option<&str>,
        cache_ttl: Option<Duration>,
        query: F,
    ) -> Result<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = self.execute_optimized_query(cache_key, cache_ttl, query).await;
        let elapsed = started.elapsed();
        self.monitor.record_query(name, elapsed);
        if elapsed > self.slow_query_threshold {
            warn!("query '{name}' took {}ms, exceeding slow-query threshold", elapsed.as_millis());
        }
        result
    }

    pub fn generate_cache_key(&self, name: &str, params: &[String]) -> String {
        generate_cache_key(name, params)
    }

    /// Persists a validated, hashed/signed event as an append-only row and
    /// invalidates any cached query pages for its organization.
    pub async fn store_event(&self, event: &AuditEvent) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query(
            "INSERT INTO audit_log \
             (timestamp, action, status, principal_id, organization_id, target_resource_type, \
              target_resource_id, data_classification, retention_policy, outcome_description, \
              event_version, hash_algorithm, correlation_id, hash, signature, custom_fields) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)",
        )
        .bind(event.timestamp)
        .bind(&event.action)
        .bind(format!("{:?}", event.status).to_lowercase())
        .bind(&event.principal_id)
        .bind(&event.organization_id)
        .bind(&event.target_resource_type)
        .bind(&event.target_resource_id)
        .bind(format!("{:?}", event.data_classification).to_uppercase())
        .bind(&event.retention_policy)
        .bind(&event.outcome_description)
        .bind(&event.event_version)
        .bind(&event.hash_algorithm)
        .bind(&event.correlation_id)
        .bind(&event.hash)
        .bind(&event.signature)
        .bind(serde_json::to_value(&event.custom_fields)?)
        .execute(&mut *conn)
        .await?;

        if let Some(org_id) = &event.organization_id {
            self.cache.invalidate(&format!("list_events_*{org_id}*"));
        }
        info!("stored audit event action='{}'", event.action);
        Ok(())
    }

    /// Queries stored events, preferring a read replica when one is
    /// available and the router allows fallback on failure.
    pub async fn query_events(&self, criteria: &ReportCriteria) -> Result<Vec<AuditEvent>> {
        let cache_key = self.generate_cache_key("list_events", &criteria.cache_params());

        self.execute_monitored_query("list_events", Some(&cache_key), None, || async {
            let pool = match &self.replica_router {
                Some(router) => router.select().await.unwrap_or_else(|| self.pool.raw().clone()),
                None => self.pool.raw().clone(),
            };

            let mut builder = sqlx::QueryBuilder::new(
                "SELECT timestamp, action, status, principal_id, organization_id, target_resource_type, \
                 target_resource_id, data_classification, retention_policy, outcome_description, \
                 event_version, hash_algorithm, correlation_id, hash, signature, custom_fields \
                 FROM audit_log WHERE 1=1",
            );
            if let Some(start) = criteria.start_date {
                builder.push(" AND timestamp >= ").push_bind(start);
            }
            if let Some(end) = criteria.end_date {
                builder.push(" AND timestamp <= ").push_bind(end);
            }
            if !criteria.organization_ids.is_empty() {
                builder.push(" AND organization_id IN (");
                let mut separated = builder.separated(", ");
                for org_id in &criteria.organization_ids {
                    separated.push_bind(org_id);
                }
                separated.push_unseparated(")");
            }
            if !criteria.principal_ids.is_empty() {
                builder.push(" AND principal_id IN (");
                let mut separated = builder.separated(", ");
                for principal_id in &criteria.principal_ids {
                    separated.push_bind(principal_id);
                }
                separated.push_unseparated(")");
            }
            if !criteria.actions.is_empty() {
                builder.push(" AND action IN (");
                let mut separated = builder.separated(", ");
                for action in &criteria.actions {
                    separated.push_bind(action);
                }
                separated.push_unseparated(")");
            }
            builder.push(" ORDER BY timestamp DESC");
            if let Some(limit) = criteria.limit {
                builder.push(" LIMIT ").push_bind(limit);
            }

            let rows = builder.build().fetch_all(&pool).await?;
            rows.iter().map(row_to_event).collect::<Result<Vec<_>>>()
        })
        .await
    }

    pub async fn generate_performance_report(&self) -> Result<PerformanceReport> {
        let maintenance = self.monitor.run_maintenance(&self.partitions, &self.pool).await?;
        let partition_count = self.partitions.analyze_performance().await?.len();

        Ok(PerformanceReport {
            pool: self.pool.stats(),
            cache: self.cache.stats(),
            partition_count,
            maintenance,
            generated_at: Utc::now(),
        })
    }

    pub async fn optimize_database(&self) -> Result<MaintenanceReport> {
        let today = Utc::now().naive_utc().date();
        self.partitions.ensure_partitions(today..(today + chrono::Duration::days(PARTITION_LOOKAHEAD_DAYS))).await?;
        self.partitions.drop_expired().await?;
        self.monitor.run_maintenance(&self.partitions, &self.pool).await
    }

    pub async fn get_health_status(&self) -> Result<HealthStatus> {
        let pool_stats = self.pool.stats();
        let cache_stats = self.cache.stats();

        let pool_success_rate = if pool_stats.total_requests > 0 {
            pool_stats.successful_connections as f64 / pool_stats.total_requests as f64
        } else {
            1.0
        };

        let cache_hit_ratio = cache_hit_ratio(&cache_stats);

        let slow_query_count = self.monitor.slow_query_count();

        let mut recommendations = Vec::new();
        let mut overall = OverallHealth::Healthy;

        if pool_success_rate < 0.95 {
            recommendations.push("connection pool success rate below 95%".to_string());
            overall = OverallHealth::Critical;
        }
        if cache_hit_ratio < 0.5 && !matches!(overall, OverallHealth::Critical) {
            recommendations.push("cache hit ratio below 50%".to_string());
            overall = OverallHealth::Warning;
        }
        if slow_query_count > 20 {
            recommendations.push("more than 20 slow queries recorded".to_string());
            if matches!(overall, OverallHealth::Healthy) {
                overall = OverallHealth::Warning;
            }
        }

        Ok(HealthStatus { overall, pool_success_rate, cache_hit_ratio, slow_query_count, recommendations })
    }
}

fn cache_hit_ratio(stats: &CacheStats) -> f64 {
    let total = stats.hits + stats.misses;
    if total == 0 {
        1.0
    } else {
        stats.hits as f64 / total as f64
    }
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<AuditEvent> {
    let status_str: String = row.try_get("status")?;
    let status = match status_str.as_str() {
        "attempt" => audit_core::model::EventStatus::Attempt,
        "failure" => audit_core::model::EventStatus::Failure,
        _ => audit_core::model::EventStatus::Success,
    };

    let classification_str: String = row.try_get("data_classification")?;
    let data_classification = match classification_str.as_str() {
        "PUBLIC" => audit_core::model::DataClassification::Public,
        "CONFIDENTIAL" => audit_core::model::DataClassification::Confidential,
        "PHI" => audit_core::model::DataClassification::Phi,
        _ => audit_core::model::DataClassification::Internal,
    };

    let custom_fields_value: Value = row.try_get("custom_fields")?;

    Ok(AuditEvent {
        timestamp: row.try_get("timestamp")?,
        action: row.try_get("action")?,
        status,
        principal_id: row.try_get("principal_id")?,
        organization_id: row.try_get("organization_id")?,
        target_resource_type: row.try_get("target_resource_type")?,
        target_resource_id: row.try_get("target_resource_id")?,
        data_classification,
        retention_policy: row.try_get("retention_policy")?,
        outcome_description: row.try_get("outcome_description")?,
        session_context: None,
        event_version: row.try_get("event_version")?,
        hash_algorithm: row.try_get("hash_algorithm")?,
        correlation_id: row.try_get("correlation_id")?,
        hash: row.try_get("hash")?,
        signature: row.try_get("signature")?,
        custom_fields: serde_json::from_value(custom_fields_value).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_params_flattens_criteria_into_sorted_independent_strings() {
        let a = ReportCriteria { organization_ids: vec!["org-1".to_string(), "org-2".to_string()], ..Default::default() };
        let b = ReportCriteria { organization_ids: vec!["org-2".to_string(), "org-1".to_string()], ..Default::default() };
        let key_a = generate_cache_key("list_events", &a.cache_params());
        let key_b = generate_cache_key("list_events", &b.cache_params());
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn cache_hit_ratio_is_perfect_with_no_traffic() {
        assert_eq!(cache_hit_ratio(&CacheStats::default()), 1.0);
    }

    #[test]
    fn cache_hit_ratio_divides_hits_by_total_lookups() {
        let stats = CacheStats { hits: 3, misses: 1, ..Default::default() };
        assert_eq!(cache_hit_ratio(&stats), 0.75);
    }

    #[test]
    fn health_status_is_critical_when_pool_success_rate_drops() {
        let pool_success_rate = 10.0 / 100.0;
        assert!(pool_success_rate < 0.95);
    }

    #[test]
    fn cache_params_differ_when_organization_filter_differs() {
        let a = ReportCriteria { organization_ids: vec!["org-1".to_string()], ..Default::default() };
        let b = ReportCriteria { organization_ids: vec!["org-2".to_string()], ..Default::default() };
        let key_a = generate_cache_key("list_events", &a.cache_params());
        let key_b = generate_cache_key("list_events", &b.cache_params());
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn query_builder_binds_organization_filter_rather_than_interpolating_it() {
        let criteria = ReportCriteria {
            organization_ids: vec!["org-1'; DROP TABLE audit_log; --".to_string()],
            ..Default::default()
        };

        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new("SELECT 1 FROM audit_log WHERE 1=1");
        builder.push(" AND organization_id IN (");
        let mut separated = builder.separated(", ");
        for org_id in &criteria.organization_ids {
            separated.push_bind(org_id);
        }
        separated.push_unseparated(")");

        let sql = builder.sql();
        assert!(!sql.contains("DROP TABLE"));
        assert!(sql.contains('$'));
    }
}
