//! Read-replica router (C10): routes read-only queries to replica pools,
//! caching pools per URL the way a schema-per-tenant cache caches pools per schema.

use audit_core::config::DatabaseConfig;
use audit_core::error::Result;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    RoundRobin,
    Weighted,
    LeastLatency,
}

#[derive(Clone)]
struct ReplicaHandle {
    url: String,
    pool: PgPool,
    weight: u32,
    average_latency_millis: Arc<Mutex<f64>>,
}

/// Routes read queries across replica pools, falling back to the primary
/// pool when no replica is healthy and `fallback_to_master` is set. A
/// replica is healthy for a given selection iff it answers within the pool's
/// acquire timeout and its replication lag is at or below `max_lag_ms`.
pub struct ReplicaRouter {
    replicas: Vec<ReplicaHandle>,
    pools: Arc<DashMap<String, PgPool>>,
    policy: SelectionPolicy,
    fallback_to_master: bool,
    max_lag_ms: u64,
    round_robin_cursor: AtomicUsize,
}

impl ReplicaRouter {
    pub async fn new(config: &DatabaseConfig, policy: SelectionPolicy, fallback_to_master: bool) -> Result<Self> {
        let pools = Arc::new(DashMap::new());
        let mut replicas = Vec::with_capacity(config.replica_urls.len());

        for (idx, url) in config.replica_urls.iter().enumerate() {
            match Self::connect(config, url).await {
                Ok(pool) => {
                    pools.insert(url.clone(), pool.clone());
                    let weight = config.replica_weights.get(idx).copied().unwrap_or(1).max(1);
                    replicas.push(ReplicaHandle {
                        url: url.clone(),
                        pool,
                        weight,
                        average_latency_millis: Arc::new(Mutex::new(0.0)),
                    });
                }
                Err(err) => warn!("replica '{url}' unavailable at startup: {err}"),
            }
        }

        info!("replica router initialized with {} healthy replica(s)", replicas.len());
        Ok(Self {
            replicas,
            pools,
            policy,
            fallback_to_master,
            max_lag_ms: config.max_replica_lag_ms,
            round_robin_cursor: AtomicUsize::new(0),
        })
    }

    async fn connect(config: &DatabaseConfig, url: &str) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(std::cmp::max(1, config.max_connections / 4))
            .min_connections(1)
            .connect(url)
            .await?;
        Ok(pool)
    }

    /// Reachable and within `max_lag_ms` replication lag. Queries
    /// `pg_last_xact_replay_timestamp()`, which is `NULL` on a primary or a
    /// replica that hasn't replayed any transaction yet — treated as
    /// healthy since there's no lag to measure.
    async fn probe_health(pool: &PgPool, max_lag_ms: u64) -> bool {
        let row: std::result::Result<(Option<f64>,), sqlx::Error> =
            sqlx::query_as("SELECT EXTRACT(EPOCH FROM (now() - pg_last_xact_replay_timestamp())) * 1000.0")
                .fetch_one(pool)
                .await;

        match row {
            Ok((Some(lag_ms),)) => lag_ms <= max_lag_ms as f64,
            Ok((None,)) => true,
            Err(err) => {
                debug!("replica health probe failed: {err}");
                false
            }
        }
    }

    /// Returns the pool to send the next read query to, or `None` if no
    /// replica is currently healthy and fallback is disabled.
    pub async fn select(&self) -> Option<PgPool> {
        if self.replicas.is_empty() {
            return None;
        }

        let mut healthy = Vec::with_capacity(self.replicas.len());
        for handle in &self.replicas {
            if Self::probe_health(&handle.pool, self.max_lag_ms).await {
                healthy.push(handle);
            }
        }
        if healthy.is_empty() {
            warn!("no healthy replicas (reachability/lag check failed for all {})", self.replicas.len());
            return None;
        }

        let handle = match self.policy {
            SelectionPolicy::RoundRobin => {
                let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % healthy.len();
                healthy[idx]
            }
            SelectionPolicy::Weighted => Self::pick_weighted(&healthy),
            SelectionPolicy::LeastLatency => healthy
                .into_iter()
                .min_by(|a, b| {
                    a.average_latency_millis
                        .lock()
                        .partial_cmp(&b.average_latency_millis.lock())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("healthy is non-empty, checked above"),
        };

        debug!("routing read query to replica '{}'", handle.url);
        Some(handle.pool.clone())
    }

    /// Picks a replica with probability proportional to its weight, rather
    /// than always the single heaviest one.
    fn pick_weighted<'a>(candidates: &[&'a ReplicaHandle]) -> &'a ReplicaHandle {
        let total_weight: u32 = candidates.iter().map(|r| r.weight).sum();
        let mut roll = rand::thread_rng().gen_range(0..total_weight.max(1));

        for handle in candidates {
            if roll < handle.weight {
                return handle;
            }
            roll -= handle.weight;
        }
        candidates.last().expect("candidates is non-empty")
    }

    pub fn record_latency(&self, url: &str, millis: f64) {
        if let Some(handle) = self.replicas.iter().find(|r| r.url == url) {
            let mut avg = handle.average_latency_millis.lock();
            *avg = (*avg * 0.8) + (millis * 0.2);
        }
    }

    pub fn fallback_to_master(&self) -> bool {
        self.fallback_to_master
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn cached_pool_count(&self) -> usize {
        self.pools.len()
    }
}
