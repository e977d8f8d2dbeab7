//! Partition manager (C11): idempotent time-range partition creation and
//! expired-partition retirement, guarded by a Redis-backed distributed lock
//! so concurrent maintenance runs across instances don't race on DDL.

use audit_core::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ExistenceCheck, SetExpiry, SetOptions};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

const RESERVED_IDENTIFIERS: &[&str] = &["public", "information_schema", "pg_catalog", "pg_toast"];

/// Rejects anything that isn't a safe, unquoted Postgres identifier before
/// it is interpolated into DDL — partition names are built from dates, not
/// user input, but this is the same defense the primary schema uses.
fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 63 {
        return Err(Error::validation("identifier must be 1-63 characters long"));
    }
    let first = name.chars().next().unwrap();
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(Error::validation("identifier must start with a letter or underscore"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::validation("identifier may only contain letters, digits, and underscores"));
    }
    if RESERVED_IDENTIFIERS.contains(&name.to_lowercase().as_str()) {
        return Err(Error::validation("identifier cannot be a reserved Postgres name"));
    }
    Ok(())
}

fn partition_name(table: &str, range_start: NaiveDate) -> String {
    format!("{table}_{}", range_start.format("%Y%m%d"))
}

/// The interval-start dates that together cover `range`, stepping by
/// `interval_days`. Pure date math, split out so it can be tested without a
/// database connection.
fn interval_starts(range: &std::ops::Range<NaiveDate>, interval_days: u32) -> Vec<NaiveDate> {
    let mut starts = Vec::new();
    let mut cursor = range.start;
    while cursor < range.end {
        starts.push(cursor);
        cursor += Duration::days(interval_days as i64);
    }
    starts
}

pub struct PartitionManager {
    pool: PgPool,
    redis: ConnectionManager,
    table: String,
    interval_days: u32,
    retention_days: u32,
    lock_ttl_seconds: u64,
}

impl PartitionManager {
    pub fn new(
        pool: PgPool,
        redis: ConnectionManager,
        table: impl Into<String>,
        interval_days: u32,
        retention_days: u32,
        lock_ttl_seconds: u64,
    ) -> Self {
        Self { pool, redis, table: table.into(), interval_days, retention_days, lock_ttl_seconds }
    }

    fn lock_key(&self) -> String {
        format!("partition-lock:{}", self.table)
    }

    /// Acquires a `SET NX PX` lock, runs `body`, and releases it — returns
    /// `Ok(false)` without running `body` if another instance holds the lock.
    async fn with_lock<F, Fut, T>(&self, body: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut conn = self.redis.clone();
        let token = Uuid::new_v4().to_string();
        let key = self.lock_key();

        let opts = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::PX(self.lock_ttl_seconds * 1000));
        let acquired: bool = conn.set_options::<_, _, Option<String>>(&key, &token, opts).await.map(|r| r.is_some())?;

        if !acquired {
            warn!("partition maintenance lock '{key}' held by another instance, skipping");
            return Ok(None);
        }

        let result = body().await;

        let held_token: Option<String> = conn.get(&key).await?;
        if held_token.as_deref() == Some(token.as_str()) {
            let _: () = conn.del(&key).await?;
        }

        result.map(Some)
    }

    /// Creates every interval partition covering `range`, idempotently:
    /// `CREATE TABLE IF NOT EXISTS` plus the distributed lock make
    /// concurrent/repeat calls across the whole range a no-op.
    pub async fn ensure_partitions(&self, range: std::ops::Range<NaiveDate>) -> Result<Vec<String>> {
        validate_identifier(&self.table)?;
        let outcome = self
            .with_lock(|| async {
                let mut created = Vec::new();

                for cursor in interval_starts(&range, self.interval_days) {
                    let interval_end = cursor + Duration::days(self.interval_days as i64);
                    let name = partition_name(&self.table, cursor);
                    validate_identifier(&name)?;

                    let sql = format!(
                        "CREATE TABLE IF NOT EXISTS \"{name}\" PARTITION OF \"{}\" FOR VALUES FROM ('{}') TO ('{}')",
                        self.table, cursor, interval_end
                    );
                    sqlx::query(&sql).execute(&self.pool).await?;
                    info!("ensured partition '{name}' for range {cursor}..{interval_end}");
                    created.push(name);
                }

                Ok(created)
            })
            .await?;

        Ok(outcome.unwrap_or_default())
    }

    /// Drops partitions whose entire range is older than `retention_days`.
    pub async fn drop_expired(&self) -> Result<Vec<String>> {
        let cutoff = Utc::now().naive_utc().date() - Duration::days(self.retention_days as i64);
        let dropped = self
            .with_lock(|| async {
                let rows: Vec<(String,)> = sqlx::query_as(
                    "SELECT child.relname FROM pg_inherits \
                     JOIN pg_class parent ON pg_inherits.inhparent = parent.oid \
                     JOIN pg_class child ON pg_inherits.inhrelid = child.oid \
                     WHERE parent.relname = $1",
                )
                .bind(&self.table)
                .fetch_all(&self.pool)
                .await?;

                let mut dropped = Vec::new();
                for (name,) in rows {
                    if let Some(date) = Self::parse_partition_date(&name, &self.table) {
                        if date < cutoff {
                            validate_identifier(&name)?;
                            let sql = format!("DROP TABLE IF EXISTS \"{name}\"");
                            sqlx::query(&sql).execute(&self.pool).await?;
                            info!("dropped expired partition '{name}'");
                            dropped.push(name);
                        }
                    }
                }
                Ok(dropped)
            })
            .await?;

        Ok(dropped.unwrap_or_default())
    }

    fn parse_partition_date(name: &str, table: &str) -> Option<NaiveDate> {
        let suffix = name.strip_prefix(&format!("{table}_"))?;
        NaiveDate::parse_from_str(suffix, "%Y%m%d").ok()
    }

    pub async fn analyze_performance(&self) -> Result<Vec<PartitionStat>> {
        validate_identifier(&self.table)?;
        let rows: Vec<(String, i64, Option<DateTime<Utc>>)> = sqlx::query_as(&format!(
            "SELECT relname, n_live_tup, last_analyze FROM pg_stat_user_tables WHERE relname LIKE '{}_%'",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, row_count, last_analyze)| PartitionStat { name, row_count, last_analyze })
            .collect())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PartitionStat {
    pub name: String,
    pub row_count: i64,
    pub last_analyze: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_reserved_and_malformed_identifiers() {
        assert!(validate_identifier("public").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1leading_digit").is_err());
        assert!(validate_identifier("has-hyphen").is_err());
        assert!(validate_identifier("audit_events_20260101").is_ok());
    }

    #[test]
    fn partition_name_is_date_suffixed() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_eq!(partition_name("audit_events", start), "audit_events_20260101");
    }

    #[test]
    fn parse_partition_date_round_trips_through_naming_scheme() {
        let start = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let name = partition_name("audit_events", start);
        assert_eq!(PartitionManager::parse_partition_date(&name, "audit_events"), Some(start));
    }

    #[test]
    fn parse_partition_date_rejects_foreign_table_names() {
        assert_eq!(PartitionManager::parse_partition_date("other_table_20260101", "audit_events"), None);
    }

    #[test]
    fn interval_starts_covers_a_multi_interval_range() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let starts = interval_starts(&(start..end), 30);
        assert_eq!(
            starts,
            vec![
                NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
                NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            ]
        );
    }

    #[test]
    fn interval_starts_is_empty_for_an_empty_range() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert!(interval_starts(&(start..start), 30).is_empty());
    }
}
