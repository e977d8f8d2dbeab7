//! Layered configuration: environment variables, environment-specific TOML,
//! then a default TOML file, in ascending precedence.
//!
//! Section layout follows the pipeline's own contract rather than a generic
//! web-service's sections (no `server`/`cors`/`rate_limit`): database,
//! cache, partitioning, monitoring, processor, security, export.

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub partitioning: PartitioningConfig,
    pub monitoring: MonitoringConfig,
    pub processor: ProcessorConfig,
    pub security: SecurityConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub primary_url: String,
    #[serde(default)]
    pub replica_urls: Vec<String>,
    /// Selection weight per entry in `replica_urls`, same index order.
    /// Missing/short relative to `replica_urls` means the remaining
    /// replicas default to weight 1.
    #[serde(default)]
    pub replica_weights: Vec<u32>,
    #[serde(default = "default_max_replica_lag_ms")]
    pub max_replica_lag_ms: u64,
    pub max_connections: u32,
    pub min_connections: u32,
}

fn default_max_replica_lag_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub max_entries: usize,
    pub default_ttl_seconds: u64,
    pub max_size_mb: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PartitioningConfig {
    pub interval_days: u32,
    pub retention_days: u32,
    pub lock_ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitoringConfig {
    pub slow_query_threshold_ms: u64,
    pub metrics_namespace: String,
    #[serde(default = "default_report_interval_seconds")]
    pub report_interval_seconds: u64,
    #[serde(default = "default_auto_optimization")]
    pub auto_optimization: bool,
}

fn default_report_interval_seconds() -> u64 {
    300
}

fn default_auto_optimization() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessorConfig {
    pub worker_concurrency: usize,
    pub max_attempts: u32,
    pub circuit_failure_threshold: u32,
    pub circuit_min_throughput: u32,
    pub circuit_reset_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    pub encryption_key: String,
    pub session_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    pub output_dir: String,
    pub compression: String,
}

impl Config {
    /// Loads configuration from `config/default.{toml}`, then
    /// `config/{ENVIRONMENT}.toml`, then process environment variables,
    /// each layer overriding the previous, and fails fast on insecure
    /// production values.
    pub fn load() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(Environment::with_prefix("AUDIT").separator("_"));

        let loaded = builder.build()?;
        let mut config: Config = loaded.try_deserialize()?;
        config.validate(&environment)?;
        Ok(config)
    }

    fn validate(&mut self, environment: &str) -> Result<(), ConfigError> {
        if self.security.encryption_key.len() < 32 {
            return Err(ConfigError::Message(format!(
                "security.encryptionKey must be at least 32 characters long (current: {})",
                self.security.encryption_key.len()
            )));
        }

        if self.security.session_secret.len() < 32 {
            return Err(ConfigError::Message(format!(
                "security.sessionSecret must be at least 32 characters long (current: {})",
                self.security.session_secret.len()
            )));
        }

        if environment == "production" {
            self.validate_production_security()?;
        }

        if !self.database.primary_url.starts_with("postgresql://") {
            return Err(ConfigError::Message(
                "database.primaryUrl must be a PostgreSQL connection string".to_string(),
            ));
        }

        if !self.cache.redis_url.starts_with("redis://") {
            return Err(ConfigError::Message(
                "cache.redisUrl must be a Redis connection string".to_string(),
            ));
        }

        if self.partitioning.interval_days == 0 {
            return Err(ConfigError::Message(
                "partitioning.intervalDays must be greater than zero".to_string(),
            ));
        }

        if self.processor.circuit_min_throughput == 0 {
            return Err(ConfigError::Message(
                "processor.circuitMinThroughput must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_production_security(&self) -> Result<(), ConfigError> {
        let error_indicators = ["ERROR_", "INSECURE_DEFAULT", "CHANGE_THIS", "NOT_SET", "PLACEHOLDER"];

        for indicator in &error_indicators {
            if self.security.encryption_key.contains(indicator) {
                return Err(ConfigError::Message(format!(
                    "production deployment detected insecure encryption key (contains '{indicator}')"
                )));
            }
            if self.security.session_secret.contains(indicator) {
                return Err(ConfigError::Message(format!(
                    "production deployment detected insecure session secret (contains '{indicator}')"
                )));
            }
            if self.database.primary_url.contains(indicator) {
                return Err(ConfigError::Message(format!(
                    "production deployment detected missing database configuration (contains '{indicator}')"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            database: DatabaseConfig {
                primary_url: "postgresql://localhost/audit".to_string(),
                replica_urls: vec![],
                replica_weights: vec![],
                max_replica_lag_ms: 1000,
                max_connections: 10,
                min_connections: 1,
            },
            cache: CacheConfig {
                redis_url: "redis://localhost".to_string(),
                max_entries: 1000,
                default_ttl_seconds: 60,
                max_size_mb: 100,
            },
            partitioning: PartitioningConfig { interval_days: 30, retention_days: 365, lock_ttl_seconds: 30 },
            monitoring: MonitoringConfig {
                slow_query_threshold_ms: 500,
                metrics_namespace: "audit".to_string(),
                report_interval_seconds: 300,
                auto_optimization: true,
            },
            processor: ProcessorConfig {
                worker_concurrency: 4,
                max_attempts: 5,
                circuit_failure_threshold: 5,
                circuit_min_throughput: 10,
                circuit_reset_seconds: 30,
            },
            security: SecurityConfig {
                encryption_key: "01234567890123456789012345678901".to_string(),
                session_secret: "0123456789012345678901234567890123456789".to_string(),
            },
            export: ExportConfig { output_dir: "/tmp/audit-exports".to_string(), compression: "gzip".to_string() },
        }
    }

    #[test]
    fn rejects_short_encryption_key() {
        let mut config = base_config();
        config.security.encryption_key = "too-short".to_string();
        assert!(config.validate("development").is_err());
    }

    #[test]
    fn rejects_non_postgres_url() {
        let mut config = base_config();
        config.database.primary_url = "mysql://localhost/audit".to_string();
        assert!(config.validate("development").is_err());
    }

    #[test]
    fn production_rejects_placeholder_values() {
        let mut config = base_config();
        config.security.session_secret = "CHANGE_THIS_0123456789012345678901".to_string();
        assert!(config.validate("production").is_err());
    }

    #[test]
    fn valid_config_passes() {
        let mut config = base_config();
        assert!(config.validate("development").is_ok());
    }
}
