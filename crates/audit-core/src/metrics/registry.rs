use crate::config::MonitoringConfig;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Shared Prometheus registry handed to every crate's metric sets
/// (error counters, queue/processor gauges, storage and export counters) so
/// they all surface under one namespace and one `/metrics` text dump.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    registry: Arc<Mutex<Registry>>,
    namespace: String,
}

impl MetricsRegistry {
    pub fn new(config: &MonitoringConfig) -> Self {
        let registry = Registry::new_custom(Some(config.metrics_namespace.clone()), None)
            .unwrap_or_else(|_| {
                warn!("failed to create custom metrics registry, falling back to default");
                Registry::new()
            });

        Self { registry: Arc::new(Mutex::new(registry)), namespace: config.metrics_namespace.clone() }
    }

    pub fn register<T>(&self, collector: T) -> Result<(), prometheus::Error>
    where
        T: prometheus::core::Collector + 'static,
    {
        self.registry
            .lock()
            .map_err(|_| prometheus::Error::Msg("failed to acquire registry lock".to_string()))?
            .register(Box::new(collector))
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.lock().map(|r| r.gather()).unwrap_or_default()
    }

    pub fn metrics_text(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.gather();

        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&families, &mut buffer) {
            warn!("failed to encode metrics: {err}");
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns a cheap handle to the underlying registry for constructors
    /// (such as `ErrorMetrics::new`) that register collectors directly
    /// against a `prometheus::Registry` rather than through this wrapper.
    pub fn handle(&self) -> Registry {
        self.registry.lock().expect("metrics registry lock poisoned").clone()
    }
}
