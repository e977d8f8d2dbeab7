use super::codes::ErrorCode;
use prometheus::{IntCounterVec, Opts, Registry};

/// Prometheus counters for error occurrences, labeled by code and category.
///
/// Recording failures here is fire-and-forget: a metrics-registration or
/// increment failure is logged and swallowed, never propagated to the
/// caller ("metrics storage is write-only fire-and-forget; failures here never fail the
/// caller").
#[derive(Clone)]
pub struct ErrorMetrics {
    counter: IntCounterVec,
}

impl ErrorMetrics {
    pub fn new(registry: &Registry) -> Self {
        let counter = IntCounterVec::new(
            Opts::new("audit_errors_total", "Total errors observed, by code and category"),
            &["code", "category"],
        )
        .expect("static error metric definition is valid");

        if let Err(err) = registry.register(Box::new(counter.clone())) {
            tracing::warn!("failed to register error metrics: {err}");
        }

        Self { counter }
    }

    pub fn record(&self, code: ErrorCode) {
        self.counter
            .with_label_values(&[&code.to_string(), code.category()])
            .inc();
    }
}
