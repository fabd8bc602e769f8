//! Metrics recorded by the worker routines.

use std::sync::Arc;
use std::time::Duration;

use metrics::{Counter, Histogram};
use tracing::error;

use super::registry::{CounterVec, MetricOpts, MetricsError, MetricsRegistry, SummaryVec};

/// Label schema shared by both families.
pub const LABEL_NAMES: &[&str] = &["function", "variable", "type"];

pub const INVOCATIONS: MetricOpts =
    MetricOpts::new("counters_deferTest", "deferTest counters", LABEL_NAMES);

// Spelling matches the series already scraped by existing dashboards.
pub const LATENCY: MetricOpts =
    MetricOpts::new("histrograms_deferTest", "deferTest historgrams", LABEL_NAMES);

/// Value of the `variable` label.
pub const VARIABLE: &str = "start";
/// `type` label of the invocation counter.
pub const COUNTER_TYPE: &str = "counter";
/// `type` label of the latency summary.
pub const COMPLETE_TYPE: &str = "complete";

/// Trait for recording worker metrics.
pub trait MetricsRecorder: Clone + Send + Sync + 'static {
    /// Counts one invocation of `function`.
    fn record_invocation(&self, function: &'static str);

    /// Records how long one invocation of `function` took.
    fn record_latency(&self, function: &'static str, elapsed: Duration);
}

/// Prometheus metrics collector.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<MetricsRegistry>,
    invocations: CounterVec,
    latency: SummaryVec,
}

impl Metrics {
    /// Registers the worker metric families in `registry`.
    pub fn new(registry: &Arc<MetricsRegistry>) -> Result<Self, MetricsError> {
        Ok(Metrics {
            registry: Arc::clone(registry),
            invocations: registry.counter_vec(INVOCATIONS)?,
            latency: registry.summary_vec(LATENCY)?,
        })
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// Renders all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.registry.render()
    }

    /// The invocation counter child for `function`.
    pub fn invocation_counter(&self, function: &'static str) -> Counter {
        self.invocations
            .get_metric_with_label_values(&[function, VARIABLE, COUNTER_TYPE])
            .unwrap_or_else(|e| {
                error!(error = %e, function, "Dropping invocation count");
                Counter::noop()
            })
    }

    /// The latency summary child for `function`.
    pub fn latency_summary(&self, function: &'static str) -> Histogram {
        self.latency
            .get_metric_with_label_values(&[function, VARIABLE, COMPLETE_TYPE])
            .unwrap_or_else(|e| {
                error!(error = %e, function, "Dropping latency observation");
                Histogram::noop()
            })
    }
}

impl MetricsRecorder for Metrics {
    fn record_invocation(&self, function: &'static str) {
        self.invocation_counter(function).increment(1);
    }

    fn record_latency(&self, function: &'static str, elapsed: Duration) {
        self.latency_summary(function).record(elapsed.as_secs_f64());
    }
}
