//! Explicitly owned metrics registry backed by the Prometheus exporter.
//!
//! Nothing is installed as the global `metrics` recorder: every component
//! that reports or serves metrics receives an `Arc<MetricsRegistry>`.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use metrics::{Counter, Histogram, Key, Label, Level, Metadata, Recorder, Unit};
use metrics_exporter_prometheus::{
    BuildError, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SummarySettings;

/// Quantiles reported for every summary.
pub const QUANTILES: [f64; 3] = [0.1, 0.5, 0.99];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to build the Prometheus recorder: {0}")]
    Build(#[from] BuildError),

    #[error("summary window needs at least one bucket")]
    EmptyWindow,

    #[error("invalid options for metric '{name}': {reason}")]
    InvalidOpts {
        name: &'static str,
        reason: &'static str,
    },

    #[error(
        "metric '{name}' is already registered as a {existing} with labels {existing_labels:?}, \
         cannot register it as a {requested} with labels {requested_labels:?}"
    )]
    SchemaMismatch {
        name: &'static str,
        existing: MetricKind,
        existing_labels: &'static [&'static str],
        requested: MetricKind,
        requested_labels: &'static [&'static str],
    },

    #[error("metric '{name}' expects {expected} label values, got {got}")]
    LabelCardinality {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("metric '{name}' got an empty value for label '{label}'")]
    EmptyLabelValue {
        name: &'static str,
        label: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Summary,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Counter => f.write_str("counter"),
            MetricKind::Summary => f.write_str("summary"),
        }
    }
}

/// Name, help text and label schema of a labelled metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricOpts {
    pub name: &'static str,
    pub help: &'static str,
    pub label_names: &'static [&'static str],
}

impl MetricOpts {
    pub const fn new(
        name: &'static str,
        help: &'static str,
        label_names: &'static [&'static str],
    ) -> Self {
        MetricOpts {
            name,
            help,
            label_names,
        }
    }

    fn validate(&self) -> Result<(), MetricsError> {
        let invalid = |reason| MetricsError::InvalidOpts {
            name: self.name,
            reason,
        };
        if self.name.is_empty() {
            return Err(invalid("empty name"));
        }
        if self.label_names.iter().any(|label| label.is_empty()) {
            return Err(invalid("empty label name"));
        }
        for (i, label) in self.label_names.iter().enumerate() {
            if self.label_names[..i].contains(label) {
                return Err(invalid("duplicate label name"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Family {
    kind: MetricKind,
    label_names: &'static [&'static str],
}

pub struct MetricsRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    families: Mutex<HashMap<&'static str, Family>>,
}

impl MetricsRegistry {
    /// Builds a registry whose summaries keep `summary.max_age` of samples,
    /// rotated in `summary.age_buckets` steps.
    pub fn new(summary: &SummarySettings) -> Result<Self, MetricsError> {
        let age_buckets =
            NonZeroU32::new(summary.age_buckets).ok_or(MetricsError::EmptyWindow)?;
        let bucket_duration = summary.max_age / summary.age_buckets;

        let recorder = PrometheusBuilder::new()
            .set_quantiles(&QUANTILES)?
            .set_bucket_duration(bucket_duration)?
            .set_bucket_count(age_buckets)
            .build_recorder();
        let handle = recorder.handle();

        Ok(MetricsRegistry {
            recorder,
            handle,
            families: Mutex::new(HashMap::new()),
        })
    }

    /// Registers (or looks up) a labelled counter family.
    pub fn counter_vec(self: &Arc<Self>, opts: MetricOpts) -> Result<CounterVec, MetricsError> {
        self.register_family(MetricKind::Counter, &opts)?;
        Ok(CounterVec {
            registry: Arc::clone(self),
            opts,
        })
    }

    /// Registers (or looks up) a labelled summary family. Observations are seconds.
    pub fn summary_vec(self: &Arc<Self>, opts: MetricOpts) -> Result<SummaryVec, MetricsError> {
        self.register_family(MetricKind::Summary, &opts)?;
        Ok(SummaryVec {
            registry: Arc::clone(self),
            opts,
        })
    }

    /// Renders every metric child in the Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Drains pending summary samples and rotates the age window.
    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }

    fn register_family(&self, kind: MetricKind, opts: &MetricOpts) -> Result<(), MetricsError> {
        opts.validate()?;

        let mut families = self.families.lock().unwrap_or_else(PoisonError::into_inner);
        match families.get(opts.name) {
            Some(existing)
                if existing.kind == kind && existing.label_names == opts.label_names =>
            {
                Ok(())
            }
            Some(existing) => Err(MetricsError::SchemaMismatch {
                name: opts.name,
                existing: existing.kind,
                existing_labels: existing.label_names,
                requested: kind,
                requested_labels: opts.label_names,
            }),
            None => {
                match kind {
                    MetricKind::Counter => {
                        self.recorder
                            .describe_counter(opts.name.into(), None, opts.help.into());
                    }
                    MetricKind::Summary => {
                        self.recorder.describe_histogram(
                            opts.name.into(),
                            Some(Unit::Seconds),
                            opts.help.into(),
                        );
                    }
                }
                families.insert(
                    opts.name,
                    Family {
                        kind,
                        label_names: opts.label_names,
                    },
                );
                debug!(metric = opts.name, kind = %kind, "Registered metric family");
                Ok(())
            }
        }
    }

    fn key(&self, opts: &MetricOpts, values: &[&str]) -> Result<Key, MetricsError> {
        if values.len() != opts.label_names.len() {
            return Err(MetricsError::LabelCardinality {
                name: opts.name,
                expected: opts.label_names.len(),
                got: values.len(),
            });
        }

        let mut labels = Vec::with_capacity(values.len());
        for (label, value) in opts.label_names.iter().zip(values) {
            if value.is_empty() {
                return Err(MetricsError::EmptyLabelValue {
                    name: opts.name,
                    label: *label,
                });
            }
            labels.push(Label::new(*label, value.to_string()));
        }

        Ok(Key::from_parts(opts.name, labels))
    }
}

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}

/// A counter family. Children are created on first request and live for
/// the lifetime of the registry.
#[derive(Clone)]
pub struct CounterVec {
    registry: Arc<MetricsRegistry>,
    opts: MetricOpts,
}

impl CounterVec {
    /// Returns the child for `values`, given in the family's label order.
    pub fn get_metric_with_label_values(&self, values: &[&str]) -> Result<Counter, MetricsError> {
        let key = self.registry.key(&self.opts, values)?;
        Ok(self.registry.recorder.register_counter(&key, &metadata()))
    }
}

/// A summary family, see [`CounterVec`].
#[derive(Clone)]
pub struct SummaryVec {
    registry: Arc<MetricsRegistry>,
    opts: MetricOpts,
}

impl SummaryVec {
    pub fn get_metric_with_label_values(
        &self,
        values: &[&str],
    ) -> Result<Histogram, MetricsError> {
        let key = self.registry.key(&self.opts, values)?;
        Ok(self.registry.recorder.register_histogram(&key, &metadata()))
    }
}

/// Runs registry upkeep every `every` until `cancel_token` is cancelled.
pub async fn run_upkeep_task(
    registry: Arc<MetricsRegistry>,
    every: Duration,
    cancel_token: CancellationToken,
) {
    info!(interval_secs = every.as_secs(), "Starting metrics upkeep task");

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => registry.run_upkeep(),
            _ = cancel_token.cancelled() => {
                info!("Metrics upkeep task received shutdown signal, exiting");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::exposition::find_sample;

    const LABELS: &[&str] = &["function", "variable", "type"];
    const COUNTER: MetricOpts = MetricOpts::new("test_counter", "test counters", LABELS);
    const SUMMARY: MetricOpts = MetricOpts::new("test_summary", "test summaries", LABELS);

    fn registry() -> Arc<MetricsRegistry> {
        Arc::new(MetricsRegistry::new(&SummarySettings::default()).unwrap())
    }

    #[test]
    fn repeated_registration_shares_state() {
        let registry = registry();
        let first = registry.counter_vec(COUNTER).unwrap();
        let second = registry.counter_vec(COUNTER).unwrap();

        first
            .get_metric_with_label_values(&["f", "v", "counter"])
            .unwrap()
            .increment(1);
        second
            .get_metric_with_label_values(&["f", "v", "counter"])
            .unwrap()
            .increment(2);

        let rendered = registry.render();
        assert_eq!(
            find_sample(&rendered, "test_counter", &[("function", "f"), ("type", "counter")]),
            Some(3.0),
            "rendered:\n{}",
            rendered
        );
    }

    #[test]
    fn distinct_label_values_are_distinct_children() {
        let registry = registry();
        let counters = registry.counter_vec(COUNTER).unwrap();

        counters
            .get_metric_with_label_values(&["a", "v", "counter"])
            .unwrap()
            .increment(1);
        counters
            .get_metric_with_label_values(&["b", "v", "counter"])
            .unwrap()
            .increment(5);

        let rendered = registry.render();
        assert_eq!(find_sample(&rendered, "test_counter", &[("function", "a")]), Some(1.0));
        assert_eq!(find_sample(&rendered, "test_counter", &[("function", "b")]), Some(5.0));
    }

    #[test]
    fn mismatched_label_schema_fails() {
        let registry = registry();
        registry.counter_vec(COUNTER).unwrap();

        let err = registry
            .counter_vec(MetricOpts::new("test_counter", "test counters", &["function"]))
            .err()
            .unwrap();
        assert!(matches!(err, MetricsError::SchemaMismatch { name: "test_counter", .. }));
    }

    #[test]
    fn same_name_with_different_kind_fails() {
        let registry = registry();
        registry.counter_vec(COUNTER).unwrap();

        let err = registry
            .summary_vec(MetricOpts::new("test_counter", "oops", LABELS))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            MetricsError::SchemaMismatch {
                existing: MetricKind::Counter,
                requested: MetricKind::Summary,
                ..
            }
        ));
    }

    #[test]
    fn wrong_number_of_label_values_fails() {
        let registry = registry();
        let counters = registry.counter_vec(COUNTER).unwrap();

        let err = counters.get_metric_with_label_values(&["f"]).err().unwrap();
        assert!(matches!(
            err,
            MetricsError::LabelCardinality {
                expected: 3,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn empty_label_value_fails() {
        let registry = registry();
        let counters = registry.counter_vec(COUNTER).unwrap();

        let err = counters
            .get_metric_with_label_values(&["f", "", "counter"])
            .err()
            .unwrap();
        assert!(matches!(
            err,
            MetricsError::EmptyLabelValue {
                label: "variable",
                ..
            }
        ));
    }

    #[test]
    fn duplicate_label_names_are_rejected() {
        let registry = registry();
        let err = registry
            .counter_vec(MetricOpts::new("dup", "dup", &["a", "a"]))
            .err()
            .unwrap();
        assert!(matches!(err, MetricsError::InvalidOpts { name: "dup", .. }));
    }

    #[test]
    fn untouched_children_are_not_rendered() {
        let registry = registry();
        let counters = registry.counter_vec(COUNTER).unwrap();
        registry.summary_vec(SUMMARY).unwrap();

        assert!(!registry.render().contains("test_counter{"));

        counters
            .get_metric_with_label_values(&["seen", "v", "counter"])
            .unwrap()
            .increment(1);

        let rendered = registry.render();
        assert!(rendered.contains("function=\"seen\""));
        assert!(!rendered.contains("test_summary"));
    }

    #[test]
    fn summary_counts_and_sums_observations() {
        let registry = registry();
        let summaries = registry.summary_vec(SUMMARY).unwrap();
        let child = summaries
            .get_metric_with_label_values(&["f", "start", "complete"])
            .unwrap();

        child.record(0.5);
        child.record(1.5);

        let rendered = registry.render();
        assert_eq!(
            find_sample(&rendered, "test_summary_count", &[("function", "f")]),
            Some(2.0),
            "rendered:\n{}",
            rendered
        );
        let sum = find_sample(&rendered, "test_summary_sum", &[("function", "f")]).unwrap();
        assert!((sum - 2.0).abs() < 1e-9);
        assert!(rendered.contains("quantile=\"0.99\""));
    }

    #[test]
    fn zero_buckets_are_rejected() {
        let settings = SummarySettings {
            max_age: Duration::from_secs(60),
            age_buckets: 0,
        };
        assert!(matches!(
            MetricsRegistry::new(&settings),
            Err(MetricsError::EmptyWindow)
        ));
    }

    #[tokio::test]
    async fn upkeep_task_stops_on_cancellation() {
        let token = CancellationToken::new();
        let task = tokio::spawn(run_upkeep_task(
            registry(),
            Duration::from_millis(10),
            token.clone(),
        ));

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("upkeep task should stop")
            .unwrap();
    }
}
