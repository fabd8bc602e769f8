//! Metrics collection and exposition for Prometheus.
//!
//! This module provides the explicitly owned registry, the worker metrics
//! recorded into it and the formats it is served in.

pub mod exposition;
mod recorder;
mod registry;
mod timer;

pub use exposition::Format;
pub use recorder::{
    Metrics, MetricsRecorder, COMPLETE_TYPE, COUNTER_TYPE, INVOCATIONS, LABEL_NAMES, LATENCY,
    VARIABLE,
};
pub use registry::{
    run_upkeep_task, CounterVec, MetricKind, MetricOpts, MetricsError, MetricsRegistry,
    SummaryVec, QUANTILES,
};
pub use timer::LatencyGuard;
