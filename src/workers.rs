//! Worker routines.
//!
//! Both variants sleep for a fixed duration, count the invocation and observe
//! the elapsed time exactly once when they finish. They differ only in how
//! the observation is scheduled:
//!
//! - [`sleep_with_defer_since`] creates a [`LatencyGuard`] up front, a
//!   dedicated guard whose target is fixed at creation.
//! - [`sleep_with_defer_func_since`] defers an anonymous closure that borrows
//!   the start instant and reads the clock only when it runs.
//!
//! The sleep does not observe cancellation.

use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::info;

use crate::metrics::{LatencyGuard, MetricsRecorder};
use crate::utils::scope_guard::defer;

pub const SLEEP_WITH_DEFER_SINCE: &str = "sleepWithDeferSince";
pub const SLEEP_WITH_DEFER_FUNC_SINCE: &str = "sleepWithDeferFuncSince";

pub async fn sleep_with_defer_since<R: MetricsRecorder>(recorder: &R, sleep: Duration) {
    let _observe = LatencyGuard::new(recorder.clone(), SLEEP_WITH_DEFER_SINCE);
    recorder.record_invocation(SLEEP_WITH_DEFER_SINCE);

    tokio::time::sleep(sleep).await;
}

pub async fn sleep_with_defer_func_since<R: MetricsRecorder>(recorder: &R, sleep: Duration) {
    let start = Instant::now();
    let _observe = defer(|| recorder.record_latency(SLEEP_WITH_DEFER_FUNC_SINCE, start.elapsed()));
    recorder.record_invocation(SLEEP_WITH_DEFER_FUNC_SINCE);

    tokio::time::sleep(sleep).await;
}

/// Spawns `pairs` invocations of each variant into `workers`.
pub fn spawn_worker_pairs<R: MetricsRecorder>(
    workers: &mut JoinSet<()>,
    recorder: &R,
    pairs: usize,
    sleep: Duration,
) {
    info!(pairs, sleep_secs = sleep.as_secs_f64(), "Launching workers");

    for _ in 0..pairs {
        let recorder_a = recorder.clone();
        workers.spawn(async move { sleep_with_defer_since(&recorder_a, sleep).await });

        let recorder_b = recorder.clone();
        workers.spawn(async move { sleep_with_defer_func_since(&recorder_b, sleep).await });
    }
}
