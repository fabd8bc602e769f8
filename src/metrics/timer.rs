//! Latency guard: records the time elapsed since its creation when dropped.

use tokio::time::Instant;

use super::recorder::MetricsRecorder;

/// Observes the latency of `function` exactly once, when the guard goes out
/// of scope: normal return, unwinding, or the owning future being dropped.
///
/// The recorder and label tuple are fixed when the guard is created; only the
/// elapsed time is evaluated on drop.
#[must_use = "the latency is recorded when the guard is dropped"]
pub struct LatencyGuard<R: MetricsRecorder> {
    recorder: R,
    function: &'static str,
    start: Instant,
}

impl<R: MetricsRecorder> LatencyGuard<R> {
    pub fn new(recorder: R, function: &'static str) -> Self {
        LatencyGuard {
            recorder,
            function,
            start: Instant::now(),
        }
    }
}

impl<R: MetricsRecorder> Drop for LatencyGuard<R> {
    fn drop(&mut self) {
        self.recorder
            .record_latency(self.function, self.start.elapsed());
    }
}
