//! Process lifecycle: signal handling and coordinated shutdown.
//!
//! One [`CancellationToken`] is created at startup. A SIGINT or SIGTERM
//! moves the lifecycle from `Running` to `Terminating` and cancels it; the
//! server and upkeep tasks stop on their child tokens. Workers never look at
//! the token, so shutdown either waits for them (bounded) or aborts them.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Terminating,
}

/// Shared handle on the process lifecycle.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    token: CancellationToken,
    abandon: CancellationToken,
    terminating: Arc<AtomicBool>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Lifecycle::default()
    }

    pub fn state(&self) -> LifecycleState {
        if self.terminating.load(Ordering::SeqCst) {
            LifecycleState::Terminating
        } else {
            LifecycleState::Running
        }
    }

    /// Moves to `Terminating` and cancels every child token.
    ///
    /// Returns `true` for the call that performed the transition.
    pub fn terminate(&self) -> bool {
        let first = !self.terminating.swap(true, Ordering::SeqCst);
        self.token.cancel();
        first
    }

    /// Terminates and additionally tells a running shutdown to stop waiting
    /// for workers. Used by signals, which must end the process even while a
    /// drain is in progress.
    pub fn abandon(&self) -> bool {
        self.abandon.cancel();
        self.terminate()
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandon.is_cancelled()
    }

    /// Completes once [`Lifecycle::abandon`] has been called.
    pub async fn abandoned(&self) {
        self.abandon.cancelled().await;
    }

    /// Token for a background activity; cancelled by [`Lifecycle::terminate`].
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Completes once the lifecycle is terminating.
    pub async fn terminated(&self) {
        self.token.cancelled().await;
    }
}

/// Termination signals, registered when installed so that none is missed
/// between startup and the first poll.
pub struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    /// Registers SIGINT and SIGTERM handlers.
    ///
    /// Must be called from within the tokio runtime.
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(ShutdownSignals {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Waits for the next termination signal and returns its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[cfg(not(unix))]
impl ShutdownSignals {
    pub fn install() -> io::Result<Self> {
        Ok(ShutdownSignals {})
    }

    pub async fn recv(&mut self) -> &'static str {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "ctrl-c",
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<&'static str>().await
            }
        }
    }
}

/// Abandons `lifecycle` on the first signal.
///
/// The handler keeps listening after a console line has started a drain, so
/// a signal still ends the process without waiting for sleeping workers. It
/// is aborted at the end of [`Background::shutdown`].
pub fn spawn_signal_handler(mut signals: ShutdownSignals, lifecycle: Lifecycle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = signals.recv().await;
        let state = lifecycle.state();
        info!(signal, ?state, "Signal caught, closing application");
        lifecycle.abandon();
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Let running workers finish, within the grace period.
    Drain,
    /// Abort running workers immediately.
    Abandon,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownOutcome {
    pub completed_workers: usize,
    pub abandoned_workers: usize,
    pub failed_workers: usize,
    /// The grace period elapsed and remaining tasks were aborted.
    pub timed_out: bool,
}

/// Handles on every background activity of the process.
pub struct Background {
    pub server: JoinHandle<()>,
    pub upkeep: JoinHandle<()>,
    pub signals: JoinHandle<()>,
    pub workers: JoinSet<()>,
}

impl Background {
    /// Terminates `lifecycle` and waits, at most `grace`, for the background
    /// activities to finish. Whatever is still running afterwards is aborted.
    ///
    /// A drain turns into an abandon as soon as [`Lifecycle::abandon`] is
    /// called.
    pub async fn shutdown(
        mut self,
        lifecycle: &Lifecycle,
        mode: ShutdownMode,
        grace: Duration,
    ) -> ShutdownOutcome {
        match mode {
            ShutdownMode::Drain => {
                lifecycle.terminate();
            }
            ShutdownMode::Abandon => {
                lifecycle.abandon();
            }
        }

        let mut outcome = ShutdownOutcome::default();
        if tokio::time::timeout(grace, self.join_all(lifecycle, &mut outcome))
            .await
            .is_err()
        {
            warn!(
                grace_secs = grace.as_secs_f64(),
                running_workers = self.workers.len(),
                "Shutdown grace period elapsed, abandoning remaining background tasks"
            );
            outcome.abandoned_workers += self.workers.len();
            outcome.timed_out = true;
        }

        self.abort_all();
        outcome
    }

    async fn join_all(&mut self, lifecycle: &Lifecycle, outcome: &mut ShutdownOutcome) {
        let mut aborted = false;
        loop {
            let next = tokio::select! {
                result = self.workers.join_next() => Some(result),
                _ = lifecycle.abandoned(), if !aborted => None,
            };
            match next {
                Some(None) => break,
                Some(Some(Ok(()))) => outcome.completed_workers += 1,
                Some(Some(Err(e))) if e.is_cancelled() => outcome.abandoned_workers += 1,
                Some(Some(Err(e))) => {
                    outcome.failed_workers += 1;
                    error!(error = %e, "Worker task failed");
                }
                None => {
                    aborted = true;
                    debug!(running_workers = self.workers.len(), "Aborting workers");
                    self.workers.abort_all();
                }
            }
        }

        for (task, handle) in [
            ("metrics server", &mut self.server),
            ("metrics upkeep", &mut self.upkeep),
        ] {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(task, error = %e, "Background task failed");
                }
            }
        }
    }

    fn abort_all(&mut self) {
        self.workers.abort_all();
        self.server.abort();
        self.upkeep.abort();
        self.signals.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_until_cancelled(token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { token.cancelled().await })
    }

    fn background(lifecycle: &Lifecycle, workers: JoinSet<()>) -> Background {
        Background {
            server: idle_until_cancelled(lifecycle.child_token()),
            upkeep: idle_until_cancelled(lifecycle.child_token()),
            signals: idle_until_cancelled(lifecycle.child_token()),
            workers,
        }
    }

    #[test]
    fn starts_running_and_terminates_once() {
        let lifecycle = Lifecycle::new();
        let child = lifecycle.child_token();
        assert_eq!(lifecycle.state(), LifecycleState::Running);

        assert!(lifecycle.terminate());
        assert!(!lifecycle.terminate());
        assert_eq!(lifecycle.state(), LifecycleState::Terminating);
        assert!(child.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let lifecycle = Lifecycle::new();
        let clone = lifecycle.clone();
        clone.terminate();
        assert_eq!(lifecycle.state(), LifecycleState::Terminating);
    }

    #[test]
    fn abandon_also_terminates() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.is_abandoned());

        assert!(lifecycle.abandon());
        assert!(lifecycle.is_abandoned());
        assert_eq!(lifecycle.state(), LifecycleState::Terminating);
    }

    #[tokio::test]
    async fn signal_handler_outlives_termination() {
        let lifecycle = Lifecycle::new();
        let handler =
            spawn_signal_handler(ShutdownSignals::install().unwrap(), lifecycle.clone());

        lifecycle.terminate();
        tokio::task::yield_now().await;
        assert!(!handler.is_finished());
        assert!(!lifecycle.is_abandoned());

        handler.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn abandon_during_drain_aborts_sleeping_workers() {
        let lifecycle = Lifecycle::new();
        let mut workers = JoinSet::new();
        for _ in 0..3 {
            workers.spawn(tokio::time::sleep(Duration::from_secs(3600)));
        }

        let started = tokio::time::Instant::now();
        let shutdown = {
            let lifecycle = lifecycle.clone();
            let background = background(&lifecycle, workers);
            tokio::spawn(async move {
                background
                    .shutdown(&lifecycle, ShutdownMode::Drain, Duration::from_secs(60))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!shutdown.is_finished());
        lifecycle.abandon();

        let outcome = shutdown.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome.abandoned_workers, 3);
        assert_eq!(outcome.completed_workers, 0);
        assert!(!outcome.timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_workers() {
        let lifecycle = Lifecycle::new();
        let mut workers = JoinSet::new();
        for _ in 0..3 {
            workers.spawn(tokio::time::sleep(Duration::from_secs(1)));
        }

        let outcome = background(&lifecycle, workers)
            .shutdown(&lifecycle, ShutdownMode::Drain, Duration::from_secs(5))
            .await;

        assert_eq!(
            outcome,
            ShutdownOutcome {
                completed_workers: 3,
                ..ShutdownOutcome::default()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abandon_does_not_wait_for_sleeping_workers() {
        let lifecycle = Lifecycle::new();
        let mut workers = JoinSet::new();
        for _ in 0..4 {
            workers.spawn(tokio::time::sleep(Duration::from_secs(3600)));
        }

        let started = tokio::time::Instant::now();
        let outcome = background(&lifecycle, workers)
            .shutdown(&lifecycle, ShutdownMode::Abandon, Duration::from_secs(5))
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(outcome.abandoned_workers, 4);
        assert_eq!(outcome.completed_workers, 0);
        assert!(!outcome.timed_out);
        assert_eq!(lifecycle.state(), LifecycleState::Terminating);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_is_bounded_by_the_grace_period() {
        let lifecycle = Lifecycle::new();
        let mut workers = JoinSet::new();
        workers.spawn(tokio::time::sleep(Duration::from_secs(3600)));

        let started = tokio::time::Instant::now();
        let outcome = background(&lifecycle, workers)
            .shutdown(&lifecycle, ShutdownMode::Drain, Duration::from_secs(2))
            .await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(outcome.timed_out);
        assert_eq!(outcome.abandoned_workers, 1);
    }
}
