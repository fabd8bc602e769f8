//! Application startup and shutdown.
//!
//! Binds the metrics listener, starts the background activities and the
//! worker pairs, then waits for a console line or a termination signal.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::console::{self, ConsoleInput};
use crate::errors::AppError;
use crate::lifecycle::{
    spawn_signal_handler, Background, Lifecycle, ShutdownMode, ShutdownOutcome, ShutdownSignals,
};
use crate::metrics::{run_upkeep_task, Metrics, MetricsRegistry};
use crate::routes;
use crate::state::AppState;
use crate::workers::spawn_worker_pairs;

/// Binds the metrics listener. Failure is fatal, there is no retry.
pub async fn bind(config: &Settings) -> Result<TcpListener, AppError> {
    let addr = config.bind_address();
    TcpListener::bind(&addr)
        .await
        .map_err(|source| AppError::Bind { addr, source })
}

/// Serves `router` on `listener` until `cancel_token` is cancelled.
pub async fn serve(listener: TcpListener, router: Router, cancel_token: CancellationToken) {
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            info!("Metrics server shutting down");
        })
        .await;

    if let Err(e) = result {
        error!(error = %e, "Metrics server failed");
    }
}

/// A started process: server, upkeep, signal handler and workers running.
pub struct App {
    config: Arc<Settings>,
    lifecycle: Lifecycle,
    local_addr: SocketAddr,
    background: Background,
}

impl App {
    /// Starts every background activity and launches the worker pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handlers cannot be installed, the
    /// metric families cannot be registered, or the listener cannot be bound.
    pub async fn start(config: Arc<Settings>) -> Result<App, AppError> {
        let lifecycle = Lifecycle::new();
        let signals = ShutdownSignals::install().map_err(AppError::Signals)?;

        let registry = Arc::new(MetricsRegistry::new(&config.summary())?);
        let metrics = Metrics::new(&registry)?;

        let listener = bind(&config).await?;
        let local_addr = listener.local_addr().map_err(|source| AppError::Bind {
            addr: config.bind_address(),
            source,
        })?;
        info!(%local_addr, path = %config.prom_path, "Serving metrics");

        let router = routes::create_router(AppState::new(Arc::clone(&config), metrics.clone()));
        let server = tokio::spawn(serve(listener, router, lifecycle.child_token()));
        let upkeep = tokio::spawn(run_upkeep_task(
            Arc::clone(&registry),
            config.upkeep_interval(),
            lifecycle.child_token(),
        ));
        let signals = spawn_signal_handler(signals, lifecycle.clone());

        let mut workers = JoinSet::new();
        spawn_worker_pairs(&mut workers, &metrics, config.worker_pairs, config.sleep());

        Ok(App {
            config,
            lifecycle,
            local_addr,
            background: Background {
                server,
                upkeep,
                signals,
                workers,
            },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Waits for `input` or for termination, then shuts down.
    ///
    /// A console line drains the workers; end of input, a read error or a
    /// signal abandons them.
    pub async fn finish<I>(self, input: I) -> ShutdownOutcome
    where
        I: Future<Output = ConsoleInput>,
    {
        let App {
            config,
            lifecycle,
            background,
            ..
        } = self;

        let mode = tokio::select! {
            input = input => match input {
                ConsoleInput::Line(line) => {
                    if let Err(e) = console::echo(&line) {
                        warn!(error = %e, "Failed to echo console input");
                    }
                    info!("main: That's all Folks!");
                    ShutdownMode::Drain
                }
                ConsoleInput::EndOfInput => {
                    info!("Standard input closed, shutting down");
                    ShutdownMode::Abandon
                }
                ConsoleInput::Failed(e) => {
                    error!(error = %e, "Failed to read standard input");
                    ShutdownMode::Abandon
                }
            },
            _ = lifecycle.terminated() => ShutdownMode::Abandon,
        };

        let outcome = background
            .shutdown(&lifecycle, mode, config.shutdown_grace())
            .await;
        info!(
            ?mode,
            completed_workers = outcome.completed_workers,
            abandoned_workers = outcome.abandoned_workers,
            failed_workers = outcome.failed_workers,
            timed_out = outcome.timed_out,
            "Shutdown complete"
        );
        outcome
    }
}

/// Runs the process until a console line or a termination signal.
///
/// # Errors
///
/// Returns an error if startup fails or the console reader cannot be started.
pub async fn run(config: Arc<Settings>) -> Result<(), AppError> {
    let app = App::start(config).await?;

    console::prompt(console::PROMPT).map_err(AppError::Console)?;
    let input = console::spawn_line_reader().map_err(AppError::Console)?;

    app.finish(input).await;
    Ok(())
}
