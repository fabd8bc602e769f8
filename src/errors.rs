//! Process-level error type.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::metrics::MetricsError;
use crate::utils::logger::LoggingError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error("could not bind the metrics listener to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),

    #[error("console error: {0}")]
    Console(#[source] io::Error),
}
