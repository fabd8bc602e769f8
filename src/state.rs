//! Shared application state.
//!
//! Contains the state that is shared across the metrics request handlers.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::Settings;
use crate::metrics::Metrics;

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Settings resolved at startup.
    pub config: Arc<Settings>,
    /// Worker metrics and the registry they live in.
    pub metrics: Metrics,
    /// One permit per allowed in-flight scrape, `None` when unlimited.
    pub scrape_permits: Option<Arc<Semaphore>>,
}

impl AppState {
    pub fn new(config: Arc<Settings>, metrics: Metrics) -> Self {
        let scrape_permits = match config.max_requests_in_flight {
            0 => None,
            limit => Some(Arc::new(Semaphore::new(limit))),
        };
        AppState {
            config,
            metrics,
            scrape_permits,
        }
    }
}
