//! HTTP route definitions and handlers.

mod metrics;

use crate::state::AppState;
use axum::Router;

/// Creates the application router.
///
/// Only the metrics path is served; everything else is a 404.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(metrics::routes(&state))
        .with_state(state)
}
