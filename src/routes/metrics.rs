//! Metrics exposition endpoint.
//!
//! Unauthenticated. Scrapes beyond the in-flight limit are rejected with
//! 503 instead of being queued.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Router};
use tracing::warn;

use crate::metrics::Format;
use crate::state::AppState;
use crate::utils::http_helpers::HTTPError;

/// Creates the metrics route at the configured path.
pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(&state.config.prom_path, get(metrics_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            limit_in_flight,
        ))
}

/// Handler for the metrics path.
///
/// Returns the Prometheus text format, or OpenMetrics when it is enabled and
/// the `Accept` header asks for it.
#[tracing::instrument(skip_all, name = "defertest.metrics.scrape")]
async fn metrics_handler(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok());
    let format = Format::negotiate(accept, state.config.enable_open_metrics);

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, format.content_type())],
        format.encode(state.metrics.render()),
    )
}

async fn limit_in_flight(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(permits) = state.scrape_permits.as_ref() else {
        return next.run(request).await;
    };

    match Arc::clone(permits).try_acquire_owned() {
        Ok(_permit) => next.run(request).await,
        Err(_) => {
            let limit = state.config.max_requests_in_flight;
            warn!(limit, "Rejecting scrape, too many requests in flight");
            HTTPError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                format!(
                    "Limit of concurrent requests reached ({}), try again later.",
                    limit
                ),
            )
            .into_response()
        }
    }
}
