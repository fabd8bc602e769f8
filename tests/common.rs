#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use defertest::config::Settings;
use defertest::metrics::{Metrics, MetricsRegistry};
use defertest::routes::create_router;
use defertest::state::AppState;
use http_body_util::BodyExt;

pub fn test_config() -> Settings {
    Settings {
        prom_listen: "127.0.0.1:0".to_string(),
        ..Settings::default()
    }
}

pub fn build_metrics(config: &Settings) -> Metrics {
    let registry = Arc::new(
        MetricsRegistry::new(&config.summary()).expect("failed to build metrics registry"),
    );
    Metrics::new(&registry).expect("failed to register metric families")
}

pub fn build_state(config: Settings) -> AppState {
    let metrics = build_metrics(&config);
    AppState::new(Arc::new(config), metrics)
}

pub fn build_app(config: Settings) -> (Router, AppState) {
    let state = build_state(config);
    (create_router(state.clone()), state)
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .expect("failed to build request")
}

pub fn get_with_accept(path: &str, accept: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(path)
        .header("Accept", accept)
        .body(Body::empty())
        .expect("failed to build request")
}

pub async fn body_string(body: Body) -> String {
    let bytes = body
        .collect()
        .await
        .expect("failed to read body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("body is not utf-8")
}
