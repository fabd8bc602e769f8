//! Library exports for defertest, shared between the binary and tests.

pub mod build_info;
pub mod config;
pub mod console;
pub mod errors;
pub mod lifecycle;
pub mod metrics;
pub mod routes;
pub mod startup;
pub mod state;
pub mod utils;
pub mod workers;
