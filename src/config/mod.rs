// This module re-exports important pieces for convenience,
// so we can "use crate::config::*" easily.
pub mod cli;
pub mod logging;
pub mod settings;

pub use cli::*;
pub use logging::*;
pub use settings::*;
