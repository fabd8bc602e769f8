//! Build metadata injected at compile time.
//!
//! Set `DEFERTEST_COMMIT` and `DEFERTEST_BUILD_DATE` in the environment of
//! `cargo build` to stamp the binary.

pub const COMMIT: &str = match option_env!("DEFERTEST_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};

pub const BUILD_DATE: &str = match option_env!("DEFERTEST_BUILD_DATE") {
    Some(date) => date,
    None => "unknown",
};

/// The line printed by `-version`.
pub fn version_line() -> String {
    format!("commit: {}\tdate(UTC): {}", COMMIT, BUILD_DATE)
}
