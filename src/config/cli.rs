//! Command-line flags.
//!
//! Flags follow the single-dash long form (`-promListen :9901`); the
//! double-dash form is accepted as well.

use std::ffi::OsStr;

use getopts::Options;
use serde::Serialize;

use super::settings::ConfigError;

/// Values given on the command line. Absent flags are not serialized so that
/// lower-precedence sources keep their values.
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prom_listen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prom_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_level: Option<i64>,
}

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(CliOverrides),
    Version,
    Help,
}

fn options() -> Options {
    let mut opts = Options::new();
    opts.long_only(true);
    opts.optflagopt(
        "",
        "version",
        "print build commit and date, then exit",
        "true|false",
    );
    opts.optopt(
        "",
        "promListen",
        "Prometheus http listening socket (default :9901)",
        "HOST:PORT",
    );
    opts.optopt(
        "",
        "promPath",
        "Prometheus http path (default /metrics)",
        "PATH",
    );
    opts.optopt("", "dl", "debug level (default 11)", "LEVEL");
    opts.optflag("h", "help", "print this help, then exit");
    opts
}

/// Parses the arguments that follow the program name.
pub fn parse_args<C>(args: C) -> Result<Command, ConfigError>
where
    C: IntoIterator,
    C::Item: AsRef<OsStr>,
{
    let matches = options().parse(args)?;

    if bool_flag(&matches, "version")? {
        return Ok(Command::Version);
    }
    if matches.opt_present("help") {
        return Ok(Command::Help);
    }

    let debug_level = matches
        .opt_str("dl")
        .map(|raw| {
            raw.trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidDebugLevel(raw))
        })
        .transpose()?;

    Ok(Command::Run(CliOverrides {
        prom_listen: matches.opt_str("promListen"),
        prom_path: matches.opt_str("promPath"),
        debug_level,
    }))
}

/// A boolean flag given bare (`-version`) or with a value (`-version=false`).
fn bool_flag(matches: &getopts::Matches, name: &'static str) -> Result<bool, ConfigError> {
    if !matches.opt_present(name) {
        return Ok(false);
    }
    match matches.opt_str(name) {
        None => Ok(true),
        Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidBool { flag: name, value }),
    }
}

/// Boolean spellings accepted on the command line.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Usage text listing every flag.
pub fn usage(program: &str) -> String {
    options().usage(&format!("Usage: {} [options]", program))
}
