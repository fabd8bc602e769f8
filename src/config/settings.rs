use std::time::Duration;

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cli::CliOverrides;
use super::logging::LoggingConfig;

/// Prefix of the environment variables that override defaults.
pub const ENV_PREFIX: &str = "DEFERTEST_";

pub const DEFAULT_PROM_LISTEN: &str = ":9901";
pub const DEFAULT_PROM_PATH: &str = "/metrics";
pub const DEFAULT_DEBUG_LEVEL: i64 = 11;
pub const DEFAULT_MAX_REQUESTS_IN_FLIGHT: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid flags: {0}")]
    Flags(#[from] getopts::Fail),

    #[error("invalid debug level '{0}', expected an integer")]
    InvalidDebugLevel(String),

    #[error("invalid boolean value '{value}' for flag -{flag}")]
    InvalidBool { flag: &'static str, value: String },

    #[error("error loading configuration: {0}")]
    Extract(#[from] Box<figment::Error>),

    #[error("invalid metrics path '{0}': must start with '/' and contain no ':' or '*' segments")]
    InvalidPath(String),

    #[error("invalid listen address '{0}'")]
    InvalidListen(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Runtime settings, layered from defaults, `DEFERTEST_*` environment
/// variables and command-line flags (highest precedence).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Metrics listener, Go style: an empty host means every interface.
    pub prom_listen: String,
    pub prom_path: String,
    /// Stored and logged, never interpreted.
    pub debug_level: i64,
    /// Concurrent scrapes allowed before new ones are rejected. 0 disables the limit.
    pub max_requests_in_flight: usize,
    pub enable_open_metrics: bool,
    pub summary_max_age_secs: u64,
    pub summary_age_buckets: u32,
    pub worker_pairs: usize,
    pub sleep_seconds: u64,
    pub shutdown_grace_secs: u64,
    pub upkeep_interval_secs: u64,
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            prom_listen: DEFAULT_PROM_LISTEN.to_string(),
            prom_path: DEFAULT_PROM_PATH.to_string(),
            debug_level: DEFAULT_DEBUG_LEVEL,
            max_requests_in_flight: DEFAULT_MAX_REQUESTS_IN_FLIGHT,
            enable_open_metrics: true,
            summary_max_age_secs: 5 * 60,
            summary_age_buckets: 5,
            worker_pairs: 5,
            sleep_seconds: 1,
            shutdown_grace_secs: 5,
            upkeep_interval_secs: 5,
            logging: LoggingConfig::default(),
        }
    }
}

/// Summary window settings handed to the metrics registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummarySettings {
    pub max_age: Duration,
    pub age_buckets: u32,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Settings::default().summary()
    }
}

impl Settings {
    /// The provider stack: defaults, then environment, then flags.
    pub fn figment(overrides: &CliOverrides) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides.clone()))
    }

    /// Loads and validates the settings for this process.
    pub fn load(overrides: &CliOverrides) -> Result<Settings, ConfigError> {
        Settings::from_figment(Settings::figment(overrides))
    }

    pub fn from_figment(figment: Figment) -> Result<Settings, ConfigError> {
        let settings: Settings = figment.extract().map_err(Box::new)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_route(&self.prom_path) {
            return Err(ConfigError::InvalidPath(self.prom_path.clone()));
        }
        if self.prom_listen.trim().is_empty() || !self.prom_listen.contains(':') {
            return Err(ConfigError::InvalidListen(self.prom_listen.clone()));
        }
        if self.summary_max_age_secs == 0 {
            return Err(ConfigError::Zero("summary_max_age_secs"));
        }
        if self.summary_age_buckets == 0 {
            return Err(ConfigError::Zero("summary_age_buckets"));
        }
        if self.upkeep_interval_secs == 0 {
            return Err(ConfigError::Zero("upkeep_interval_secs"));
        }
        Ok(())
    }

    /// Address to hand to the TCP listener. `:9901` becomes `0.0.0.0:9901`.
    pub fn bind_address(&self) -> String {
        let listen = self.prom_listen.trim();
        if listen.starts_with(':') {
            format!("0.0.0.0{}", listen)
        } else {
            listen.to_string()
        }
    }

    pub fn summary(&self) -> SummarySettings {
        SummarySettings {
            max_age: Duration::from_secs(self.summary_max_age_secs),
            age_buckets: self.summary_age_buckets,
        }
    }

    pub fn sleep(&self) -> Duration {
        Duration::from_secs(self.sleep_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn upkeep_interval(&self) -> Duration {
        Duration::from_secs(self.upkeep_interval_secs)
    }
}

// axum panics on route paths it cannot register, so reject them up front.
fn is_valid_route(path: &str) -> bool {
    path.starts_with('/')
        && path
            .split('/')
            .all(|segment| !segment.starts_with(':') && !segment.starts_with('*'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_the_documented_flags() {
        let settings = Settings::default();
        assert_eq!(settings.prom_listen, ":9901");
        assert_eq!(settings.prom_path, "/metrics");
        assert_eq!(settings.debug_level, 11);
        assert_eq!(settings.max_requests_in_flight, 10);
        assert!(settings.enable_open_metrics);
        assert_eq!(settings.summary().max_age, Duration::from_secs(300));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn empty_host_binds_every_interface() {
        let mut settings = Settings::default();
        assert_eq!(settings.bind_address(), "0.0.0.0:9901");

        settings.prom_listen = "127.0.0.1:9111".to_string();
        assert_eq!(settings.bind_address(), "127.0.0.1:9111");

        settings.prom_listen = "[::1]:9111".to_string();
        assert_eq!(settings.bind_address(), "[::1]:9111");
    }

    #[test]
    fn path_without_leading_slash_is_rejected() {
        let settings = Settings {
            prom_path: "metrics".to_string(),
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidPath(ref p)) if p == "metrics"
        ));
    }

    #[test]
    fn path_with_capture_segment_is_rejected() {
        let settings = Settings {
            prom_path: "/metrics/:id".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_age_buckets_are_rejected() {
        let settings = Settings {
            summary_age_buckets: 0,
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Zero("summary_age_buckets"))
        ));
    }

    #[test]
    fn environment_overrides_defaults_and_flags_override_environment() {
        Jail::expect_with(|jail| {
            jail.set_env("DEFERTEST_PROM_PATH", "/from-env");
            jail.set_env("DEFERTEST_PROM_LISTEN", "127.0.0.1:1000");
            jail.set_env("DEFERTEST_MAX_REQUESTS_IN_FLIGHT", "3");
            jail.set_env("DEFERTEST_LOGGING__FORMAT", "json");

            let overrides = CliOverrides {
                prom_listen: Some("127.0.0.1:2000".to_string()),
                ..CliOverrides::default()
            };
            let settings: Settings = Settings::figment(&overrides).extract()?;

            assert_eq!(settings.prom_path, "/from-env");
            assert_eq!(settings.prom_listen, "127.0.0.1:2000");
            assert_eq!(settings.max_requests_in_flight, 3);
            assert_eq!(settings.logging.format, "json");
            assert_eq!(settings.logging.level, "info");
            assert_eq!(settings.debug_level, DEFAULT_DEBUG_LEVEL);
            Ok(())
        });
    }

    #[test]
    fn debug_level_flag_is_stored() {
        Jail::expect_with(|_jail| {
            let overrides = CliOverrides {
                debug_level: Some(2),
                ..CliOverrides::default()
            };
            let settings: Settings = Settings::figment(&overrides).extract()?;
            assert_eq!(settings.debug_level, 2);
            Ok(())
        });
    }
}
