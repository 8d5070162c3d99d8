//! Coordinator configuration module.
//!
//! Parses configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CONFESSIONS_SUPABASE_URL` | No* | - | URL of the Supabase project |
//! | `CONFESSIONS_SUPABASE_KEY` | No* | - | Supabase API key |
//! | `CONFESSIONS_EVENT_CAPACITY` | No | 1000 | Event broadcast channel capacity |
//! | `CONFESSIONS_EMPTY_ROOM_TIMEOUT_SECS` | No | 300 | Lifetime of a room with no connected members |
//! | `CONFESSIONS_SNAPSHOT_INTERVAL_SECS` | No | 30 | Period of the snapshot task |
//! | `CONFESSIONS_REAPER_INTERVAL_SECS` | No | 30 | Period of the empty-room reaper |
//!
//! *Must be set together; without them the coordinator runs without
//! Supabase-backed identity and persistence.

use std::env;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::broadcast::DEFAULT_CHANNEL_CAPACITY;

/// Default lifetime of a room whose members have all disconnected.
const DEFAULT_EMPTY_ROOM_TIMEOUT_SECS: u64 = 300;

/// Default snapshot period.
const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 30;

/// Default reaper period.
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 30;

const VAR_SUPABASE_URL: &str = "CONFESSIONS_SUPABASE_URL";
const VAR_SUPABASE_KEY: &str = "CONFESSIONS_SUPABASE_KEY";
const VAR_EVENT_CAPACITY: &str = "CONFESSIONS_EVENT_CAPACITY";
const VAR_EMPTY_ROOM_TIMEOUT: &str = "CONFESSIONS_EMPTY_ROOM_TIMEOUT_SECS";
const VAR_SNAPSHOT_INTERVAL: &str = "CONFESSIONS_SNAPSHOT_INTERVAL_SECS";
const VAR_REAPER_INTERVAL: &str = "CONFESSIONS_REAPER_INTERVAL_SECS";

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },
}

/// Supabase credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseSettings {
    /// Project URL (e.g., `https://xxx.supabase.co`).
    pub url: String,

    /// API key sent as `apikey` and bearer token.
    pub key: String,
}

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Supabase credentials, when identity and persistence are backed by it.
    pub supabase: Option<SupabaseSettings>,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,

    /// How long a room may have no connected members before it is reaped.
    pub empty_room_timeout: Duration,

    /// Period of the snapshot persistence task.
    pub snapshot_interval: Duration,

    /// Period of the empty-room reaper task.
    pub reaper_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            supabase: None,
            event_capacity: DEFAULT_CHANNEL_CAPACITY,
            empty_room_timeout: Duration::from_secs(DEFAULT_EMPTY_ROOM_TIMEOUT_SECS),
            snapshot_interval: Duration::from_secs(DEFAULT_SNAPSHOT_INTERVAL_SECS),
            reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
        }
    }
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Only one of the Supabase URL and key is set
    /// - A numeric variable does not parse or is zero where zero is meaningless
    ///
    /// # Example
    ///
    /// ```no_run
    /// use confessions_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Empty rooms live for {:?}", config.empty_room_timeout);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let supabase = parse_supabase()?;
        let event_capacity = parse_positive(VAR_EVENT_CAPACITY, DEFAULT_CHANNEL_CAPACITY as u64)?;
        let empty_room_timeout = parse_secs(VAR_EMPTY_ROOM_TIMEOUT, DEFAULT_EMPTY_ROOM_TIMEOUT_SECS)?;
        let snapshot_interval = parse_positive(VAR_SNAPSHOT_INTERVAL, DEFAULT_SNAPSHOT_INTERVAL_SECS)?;
        let reaper_interval = parse_positive(VAR_REAPER_INTERVAL, DEFAULT_REAPER_INTERVAL_SECS)?;

        let event_capacity = usize::try_from(event_capacity).map_err(|_| ConfigError::InvalidFormat {
            var: VAR_EVENT_CAPACITY.to_string(),
            message: "value too large".to_string(),
        })?;

        let config = Self {
            supabase,
            event_capacity,
            empty_room_timeout,
            snapshot_interval: Duration::from_secs(snapshot_interval),
            reaper_interval: Duration::from_secs(reaper_interval),
        };

        debug!(
            supabase = config.supabase.is_some(),
            event_capacity = config.event_capacity,
            empty_room_timeout_secs = config.empty_room_timeout.as_secs(),
            "Loaded coordinator configuration"
        );

        Ok(config)
    }
}

/// Parse the Supabase URL/key pair. Both or neither must be set.
fn parse_supabase() -> Result<Option<SupabaseSettings>, ConfigError> {
    let url = non_empty_var(VAR_SUPABASE_URL);
    let key = non_empty_var(VAR_SUPABASE_KEY);

    match (url, key) {
        (Some(url), Some(key)) => Ok(Some(SupabaseSettings { url, key })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::MissingEnvVar(VAR_SUPABASE_KEY.to_string())),
        (None, Some(_)) => Err(ConfigError::MissingEnvVar(VAR_SUPABASE_URL.to_string())),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an unsigned integer variable, falling back to `default` when unset.
fn parse_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::InvalidFormat {
                var: name.to_string(),
                message: e.to_string(),
            }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: name.to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

fn parse_positive(name: &str, default: u64) -> Result<u64, ConfigError> {
    let value = parse_u64(name, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidFormat {
            var: name.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn parse_secs(name: &str, default: u64) -> Result<Duration, ConfigError> {
    parse_u64(name, default).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to temporarily set environment variables for testing.
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old_value = env::var(key).ok();
            self.vars.push((key.to_string(), old_value));
            env::set_var(key, value);
        }

        fn remove(&mut self, key: &str) {
            let old_value = env::var(key).ok();
            self.vars.push((key.to_string(), old_value));
            env::remove_var(key);
        }

        fn clear_all(&mut self) {
            for key in [
                VAR_SUPABASE_URL,
                VAR_SUPABASE_KEY,
                VAR_EVENT_CAPACITY,
                VAR_EMPTY_ROOM_TIMEOUT,
                VAR_SNAPSHOT_INTERVAL,
                VAR_REAPER_INTERVAL,
            ] {
                self.remove(key);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.iter().rev() {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        let mut guard = EnvGuard::new();
        guard.clear_all();

        let config = Config::from_env().expect("should parse config");
        assert_eq!(config, Config::default());
        assert!(config.supabase.is_none());
        assert_eq!(config.event_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    #[serial]
    fn test_config_custom_values() {
        let mut guard = EnvGuard::new();
        guard.clear_all();
        guard.set(VAR_SUPABASE_URL, "https://test.supabase.co");
        guard.set(VAR_SUPABASE_KEY, "service-key");
        guard.set(VAR_EVENT_CAPACITY, "64");
        guard.set(VAR_EMPTY_ROOM_TIMEOUT, "0");
        guard.set(VAR_SNAPSHOT_INTERVAL, "5");
        guard.set(VAR_REAPER_INTERVAL, " 7 ");

        let config = Config::from_env().expect("should parse config");
        assert_eq!(
            config.supabase,
            Some(SupabaseSettings {
                url: "https://test.supabase.co".to_string(),
                key: "service-key".to_string(),
            })
        );
        assert_eq!(config.event_capacity, 64);
        assert_eq!(config.empty_room_timeout, Duration::ZERO);
        assert_eq!(config.snapshot_interval, Duration::from_secs(5));
        assert_eq!(config.reaper_interval, Duration::from_secs(7));
    }

    #[test]
    #[serial]
    fn test_config_supabase_url_without_key() {
        let mut guard = EnvGuard::new();
        guard.clear_all();
        guard.set(VAR_SUPABASE_URL, "https://test.supabase.co");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == VAR_SUPABASE_KEY));
    }

    #[test]
    #[serial]
    fn test_config_supabase_key_without_url() {
        let mut guard = EnvGuard::new();
        guard.clear_all();
        guard.set(VAR_SUPABASE_KEY, "service-key");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == VAR_SUPABASE_URL));
    }

    #[test]
    #[serial]
    fn test_config_blank_supabase_vars_are_unset() {
        let mut guard = EnvGuard::new();
        guard.clear_all();
        guard.set(VAR_SUPABASE_URL, "   ");
        guard.set(VAR_SUPABASE_KEY, "");

        let config = Config::from_env().expect("should parse config");
        assert!(config.supabase.is_none());
    }

    #[test]
    #[serial]
    fn test_config_invalid_number() {
        let mut guard = EnvGuard::new();
        guard.clear_all();
        guard.set(VAR_EVENT_CAPACITY, "lots");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFormat { ref var, .. } if var == VAR_EVENT_CAPACITY));
    }

    #[test]
    #[serial]
    fn test_config_zero_interval_rejected() {
        let mut guard = EnvGuard::new();
        guard.clear_all();
        guard.set(VAR_SNAPSHOT_INTERVAL, "0");

        let err = Config::from_env().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidFormat { ref var, .. } if var == VAR_SNAPSHOT_INTERVAL)
        );
    }

    #[test]
    #[serial]
    fn test_config_zero_capacity_rejected() {
        let mut guard = EnvGuard::new();
        guard.clear_all();
        guard.set(VAR_EVENT_CAPACITY, "0");

        assert!(Config::from_env().is_err());
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::MissingEnvVar("X".to_string());
        assert_eq!(err.to_string(), "missing required environment variable: X");

        let err = ConfigError::InvalidFormat {
            var: "Y".to_string(),
            message: "bad".to_string(),
        };
        assert_eq!(err.to_string(), "invalid format for Y: bad");
    }
}
