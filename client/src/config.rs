//! Configuration module for the WorkLogix timer client.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `WORKLOGIX_SERVER_URL` | Yes | - | Server URL (e.g., `https://timer.worklogix.io`) |
//! | `WORKLOGIX_USER_ID` | Yes | - | User whose timers are tracked |
//! | `WORKLOGIX_API_TOKEN` | No | - | Bearer token for REST calls and the push channel |
//! | `WORKLOGIX_POLL_INTERVAL_MS` | No | 1000 | Milliseconds between timer re-syncs |
//!
//! # Example
//!
//! ```no_run
//! use worklogix_client::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Server URL: {}", config.server_url);
//! ```

use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Default re-sync period in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Configuration for the timer client.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the WorkLogix server, without a trailing slash.
    pub server_url: String,

    /// User whose timers are read and mutated.
    pub user_id: String,

    /// Bearer token sent on REST calls and as the `/ws` query token.
    pub api_token: Option<String>,

    /// How often a mounted view re-syncs its baseline.
    pub poll_interval: Duration,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `WORKLOGIX_SERVER_URL` or `WORKLOGIX_USER_ID` is not set or empty
    /// - `WORKLOGIX_SERVER_URL` is not an `http://` or `https://` URL
    /// - `WORKLOGIX_POLL_INTERVAL_MS` is set but is not a positive integer
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_url = required("WORKLOGIX_SERVER_URL")?;
        if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "WORKLOGIX_SERVER_URL".to_string(),
                message: "must start with http:// or https://".to_string(),
            });
        }
        let server_url = server_url.trim_end_matches('/').to_string();

        let user_id = required("WORKLOGIX_USER_ID")?;

        let api_token = env::var("WORKLOGIX_API_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());

        let poll_interval_ms = match env::var("WORKLOGIX_POLL_INTERVAL_MS") {
            Ok(value) => {
                let parsed = value
                    .parse::<u64>()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "WORKLOGIX_POLL_INTERVAL_MS".to_string(),
                        message: e.to_string(),
                    })?;
                if parsed == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "WORKLOGIX_POLL_INTERVAL_MS".to_string(),
                        message: "must be greater than 0".to_string(),
                    });
                }
                parsed
            }
            Err(_) => DEFAULT_POLL_INTERVAL_MS,
        };

        Ok(Self {
            server_url,
            user_id,
            api_token,
            poll_interval: Duration::from_millis(poll_interval_ms),
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_url", &self.server_url)
            .field("user_id", &self.user_id)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Restores environment variables on drop.
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            env::set_var(key, value);
        }

        fn remove(&mut self, key: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            env::remove_var(key);
        }

        fn with_required(mut self) -> Self {
            for key in [
                "WORKLOGIX_SERVER_URL",
                "WORKLOGIX_USER_ID",
                "WORKLOGIX_API_TOKEN",
                "WORKLOGIX_POLL_INTERVAL_MS",
            ] {
                self.remove(key);
            }
            self.set("WORKLOGIX_SERVER_URL", "http://localhost:8080/");
            self.set("WORKLOGIX_USER_ID", "u-1");
            self
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
    fn test_defaults() {
        let _guard = EnvGuard::new().with_required();

        let config = Config::from_env().expect("should parse config");
        assert_eq!(config.server_url, "http://localhost:8080");
        assert_eq!(config.user_id, "u-1");
        assert!(config.api_token.is_none());
        assert_eq!(config.poll_interval, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
    }

    #[test]
    #[serial]
    fn test_missing_server_url() {
        let mut guard = EnvGuard::new().with_required();
        guard.remove("WORKLOGIX_SERVER_URL");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "WORKLOGIX_SERVER_URL"));
    }

    #[test]
    #[serial]
    fn test_blank_user_id_is_missing() {
        let mut guard = EnvGuard::new().with_required();
        guard.set("WORKLOGIX_USER_ID", "  ");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "WORKLOGIX_USER_ID"));
    }

    #[test]
    #[serial]
    fn test_rejects_non_http_url() {
        let mut guard = EnvGuard::new().with_required();
        guard.set("WORKLOGIX_SERVER_URL", "ws://localhost:8080");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    #[serial]
    fn test_poll_interval() {
        let mut guard = EnvGuard::new().with_required();
        guard.set("WORKLOGIX_POLL_INTERVAL_MS", "250");
        assert_eq!(
            Config::from_env().unwrap().poll_interval,
            Duration::from_millis(250)
        );

        guard.set("WORKLOGIX_POLL_INTERVAL_MS", "0");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));

        guard.set("WORKLOGIX_POLL_INTERVAL_MS", "soon");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    #[serial]
    fn test_debug_redacts_token() {
        let mut guard = EnvGuard::new().with_required();
        guard.set("WORKLOGIX_API_TOKEN", "client-secret-42");

        let config = Config::from_env().unwrap();
        assert_eq!(config.api_token.as_deref(), Some("client-secret-42"));
        let debug = format!("{config:?}");
        assert!(!debug.contains("client-secret-42"));
        assert!(debug.contains("[REDACTED]"));
    }
}
