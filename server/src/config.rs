//! Server configuration, read once at startup from the environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `PORT` | 8080 | listen port |
//! | `WORKLOGIX_API_TOKEN` | required unless auth is disabled | bearer token for REST calls and `/ws` |
//! | `WORKLOGIX_UNSAFE_NO_AUTH` | false | disable authentication (development only) |
//! | `WORKLOGIX_TASK_SERVICE_URL` | unset | external task service; the in-process registry is used when unset |
//! | `WORKLOGIX_TASK_SERVICE_TOKEN` | unset | bearer token sent to the task service |
//! | `WORKLOGIX_CHANNEL_CAPACITY` | 1000 | change notification channel capacity, > 0 |
//!
//! Blank values are treated as unset.

use std::env;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

use crate::broadcast::DEFAULT_CHANNEL_CAPACITY;

const DEFAULT_PORT: u16 = 8080;

const PORT: &str = "PORT";
const API_TOKEN: &str = "WORKLOGIX_API_TOKEN";
const UNSAFE_NO_AUTH: &str = "WORKLOGIX_UNSAFE_NO_AUTH";
const TASK_SERVICE_URL: &str = "WORKLOGIX_TASK_SERVICE_URL";
const TASK_SERVICE_TOKEN: &str = "WORKLOGIX_TASK_SERVICE_TOKEN";
const CHANNEL_CAPACITY: &str = "WORKLOGIX_CHANNEL_CAPACITY";

/// Errors raised while reading the environment.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Runtime settings for the server.
#[derive(Clone)]
pub struct Config {
    /// Token clients must present; `None` only when auth is disabled.
    pub api_token: Option<String>,
    /// Base URL of the external task service, without a trailing slash.
    pub task_service_url: Option<String>,
    pub task_service_token: Option<String>,
    pub channel_capacity: usize,
    pub port: u16,
    pub unsafe_no_auth: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |token: &Option<String>| token.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Config")
            .field("api_token", &redact(&self.api_token))
            .field("task_service_url", &self.task_service_url)
            .field("task_service_token", &redact(&self.task_service_token))
            .field("channel_capacity", &self.channel_capacity)
            .field("port", &self.port)
            .field("unsafe_no_auth", &self.unsafe_no_auth)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_token: None,
            task_service_url: None,
            task_service_token: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            port: DEFAULT_PORT,
            unsafe_no_auth: false,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// `ConfigError::MissingEnvVar` when no API token is set and auth is
    /// enabled; `ConfigError::InvalidValue` when a variable fails to parse.
    ///
    /// ```no_run
    /// use worklogix_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("listening on {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let unsafe_no_auth = var(UNSAFE_NO_AUTH).is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let api_token = var(API_TOKEN);
        if api_token.is_none() && !unsafe_no_auth {
            return Err(ConfigError::MissingEnvVar(API_TOKEN.to_string()));
        }

        let channel_capacity: usize = parsed(CHANNEL_CAPACITY)?.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        if channel_capacity == 0 {
            return Err(ConfigError::invalid(CHANNEL_CAPACITY, "must be greater than 0"));
        }

        let task_service_url = match var(TASK_SERVICE_URL) {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                Some(url.trim_end_matches('/').to_string())
            }
            Some(url) => {
                return Err(ConfigError::invalid(
                    TASK_SERVICE_URL,
                    format!("expected an http(s) URL, got '{url}'"),
                ))
            }
            None => None,
        };

        let config = Self {
            api_token,
            task_service_url,
            task_service_token: var(TASK_SERVICE_TOKEN),
            channel_capacity,
            port: parsed(PORT)?.unwrap_or(DEFAULT_PORT),
            unsafe_no_auth,
        };

        if config.unsafe_no_auth {
            warn!("{UNSAFE_NO_AUTH} is set; REST and WebSocket clients are not authenticated");
        }

        Ok(config)
    }
}

/// Trimmed value of `key`; blank and non-unicode values count as unset.
fn var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ConfigError::invalid(key, format!("'{raw}': {e}")))
        })
        .transpose()
}
