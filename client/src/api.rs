//! REST client for the WorkLogix timer endpoints.
//!
//! Reads (`GET .../timer`, `GET /tasks/{id}`) retry transient failures with
//! exponential backoff and ±25% jitter. Mutations are sent exactly once: a
//! lost response leaves it to the caller to re-read the timer before trying
//! again.
//!
//! # Example
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use worklogix_client::api::TimerClient;
//! use worklogix_client::types::TimerKey;
//!
//! # async fn example() -> worklogix_client::error::Result<()> {
//! let client = TimerClient::new("http://localhost:8080", Some("token".into()))?;
//! let key = TimerKey::new("t-1", "u-1", NaiveDate::from_ymd_opt(2024, 5, 14).unwrap());
//! let snapshot = client.start(&key).await?;
//! println!("{} seconds", snapshot.total_seconds);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::types::{
    CompleteRequest, ErrorBody, Task, TimerKey, TimerRequest, TimerSnapshot,
};

/// HTTP request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Jitter factor (±25%).
const JITTER_FACTOR: f64 = 0.25;

/// Retry behaviour for idempotent reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled after each failure.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after `attempt` (1-based) failed, jittered by ±25%.
    fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        add_jitter(base)
    }
}

/// Adds ±25% jitter to a duration.
pub(crate) fn add_jitter(duration: Duration) -> Duration {
    let secs = duration.as_secs_f64();
    if secs <= 0.0 {
        return duration;
    }
    let jitter_range = secs * JITTER_FACTOR;
    let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
    Duration::from_secs_f64((secs + jitter).max(0.0))
}

/// Anything that can produce the current authoritative snapshot for a timer.
///
/// The timer view depends on this seam rather than on [`TimerClient`]
/// directly.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetches the current snapshot for `key`.
    async fn fetch(&self, key: &TimerKey) -> Result<TimerSnapshot>;
}

/// HTTP client for the timer and task endpoints.
#[derive(Clone)]
pub struct TimerClient {
    http: Client,
    base_url: String,
    base: Url,
    token: Option<String>,
    retry: RetryPolicy,
}

impl fmt::Debug for TimerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("retry", &self.retry)
            .finish()
    }
}

impl TimerClient {
    /// Creates a client for the server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidUrl` if `base_url` is not an absolute
    /// HTTP(S) URL, or `ClientError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(format!(
                "{base_url}: expected http or https"
            )));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            http,
            base_url,
            base,
            token,
            retry: RetryPolicy::default(),
        })
    }

    /// Replaces the retry policy used for reads.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the server base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Reads the timer for `key`.
    ///
    /// # Errors
    ///
    /// `ClientError::NotFound` if the timer was never started, or a transport
    /// error once retries are exhausted.
    pub async fn get_timer(&self, key: &TimerKey) -> Result<TimerSnapshot> {
        let url = self.endpoint(&["tasks", &key.task_id, "timer"])?;
        let date = key.date.to_string();
        self.get_with_retry(|| {
            self.http
                .get(url.clone())
                .query(&[("userId", key.user_id.as_str()), ("date", date.as_str())])
        })
        .await
    }

    /// Reads a task.
    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        let url = self.endpoint(&["tasks", task_id])?;
        self.get_with_retry(|| self.http.get(url.clone())).await
    }

    /// Starts or resumes the timer for `key`.
    pub async fn start(&self, key: &TimerKey) -> Result<TimerSnapshot> {
        self.transition(key, "start").await
    }

    /// Pauses the running timer for `key`.
    pub async fn pause(&self, key: &TimerKey) -> Result<TimerSnapshot> {
        self.transition(key, "pause").await
    }

    /// Completes the timer for `key` and marks its task completed.
    ///
    /// `duration` is the locally displayed total; the server logs it but
    /// accumulates from its own clock.
    pub async fn complete(&self, key: &TimerKey, duration: Option<u64>) -> Result<TimerSnapshot> {
        let url = self.endpoint(&["tasks", &key.task_id, "timer", "complete"])?;
        let body = CompleteRequest {
            user_id: &key.user_id,
            date: key.date,
            duration,
        };
        debug!(key = %key, "Completing timer");
        let response = self.authorize(self.http.post(url).json(&body)).send().await?;
        decode(response).await
    }

    async fn transition(&self, key: &TimerKey, action: &str) -> Result<TimerSnapshot> {
        let url = self.endpoint(&["tasks", &key.task_id, "timer", action])?;
        let body = TimerRequest {
            user_id: &key.user_id,
            date: key.date,
        };
        debug!(key = %key, action, "Sending timer transition");
        let response = self.authorize(self.http.post(url).json(&body)).send().await?;
        decode(response).await
    }

    /// Appends `segments` to the base URL, percent-encoding each one so ids
    /// cannot add path segments or a query.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidUrl(format!("{}: cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Sends a GET built by `build`, retrying transient failures.
    async fn get_with_retry<T, F>(&self, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = match self.authorize(build()).send().await {
                Ok(response) => decode(response).await,
                Err(e) => Err(ClientError::Http(e)),
            };

            match result {
                Err(err) if err.is_transient() => {
                    if attempt >= self.retry.max_attempts {
                        return Err(ClientError::MaxRetriesExceeded {
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Read failed, will retry"
                    );
                    sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl SnapshotSource for TimerClient {
    async fn fetch(&self, key: &TimerKey) -> Result<TimerSnapshot> {
        self.get_timer(key).await
    }
}

/// Decodes a success body or maps the server's `{error, code}` body.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let text = response.text().await.unwrap_or_default();
    let (message, code) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.error, body.code),
        Err(_) => (text, String::new()),
    };

    Err(match status {
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::CONFLICT => ClientError::InvalidState(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ClientError::Unauthorized(if code.is_empty() { message } else { code })
        }
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            ClientError::Unavailable(message)
        }
        s if s.is_client_error() => ClientError::Rejected { code, message },
        s => ClientError::Server {
            status: s.as_u16(),
            code,
            message,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_trailing_slash() {
        let client = TimerClient::new("http://localhost:8080/", None).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_new_rejects_bad_urls() {
        assert!(matches!(
            TimerClient::new("not a url", None),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            TimerClient::new("ftp://example.com", None),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let client = TimerClient::new("http://localhost:8080", Some("t0p-secret".into())).unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("t0p-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let client = TimerClient::new("http://localhost:8080/api/", None).unwrap();

        let url = client.endpoint(&["tasks", "a/b?c#d", "timer"]).unwrap();
        assert_eq!(url.path(), "/api/tasks/a%2Fb%3Fc%23d/timer");
        assert!(url.query().is_none());
    }

    #[test]
    fn test_add_jitter_stays_within_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let secs = add_jitter(base).as_secs_f64();
            assert!((7.5..=12.5).contains(&secs), "Jitter out of bounds: {secs}");
        }
    }

    #[test]
    fn test_delay_doubles_up_to_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
        };

        let first = policy.delay_after(1).as_millis();
        let second = policy.delay_after(2).as_millis();
        let capped = policy.delay_after(8).as_millis();

        assert!((75..=125).contains(&first), "first delay {first}");
        assert!((150..=250).contains(&second), "second delay {second}");
        assert!((300..=500).contains(&capped), "capped delay {capped}");
    }

    #[test]
    fn test_none_policy_has_single_attempt() {
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
}
