//! Task status contract used by the timer subsystem.
//!
//! Tasks are owned by the wider application; the timer subsystem only reads a
//! task's status and advances it to `completed`. Two backends implement the
//! [`TaskStore`] contract:
//!
//! - [`InMemoryTaskStore`] - an in-process registry, used when no external
//!   task service is configured
//! - [`RemoteTaskStore`] - a REST client for `GET /tasks/{id}` and
//!   `PATCH /tasks/{id}/status` on an external service
//!
//! # Retries
//!
//! [`RemoteTaskStore`] retries transient failures (timeouts, connection errors,
//! 5xx responses) with exponential backoff and jitter:
//!
//! ```text
//! delay = min(2^attempt * base + random(0, 100ms), 10s)
//! ```
//!
//! Setting a task's status is idempotent, so a retried `PATCH` is harmless.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::types::{Task, TaskStatus};

/// Default timeout for task service requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of attempts for a task service call.
const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Base delay for exponential backoff (100ms).
const BASE_BACKOFF_MS: u64 = 100;

/// Maximum delay cap for exponential backoff (10 seconds).
const MAX_BACKOFF_MS: u64 = 10_000;

/// Maximum jitter to add to backoff delay (100ms).
const MAX_JITTER_MS: u64 = 100;

/// Errors that can occur when reading or updating tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    /// No task exists with the given id.
    #[error("task not found: {0}")]
    NotFound(String),

    /// A task with the given id already exists.
    #[error("task already exists: {0}")]
    AlreadyExists(String),

    /// The task service rejected our credentials.
    #[error("unauthorized: task service rejected credentials")]
    Unauthorized,

    /// The request to the task service timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The task service is unreachable or returned a server error.
    #[error("task service unavailable: {0}")]
    Unavailable(String),

    /// The task service returned something we could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Client configuration error.
    #[error("client configuration error: {0}")]
    Configuration(String),

    /// The backend does not support the operation.
    #[error("operation not supported by this task backend: {0}")]
    Unsupported(&'static str),

    /// All retry attempts have been exhausted.
    #[error("all {attempts} attempts failed: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last error encountered.
        last_error: String,
    },
}

impl TaskError {
    /// Returns `true` if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Unavailable(_) | Self::RetriesExhausted { .. }
        )
    }
}

/// Result of a status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// The task after the update.
    pub task: Task,

    /// Status before the update, when the backend can tell.
    pub previous: Option<TaskStatus>,
}

impl StatusChange {
    /// Returns `true` unless the backend reported the status was already set.
    pub fn changed(&self) -> bool {
        self.previous != Some(self.task.status)
    }
}

/// Read/update access to tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetches a task.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] if the task does not exist, or a transport error.
    async fn get(&self, task_id: &str) -> Result<Task, TaskError>;

    /// Sets a task's status.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] if the task does not exist, or a transport error.
    async fn set_status(&self, task_id: &str, status: TaskStatus)
        -> Result<StatusChange, TaskError>;

    /// Registers a new task.
    ///
    /// # Errors
    ///
    /// [`TaskError::Unsupported`] unless the backend owns task creation.
    async fn create(&self, _task_id: &str, _title: &str) -> Result<Task, TaskError> {
        Err(TaskError::Unsupported("create"))
    }

    /// Removes a task.
    ///
    /// # Errors
    ///
    /// [`TaskError::Unsupported`] unless the backend owns task deletion.
    async fn delete(&self, _task_id: &str) -> Result<Task, TaskError> {
        Err(TaskError::Unsupported("delete"))
    }
}

/// In-process task registry.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Returns `true` if no task is registered.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, task_id: &str) -> Result<Task, TaskError> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    async fn set_status(
        &self,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<StatusChange, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        let previous = task.status;
        if previous != status {
            task.status = status;
            task.updated_at = Utc::now();
        }

        Ok(StatusChange {
            task: task.clone(),
            previous: Some(previous),
        })
    }

    async fn create(&self, task_id: &str, title: &str) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(task_id) {
            return Err(TaskError::AlreadyExists(task_id.to_string()));
        }

        let task = Task {
            id: task_id.to_string(),
            title: title.to_string(),
            status: TaskStatus::Pending,
            updated_at: Utc::now(),
        };
        tasks.insert(task_id.to_string(), task.clone());
        debug!(task_id = %task_id, "Task registered");
        Ok(task)
    }

    async fn delete(&self, task_id: &str) -> Result<Task, TaskError> {
        self.tasks
            .write()
            .await
            .remove(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }
}

/// Retry settings for [`RemoteTaskStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first one.
    pub max_attempts: u32,

    /// Base delay for exponential backoff.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// A policy with millisecond delays, for tests.
    #[must_use]
    pub fn fast_for_tests() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        }
    }

    /// Calculates the backoff delay for a zero-indexed retry attempt.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base_backoff.as_millis()).unwrap_or(MAX_BACKOFF_MS);
        let exponential_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
        let jitter_ms = rand::rng().random_range(0..=MAX_JITTER_MS.min(base_ms));
        let total_ms = exponential_ms.saturating_add(jitter_ms).min(MAX_BACKOFF_MS);
        Duration::from_millis(total_ms)
    }
}

#[derive(Debug, Serialize)]
struct StatusUpdateBody {
    status: TaskStatus,
}

/// REST client for an external task service.
#[derive(Clone)]
pub struct RemoteTaskStore {
    http_client: Client,
    base_url: String,
    token: Option<String>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RemoteTaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTaskStore")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RemoteTaskStore {
    /// Creates a client for the task service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Configuration`] if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, TaskError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TaskError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url,
            token,
            retry: RetryPolicy::default(),
        })
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the base URL of the task service.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch_once(&self, task_id: &str) -> Result<Task, TaskError> {
        let url = format!("{}/tasks/{}", self.base_url, task_id);
        debug!(url = %url, "Fetching task");

        let response = self
            .authorize(self.http_client.get(&url))
            .send()
            .await
            .map_err(map_transport_error)?;

        let response = check_status(response, task_id).await?;
        response
            .json::<Task>()
            .await
            .map_err(|e| TaskError::InvalidResponse(format!("failed to parse task: {e}")))
    }

    async fn set_status_once(&self, task_id: &str, status: TaskStatus) -> Result<Task, TaskError> {
        let url = format!("{}/tasks/{}/status", self.base_url, task_id);
        debug!(url = %url, status = %status, "Updating task status");

        let response = self
            .authorize(self.http_client.patch(&url))
            .json(&StatusUpdateBody { status })
            .send()
            .await
            .map_err(map_transport_error)?;

        let response = check_status(response, task_id).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| TaskError::InvalidResponse(format!("failed to read body: {e}")))?;

        // Services may answer 204 or echo the task back.
        if body.is_empty() {
            return Ok(Task {
                id: task_id.to_string(),
                title: String::new(),
                status,
                updated_at: Utc::now(),
            });
        }

        serde_json::from_slice::<Task>(&body)
            .map_err(|e| TaskError::InvalidResponse(format!("failed to parse task: {e}")))
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    async fn with_retry<T, F, Fut>(&self, what: &'static str, op: F) -> Result<T, TaskError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<T, TaskError>> + Send,
        T: Send,
    {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation = what, attempt = attempt + 1, "Task service call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        let delay = self.retry.backoff_delay(attempt);
                        warn!(
                            operation = what,
                            attempt = attempt + 1,
                            max_attempts = attempts,
                            delay_ms = delay.as_millis(),
                            error = %e,
                            "Task service call failed, retrying"
                        );
                        sleep(delay).await;
                    } else {
                        error!(
                            operation = what,
                            attempts,
                            error = %e,
                            "Task service call failed, no more retries"
                        );
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(TaskError::RetriesExhausted {
            attempts,
            last_error,
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> TaskError {
    if e.is_timeout() {
        TaskError::Timeout(REQUEST_TIMEOUT)
    } else if e.is_connect() {
        TaskError::Unavailable(format!("connection failed: {e}"))
    } else {
        TaskError::Unavailable(format!("request failed: {e}"))
    }
}

async fn check_status(
    response: reqwest::Response,
    task_id: &str,
) -> Result<reqwest::Response, TaskError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::NOT_FOUND => Err(TaskError::NotFound(task_id.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TaskError::Unauthorized),
        _ => {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                Err(TaskError::Unavailable(format!("status {status}: {body}")))
            } else {
                error!(status = %status, body = %body, "Unexpected response from task service");
                Err(TaskError::InvalidResponse(format!(
                    "unexpected status {status}: {body}"
                )))
            }
        }
    }
}

#[async_trait]
impl TaskStore for RemoteTaskStore {
    async fn get(&self, task_id: &str) -> Result<Task, TaskError> {
        self.with_retry("get", || self.fetch_once(task_id)).await
    }

    async fn set_status(
        &self,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<StatusChange, TaskError> {
        let task = self
            .with_retry("set_status", || self.set_status_once(task_id, status))
            .await?;
        Ok(StatusChange {
            task,
            previous: None,
        })
    }
}
