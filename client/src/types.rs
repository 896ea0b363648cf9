//! Wire types shared with the WorkLogix server.
//!
//! Field names are `camelCase` and enum values `snake_case`, matching the
//! server's JSON API.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single day's timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Stopped,
    Running,
    Completed,
}

impl fmt::Display for TimerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Completed => "completed",
        })
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        })
    }
}

/// Identifies one timer: a task, a user and a calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub task_id: String,
    pub user_id: String,
    pub date: NaiveDate,
}

impl TimerKey {
    pub fn new(task_id: impl Into<String>, user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            task_id: task_id.into(),
            user_id: user_id.into(),
            date,
        }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.task_id, self.user_id, self.date)
    }
}

/// Authoritative timer state as last reported by the server.
///
/// This is the baseline the projector extrapolates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub total_seconds: u64,
    pub timer_status: TimerStatus,
    pub timer_started_at: Option<DateTime<Utc>>,
}

/// A task as returned by `GET /tasks/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub status: TaskStatus,
}

/// Request body for start and pause.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TimerRequest<'a> {
    pub user_id: &'a str,
    pub date: NaiveDate,
}

/// Request body for complete.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompleteRequest<'a> {
    pub user_id: &'a str,
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// Error body returned by the server on every non-success response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub code: String,
}

/// A cache-invalidation notice received on the push channel.
///
/// Types this client does not know deserialize to [`ChangeEvent::Unknown`]
/// and are dropped by the push listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    #[serde(rename_all = "camelCase")]
    TaskCreated { task_id: String },

    #[serde(rename_all = "camelCase")]
    TaskUpdated {
        task_id: String,
        #[serde(default)]
        status: Option<TaskStatus>,
    },

    #[serde(rename_all = "camelCase")]
    TaskDeleted { task_id: String },

    UsersUpdated,

    #[serde(rename_all = "camelCase")]
    TimerUpdated {
        task_id: String,
        user_id: String,
        date: NaiveDate,
        timer_status: TimerStatus,
    },

    #[serde(other)]
    Unknown,
}

impl ChangeEvent {
    /// Returns `true` if cached timer data for `task_id` may be stale.
    #[must_use]
    pub fn affects_task(&self, task_id: &str) -> bool {
        match self {
            Self::TaskUpdated { task_id: id, .. }
            | Self::TaskDeleted { task_id: id }
            | Self::TimerUpdated { task_id: id, .. } => id == task_id,
            Self::TaskCreated { .. } | Self::UsersUpdated | Self::Unknown => false,
        }
    }
}
