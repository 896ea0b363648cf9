//! Shared data types for the WorkLogix server.
//!
//! This module defines the timer records, task references, and change
//! notifications that flow between the timer controller, the task status
//! synchronizer, and connected clients. All wire representations use
//! `camelCase` field names to match the JSON API contract.

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

impl TimerStatus {
    /// Returns the wire name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TimerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
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

impl TaskStatus {
    /// Returns the wire name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite identity of a [`TimeLog`]: one task, one user, one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerKey {
    pub task_id: String,
    pub user_id: String,
    pub date: NaiveDate,
}

impl TimerKey {
    /// Creates a key from its parts.
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

/// Persisted record of time accumulated for one task, one user, one day.
///
/// `timer_started_at` is `Some` exactly when `timer_status` is
/// [`TimerStatus::Running`]. A completed log is never mutated again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeLog {
    #[serde(flatten)]
    pub key: TimerKey,
    pub total_seconds: u64,
    pub timer_started_at: Option<DateTime<Utc>>,
    pub timer_status: TimerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimeLog {
    /// Creates an empty, stopped log for `key`.
    #[must_use]
    pub fn new(key: TimerKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            total_seconds: 0,
            timer_started_at: None,
            timer_status: TimerStatus::Stopped,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the client-facing view of this log.
    #[must_use]
    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            total_seconds: self.total_seconds,
            timer_status: self.timer_status,
            timer_started_at: self.timer_started_at,
        }
    }

    /// Returns `true` if the running/started-at invariant holds.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        (self.timer_status == TimerStatus::Running) == self.timer_started_at.is_some()
    }
}

/// The authoritative timer state returned by every timer endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub total_seconds: u64,
    pub timer_status: TimerStatus,
    pub timer_started_at: Option<DateTime<Utc>>,
}

/// A task as known to the task registry or the external task service.
///
/// Only `id` and `status` are required on the wire; external services are not
/// expected to send the other fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub status: TaskStatus,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// A notification pushed to every connected client when cached data is stale.
///
/// Serialized as an internally tagged object whose `type` field is the
/// snake_case variant name, e.g. `{"type":"task_updated","taskId":"t-1"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    #[serde(rename_all = "camelCase")]
    TaskCreated { task_id: String },

    #[serde(rename_all = "camelCase")]
    TaskUpdated {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
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
}

/// Discriminator of a [`ChangeEvent`], used for subscriber filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeEventType {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    UsersUpdated,
    TimerUpdated,
}

impl ChangeEvent {
    /// Builds the `timer_updated` event for a log.
    #[must_use]
    pub fn timer_updated(log: &TimeLog) -> Self {
        Self::TimerUpdated {
            task_id: log.key.task_id.clone(),
            user_id: log.key.user_id.clone(),
            date: log.key.date,
            timer_status: log.timer_status,
        }
    }

    /// Returns the discriminator of this event.
    #[must_use]
    pub fn event_type(&self) -> ChangeEventType {
        match self {
            Self::TaskCreated { .. } => ChangeEventType::TaskCreated,
            Self::TaskUpdated { .. } => ChangeEventType::TaskUpdated,
            Self::TaskDeleted { .. } => ChangeEventType::TaskDeleted,
            Self::UsersUpdated => ChangeEventType::UsersUpdated,
            Self::TimerUpdated { .. } => ChangeEventType::TimerUpdated,
        }
    }

    /// Returns the task this event refers to, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskCreated { task_id }
            | Self::TaskUpdated { task_id, .. }
            | Self::TaskDeleted { task_id }
            | Self::TimerUpdated { task_id, .. } => Some(task_id.as_str()),
            Self::UsersUpdated => None,
        }
    }
}
