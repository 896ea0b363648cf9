//! Task status synchronizer.
//!
//! Keeps a task's lifecycle status in step with its timers and announces the
//! change on the [`ChangeBroadcaster`].
//!
//! Completing a timer is two sequential steps: finalize the timer log, then
//! mark the task completed. There is no transaction across them. When the
//! second step fails the timer stays completed, the caller sees the task
//! error, and a retried `complete` only re-runs the status update because the
//! finalized log no longer accumulates.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::broadcast::ChangeBroadcaster;
use crate::store::Applied;
use crate::tasks::{TaskError, TaskStore};
use crate::types::{ChangeEvent, Task, TaskStatus};

/// Pushes task status changes to the task backend and the change channel.
#[derive(Clone)]
pub struct TaskStatusSynchronizer {
    tasks: Arc<dyn TaskStore>,
    broadcaster: ChangeBroadcaster,
}

impl std::fmt::Debug for TaskStatusSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStatusSynchronizer")
            .field("tasks", &"<TaskStore>")
            .field("broadcaster", &self.broadcaster)
            .finish()
    }
}

impl TaskStatusSynchronizer {
    #[must_use]
    pub fn new(tasks: Arc<dyn TaskStore>, broadcaster: ChangeBroadcaster) -> Self {
        Self { tasks, broadcaster }
    }

    /// Reads the task, failing with `NotFound` if the backend does not know it.
    ///
    /// # Errors
    ///
    /// Propagates the task backend's error.
    pub async fn require_task(&self, task_id: &str) -> Result<Task, TaskError> {
        self.tasks.get(task_id).await
    }

    /// Sets a task's status and emits `task_updated` if it actually changed.
    ///
    /// # Errors
    ///
    /// Propagates the task backend's error; nothing is broadcast in that case.
    pub async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<Task, TaskError> {
        let change = self.tasks.set_status(task_id, status).await?;

        if change.changed() {
            info!(task_id = %task_id, status = %status, "Task status updated");
            self.broadcaster.broadcast(ChangeEvent::TaskUpdated {
                task_id: task_id.to_string(),
                status: Some(change.task.status),
            });
        } else {
            debug!(task_id = %task_id, status = %status, "Task status unchanged");
        }

        Ok(change.task)
    }

    /// Marks the task owning a completed timer as completed.
    ///
    /// Emits exactly one event:
    /// - `task_updated` when the task status changed or the timer was newly
    ///   finalized
    /// - `timer_updated` when the task update failed but the timer changed
    ///
    /// A repeated completion whose task is already completed emits nothing.
    ///
    /// # Errors
    ///
    /// Propagates the task backend's error. The timer log is not rolled back.
    pub async fn on_timer_completed(&self, completed: &Applied) -> Result<Task, TaskError> {
        let task_id = completed.log.key.task_id.as_str();

        match self.tasks.set_status(task_id, TaskStatus::Completed).await {
            Ok(change) => {
                if change.changed() || completed.changed {
                    info!(
                        task_id = %task_id,
                        timer_finalized = completed.changed,
                        "Task completed"
                    );
                    self.broadcaster.broadcast(ChangeEvent::TaskUpdated {
                        task_id: task_id.to_string(),
                        status: Some(TaskStatus::Completed),
                    });
                }
                Ok(change.task)
            }
            Err(e) => {
                warn!(
                    task_id = %task_id,
                    key = %completed.log.key,
                    error = %e,
                    "Timer finalized but task status update failed"
                );
                if completed.changed {
                    self.broadcaster
                        .broadcast(ChangeEvent::timer_updated(&completed.log));
                }
                Err(e)
            }
        }
    }
}
