//! Timer operations as seen by the HTTP layer.
//!
//! [`TimerService`] wires the [`TimerController`] to the
//! [`TaskStatusSynchronizer`] and the [`ChangeBroadcaster`] so that every
//! effective timer change is announced exactly once.

use chrono::NaiveDate;
use tracing::debug;

use crate::broadcast::ChangeBroadcaster;
use crate::error::Result;
use crate::store::Applied;
use crate::synchronizer::TaskStatusSynchronizer;
use crate::timer::TimerController;
use crate::types::{ChangeEvent, TimeLog, TimerKey, TimerSnapshot};

#[derive(Debug, Clone)]
pub struct TimerService {
    controller: TimerController,
    synchronizer: TaskStatusSynchronizer,
    broadcaster: ChangeBroadcaster,
}

impl TimerService {
    #[must_use]
    pub fn new(
        controller: TimerController,
        synchronizer: TaskStatusSynchronizer,
        broadcaster: ChangeBroadcaster,
    ) -> Self {
        Self {
            controller,
            synchronizer,
            broadcaster,
        }
    }

    pub fn synchronizer(&self) -> &TaskStatusSynchronizer {
        &self.synchronizer
    }

    /// Starts the timer, announcing it only if it was not already running.
    ///
    /// # Errors
    ///
    /// `NotFound` if the task does not exist (no timer log is created),
    /// `InvalidState` if the timer is completed.
    pub async fn start(&self, key: &TimerKey) -> Result<TimerSnapshot> {
        self.synchronizer.require_task(&key.task_id).await?;
        let applied = self.controller.start(key)?;
        self.announce(&applied);
        Ok(applied.log.snapshot())
    }

    /// Pauses a running timer.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown key, `InvalidState` if not running.
    pub fn pause(&self, key: &TimerKey) -> Result<TimerSnapshot> {
        let applied = self.controller.pause(key)?;
        self.announce(&applied);
        Ok(applied.log.snapshot())
    }

    /// Finalizes the timer, then marks the owning task completed.
    ///
    /// # Errors
    ///
    /// `NotFound` if the task does not exist, checked before the timer is
    /// touched. Task backend errors after the timer was finalized keep the
    /// finalized timer, so the call can be retried.
    pub async fn complete(
        &self,
        key: &TimerKey,
        reported_seconds: Option<u64>,
    ) -> Result<TimerSnapshot> {
        self.synchronizer.require_task(&key.task_id).await?;
        let applied = self.controller.complete(key, reported_seconds)?;
        self.synchronizer.on_timer_completed(&applied).await?;
        Ok(applied.log.snapshot())
    }

    /// # Errors
    ///
    /// `NotFound` if the timer was never started.
    pub fn query(&self, key: &TimerKey) -> Result<TimerSnapshot> {
        Ok(self.controller.query(key)?.snapshot())
    }

    /// # Errors
    ///
    /// `Internal` if the store fails.
    pub fn list_for_task(&self, task_id: &str, date: Option<NaiveDate>) -> Result<Vec<TimeLog>> {
        Ok(self.controller.list_for_task(task_id, date)?)
    }

    fn announce(&self, applied: &Applied) {
        if applied.changed {
            self.broadcaster
                .broadcast(ChangeEvent::timer_updated(&applied.log));
        } else {
            debug!(key = %applied.log.key, "Timer unchanged, nothing to announce");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use crate::store::InMemoryTimerStore;
    use crate::tasks::{InMemoryTaskStore, TaskStore};
    use crate::timer::ManualClock;
    use crate::types::{ChangeEventType, TaskStatus, TimerStatus};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::sync::broadcast::Receiver;

    struct Harness {
        service: TimerService,
        clock: Arc<ManualClock>,
        tasks: Arc<InMemoryTaskStore>,
        rx: Receiver<ChangeEvent>,
    }

    async fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 14, 9, 0, 0).unwrap(),
        ));
        let tasks = Arc::new(InMemoryTaskStore::new());
        tasks.create("t-1", "Report").await.unwrap();

        let broadcaster = ChangeBroadcaster::new();
        let rx = broadcaster.subscribe();
        let controller = TimerController::new(Arc::new(InMemoryTimerStore::new()), clock.clone());
        let synchronizer = TaskStatusSynchronizer::new(tasks.clone(), broadcaster.clone());

        Harness {
            service: TimerService::new(controller, synchronizer, broadcaster),
            clock,
            tasks,
            rx,
        }
    }

    fn key() -> TimerKey {
        TimerKey::new("t-1", "u-1", NaiveDate::from_ymd_opt(2024, 5, 14).unwrap())
    }

    fn drain(rx: &mut Receiver<ChangeEvent>) -> Vec<ChangeEventType> {
        let mut types = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => types.push(event.event_type()),
                Err(TryRecvError::Empty) => return types,
                Err(e) => panic!("unexpected receive error: {e}"),
            }
        }
    }

    #[tokio::test]
    async fn start_and_pause_announce_changes() {
        let mut h = harness().await;

        h.service.start(&key()).await.unwrap();
        h.clock.advance_secs(10);
        let snapshot = h.service.pause(&key()).unwrap();

        assert_eq!(snapshot.total_seconds, 10);
        assert_eq!(
            drain(&mut h.rx),
            vec![ChangeEventType::TimerUpdated, ChangeEventType::TimerUpdated]
        );
    }

    #[tokio::test]
    async fn repeated_start_is_not_announced() {
        let mut h = harness().await;

        h.service.start(&key()).await.unwrap();
        h.service.start(&key()).await.unwrap();

        assert_eq!(drain(&mut h.rx), vec![ChangeEventType::TimerUpdated]);
    }

    #[tokio::test]
    async fn failed_pause_is_not_announced() {
        let mut h = harness().await;

        let err = h.service.pause(&key()).unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
        assert!(drain(&mut h.rx).is_empty());
    }

    #[tokio::test]
    async fn full_scenario_completes_task() {
        let mut h = harness().await;

        h.service.start(&key()).await.unwrap();
        h.clock.advance_secs(10);
        h.service.pause(&key()).unwrap();
        h.clock.advance_secs(10);
        h.service.start(&key()).await.unwrap();
        h.clock.advance_secs(15);
        drain(&mut h.rx);

        let snapshot = h.service.complete(&key(), Some(25)).await.unwrap();
        assert_eq!(snapshot.total_seconds, 25);
        assert_eq!(snapshot.timer_status, TimerStatus::Completed);
        assert_eq!(h.tasks.get("t-1").await.unwrap().status, TaskStatus::Completed);
        assert_eq!(drain(&mut h.rx), vec![ChangeEventType::TaskUpdated]);

        let again = h.service.complete(&key(), None).await.unwrap();
        assert_eq!(again, snapshot);
        assert!(drain(&mut h.rx).is_empty());
    }

    #[tokio::test]
    async fn unknown_task_creates_no_timer() {
        let mut h = harness().await;
        let orphan = TimerKey::new("missing", "u-1", key().date);

        let err = h.service.start(&orphan).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(ref m) if m == "task missing"));
        let err = h.service.complete(&orphan, None).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));

        assert!(matches!(
            h.service.query(&orphan).unwrap_err(),
            ServerError::NotFound(_)
        ));
        assert!(h.service.list_for_task("missing", None).unwrap().is_empty());
        assert!(drain(&mut h.rx).is_empty());
    }

    #[tokio::test]
    async fn task_created_later_can_be_timed() {
        let h = harness().await;
        let late = TimerKey::new("t-2", "u-1", key().date);
        assert!(h.service.start(&late).await.is_err());

        h.tasks.create("t-2", "Late").await.unwrap();
        h.service.start(&late).await.unwrap();
        h.clock.advance_secs(4);

        let snapshot = h.service.complete(&late, None).await.unwrap();
        assert_eq!(snapshot.total_seconds, 4);
        assert_eq!(h.tasks.get("t-2").await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn start_after_complete_is_invalid_state() {
        let h = harness().await;
        h.service.complete(&key(), None).await.unwrap();

        let err = h.service.start(&key()).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidState { .. }));
    }
}
