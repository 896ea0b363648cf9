//! Timer controller: start/pause/complete/query over the timer store.
//!
//! Each [`TimerKey`] follows a small state machine:
//!
//! ```text
//! stopped --start--> running --pause--> stopped
//! stopped|running --complete--> completed (terminal)
//! ```
//!
//! All accumulation uses the server clock. Elapsed time for a running timer is
//! `floor((now - timer_started_at) / 1s)`, clamped to zero when the clock has
//! moved backwards.
//!
//! The transitions are pure functions of `(current record, now)` and are run
//! under the store lock via [`TimerStore::apply`], so overlapping calls for the
//! same key are serialized:
//!
//! - `start` on a running timer is an idempotent no-op that keeps the original
//!   start instant.
//! - `pause` on a timer that is not running fails with `InvalidState`.
//! - `complete` on a completed timer is an idempotent no-op.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{Applied, TimerStore};
use crate::types::{TimeLog, TimerKey, TimerStatus};

/// Errors returned by timer operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// No log exists for the key.
    #[error("no timer log for {0}")]
    NotFound(TimerKey),

    /// The operation is not valid for the timer's current status.
    #[error("cannot {operation} timer {key}: timer is {status}")]
    InvalidState {
        key: TimerKey,
        operation: &'static str,
        status: TimerStatus,
    },

    /// The store could not be read or written.
    #[error("timer storage failure: {0}")]
    Storage(String),
}

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used by tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward (or backward, for negative values) by `secs`.
    pub fn advance_secs(&self, secs: i64) {
        if let Ok(mut now) = self.now.lock() {
            *now += Duration::seconds(secs);
        }
    }

    /// Sets the clock to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = instant;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map(|now| *now)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// Whole seconds between `started_at` and `now`, never negative.
#[must_use]
pub fn elapsed_seconds(started_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (now - started_at).num_milliseconds();
    u64::try_from(millis / 1000).unwrap_or(0)
}

/// Folds a running interval into `total_seconds` and stops the timer.
fn checkpoint(log: &mut TimeLog, now: DateTime<Utc>) -> u64 {
    let elapsed = log
        .timer_started_at
        .take()
        .map_or(0, |started| elapsed_seconds(started, now));
    log.total_seconds = log.total_seconds.saturating_add(elapsed);
    elapsed
}

fn start_transition(
    key: &TimerKey,
    current: Option<&TimeLog>,
    now: DateTime<Utc>,
) -> Result<Applied, TimerError> {
    let mut log = current
        .cloned()
        .unwrap_or_else(|| TimeLog::new(key.clone(), now));

    match log.timer_status {
        TimerStatus::Completed => Err(TimerError::InvalidState {
            key: key.clone(),
            operation: "start",
            status: TimerStatus::Completed,
        }),
        TimerStatus::Running => Ok(Applied::unchanged(log)),
        TimerStatus::Stopped => {
            log.timer_status = TimerStatus::Running;
            log.timer_started_at = Some(now);
            log.updated_at = now;
            Ok(Applied::changed(log))
        }
    }
}

fn pause_transition(
    key: &TimerKey,
    current: Option<&TimeLog>,
    now: DateTime<Utc>,
) -> Result<Applied, TimerError> {
    let mut log = current
        .cloned()
        .ok_or_else(|| TimerError::NotFound(key.clone()))?;

    if log.timer_status != TimerStatus::Running {
        return Err(TimerError::InvalidState {
            key: key.clone(),
            operation: "pause",
            status: log.timer_status,
        });
    }

    checkpoint(&mut log, now);
    log.timer_status = TimerStatus::Stopped;
    log.updated_at = now;
    Ok(Applied::changed(log))
}

fn complete_transition(
    key: &TimerKey,
    current: Option<&TimeLog>,
    now: DateTime<Utc>,
) -> Result<Applied, TimerError> {
    let mut log = current
        .cloned()
        .unwrap_or_else(|| TimeLog::new(key.clone(), now));

    if log.timer_status == TimerStatus::Completed {
        return Ok(Applied::unchanged(log));
    }

    checkpoint(&mut log, now);
    log.timer_status = TimerStatus::Completed;
    log.updated_at = now;
    Ok(Applied::changed(log))
}

/// Timer operations over a [`TimerStore`].
#[derive(Clone)]
pub struct TimerController {
    store: Arc<dyn TimerStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TimerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerController")
            .field("store", &"<TimerStore>")
            .field("clock", &self.clock)
            .finish()
    }
}

impl TimerController {
    #[must_use]
    pub fn new(store: Arc<dyn TimerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Returns the controller's current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Starts (or keeps running) the timer for `key`.
    ///
    /// Creates the log on first use. Calling `start` on a running timer
    /// returns the current state without touching the start instant.
    ///
    /// # Errors
    ///
    /// - [`TimerError::InvalidState`] if the timer is completed
    /// - [`TimerError::Storage`] if the store fails
    pub fn start(&self, key: &TimerKey) -> Result<Applied, TimerError> {
        let now = self.clock.now();
        let applied = self
            .store
            .apply(key, &|current| start_transition(key, current, now))?;

        if applied.changed {
            info!(key = %key, total_seconds = applied.log.total_seconds, "Timer started");
        } else {
            debug!(key = %key, "Timer already running, start ignored");
        }
        Ok(applied)
    }

    /// Pauses a running timer, folding the elapsed interval into the total.
    ///
    /// # Errors
    ///
    /// - [`TimerError::NotFound`] if the timer was never started
    /// - [`TimerError::InvalidState`] if the timer is not running
    /// - [`TimerError::Storage`] if the store fails
    pub fn pause(&self, key: &TimerKey) -> Result<Applied, TimerError> {
        let now = self.clock.now();
        let applied = self
            .store
            .apply(key, &|current| pause_transition(key, current, now))?;

        info!(key = %key, total_seconds = applied.log.total_seconds, "Timer paused");
        Ok(applied)
    }

    /// Finalizes the day's log. Idempotent once completed.
    ///
    /// `reported_seconds` is the client's own measurement. It never feeds the
    /// accumulation; a mismatch with the server total is only logged.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Storage`] if the store fails.
    pub fn complete(
        &self,
        key: &TimerKey,
        reported_seconds: Option<u64>,
    ) -> Result<Applied, TimerError> {
        let now = self.clock.now();
        let applied = self
            .store
            .apply(key, &|current| complete_transition(key, current, now))?;

        if let Some(reported) = reported_seconds {
            if reported != applied.log.total_seconds {
                warn!(
                    key = %key,
                    reported_seconds = reported,
                    total_seconds = applied.log.total_seconds,
                    "Client-reported duration differs from server total"
                );
            }
        }

        if applied.changed {
            info!(key = %key, total_seconds = applied.log.total_seconds, "Timer completed");
        } else {
            debug!(key = %key, "Timer already completed");
        }
        Ok(applied)
    }

    /// Returns the current log for `key`.
    ///
    /// # Errors
    ///
    /// - [`TimerError::NotFound`] if the timer was never started
    /// - [`TimerError::Storage`] if the store fails
    pub fn query(&self, key: &TimerKey) -> Result<TimeLog, TimerError> {
        self.store
            .get(key)?
            .ok_or_else(|| TimerError::NotFound(key.clone()))
    }

    /// Returns all logs recorded for a task, optionally on one day.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Storage`] if the store fails.
    pub fn list_for_task(
        &self,
        task_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<TimeLog>, TimerError> {
        self.store.list_for_task(task_id, date)
    }
}
