//! Timer store holding the authoritative [`TimeLog`] records.
//!
//! The store maps a [`TimerKey`] (task, user, day) to the accumulated time for
//! that key. Records are created lazily by the first mutating call and are
//! never deleted.
//!
//! # Atomic Updates
//!
//! Every mutation goes through [`TimerStore::apply`], which runs a transition
//! function against the current record while holding the store's write lock.
//! Two overlapping `start` calls for the same key therefore observe each
//! other's result instead of racing on a stale copy, which is what prevents
//! double accumulation.
//!
//! # Thread Safety
//!
//! [`InMemoryTimerStore`] uses interior mutability with [`RwLock`] for
//! thread-safe access across async tasks. Keys are the unit of isolation; the
//! lock is held only for the duration of a single in-memory transition.
//!
//! # Example
//!
//! ```rust
//! use chrono::{NaiveDate, Utc};
//! use worklogix_server::store::{Applied, InMemoryTimerStore, TimerStore};
//! use worklogix_server::types::{TimeLog, TimerKey};
//!
//! let store = InMemoryTimerStore::new();
//! let key = TimerKey::new("task-1", "user-1", NaiveDate::from_ymd_opt(2024, 5, 14).unwrap());
//!
//! let applied = store
//!     .apply(&key, &|current| {
//!         let log = current.cloned().unwrap_or_else(|| TimeLog::new(key.clone(), Utc::now()));
//!         Ok(Applied::changed(log))
//!     })
//!     .unwrap();
//!
//! assert!(applied.changed);
//! assert!(store.get(&key).unwrap().is_some());
//! ```

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::NaiveDate;
use tracing::{debug, trace};

use crate::timer::TimerError;
use crate::types::{TimeLog, TimerKey};

/// Outcome of a transition applied to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// The record after the transition.
    pub log: TimeLog,

    /// Whether the transition modified the record. Unchanged records are not
    /// written back.
    pub changed: bool,
}

impl Applied {
    /// A transition that produced a new record state.
    #[must_use]
    pub fn changed(log: TimeLog) -> Self {
        Self { log, changed: true }
    }

    /// A transition that left the record as it was.
    #[must_use]
    pub fn unchanged(log: TimeLog) -> Self {
        Self {
            log,
            changed: false,
        }
    }
}

/// Transition function run under the store lock.
pub type Transition<'a> = dyn Fn(Option<&TimeLog>) -> Result<Applied, TimerError> + 'a;

/// Storage backend for timer logs.
pub trait TimerStore: Send + Sync {
    /// Returns the log for `key`, if one was ever created.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Storage`] if the backend is unavailable.
    fn get(&self, key: &TimerKey) -> Result<Option<TimeLog>, TimerError>;

    /// Returns every log for `task_id`, optionally restricted to one day,
    /// ordered by date then user.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Storage`] if the backend is unavailable.
    fn list_for_task(
        &self,
        task_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<TimeLog>, TimerError>;

    /// Atomically runs `transition` against the current record for `key` and
    /// persists the result if it changed.
    ///
    /// If `transition` returns an error, nothing is written.
    ///
    /// # Errors
    ///
    /// Propagates the transition's error, or [`TimerError::Storage`] if the
    /// backend is unavailable.
    fn apply(&self, key: &TimerKey, transition: &Transition<'_>) -> Result<Applied, TimerError>;
}

/// Thread-safe in-memory timer store.
#[derive(Debug, Default)]
pub struct InMemoryTimerStore {
    logs: RwLock<HashMap<TimerKey, TimeLog>>,
}

impl InMemoryTimerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        debug!("Creating in-memory timer store");
        Self::default()
    }

    /// Returns the number of stored logs.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Storage`] if the lock is poisoned.
    pub fn len(&self) -> Result<usize, TimerError> {
        Ok(self.read_logs()?.len())
    }

    /// Returns `true` if no log has been created yet.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Storage`] if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, TimerError> {
        Ok(self.read_logs()?.is_empty())
    }

    fn read_logs(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<TimerKey, TimeLog>>, TimerError> {
        self.logs
            .read()
            .map_err(|_| TimerError::Storage("timer store lock poisoned".to_string()))
    }
}

impl TimerStore for InMemoryTimerStore {
    fn get(&self, key: &TimerKey) -> Result<Option<TimeLog>, TimerError> {
        Ok(self.read_logs()?.get(key).cloned())
    }

    fn list_for_task(
        &self,
        task_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<TimeLog>, TimerError> {
        let logs = self.read_logs()?;
        let mut matching: Vec<TimeLog> = logs
            .values()
            .filter(|log| log.key.task_id == task_id)
            .filter(|log| date.map_or(true, |d| log.key.date == d))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            a.key
                .date
                .cmp(&b.key.date)
                .then_with(|| a.key.user_id.cmp(&b.key.user_id))
        });

        Ok(matching)
    }

    fn apply(&self, key: &TimerKey, transition: &Transition<'_>) -> Result<Applied, TimerError> {
        let mut logs = self
            .logs
            .write()
            .map_err(|_| TimerError::Storage("timer store lock poisoned".to_string()))?;

        let applied = transition(logs.get(key))?;

        if applied.changed {
            trace!(
                key = %key,
                status = %applied.log.timer_status,
                total_seconds = applied.log.total_seconds,
                "Persisting timer log"
            );
            logs.insert(key.clone(), applied.log.clone());
        }

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimerStatus;
    use chrono::Utc;
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn create(store: &InMemoryTimerStore, key: &TimerKey) -> Applied {
        store
            .apply(key, &|current| {
                let log = current
                    .cloned()
                    .unwrap_or_else(|| TimeLog::new(key.clone(), Utc::now()));
                Ok(Applied::changed(log))
            })
            .unwrap()
    }

    #[test]
    fn get_returns_none_for_unknown_key() {
        let store = InMemoryTimerStore::new();
        let key = TimerKey::new("t-1", "u-1", day(14));
        assert!(store.get(&key).unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn apply_persists_changed_log() {
        let store = InMemoryTimerStore::new();
        let key = TimerKey::new("t-1", "u-1", day(14));

        create(&store, &key);

        let stored = store.get(&key).unwrap().unwrap();
        assert_eq!(stored.key, key);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn apply_skips_write_when_unchanged() {
        let store = InMemoryTimerStore::new();
        let key = TimerKey::new("t-1", "u-1", day(14));

        let applied = store
            .apply(&key, &|_| {
                Ok(Applied::unchanged(TimeLog::new(key.clone(), Utc::now())))
            })
            .unwrap();

        assert!(!applied.changed);
        assert!(store.get(&key).unwrap().is_none());
    }

    #[test]
    fn apply_error_leaves_record_untouched() {
        let store = InMemoryTimerStore::new();
        let key = TimerKey::new("t-1", "u-1", day(14));
        create(&store, &key);
        let before = store.get(&key).unwrap();

        let result = store.apply(&key, &|_| {
            Err(TimerError::InvalidState {
                key: key.clone(),
                operation: "pause",
                status: TimerStatus::Stopped,
            })
        });

        assert!(result.is_err());
        assert_eq!(store.get(&key).unwrap(), before);
    }

    #[test]
    fn keys_for_different_users_are_independent() {
        let store = InMemoryTimerStore::new();
        let alice = TimerKey::new("t-1", "alice", day(14));
        let bob = TimerKey::new("t-1", "bob", day(14));

        create(&store, &alice);
        store
            .apply(&bob, &|_| {
                let mut log = TimeLog::new(bob.clone(), Utc::now());
                log.total_seconds = 30;
                Ok(Applied::changed(log))
            })
            .unwrap();

        assert_eq!(store.get(&alice).unwrap().unwrap().total_seconds, 0);
        assert_eq!(store.get(&bob).unwrap().unwrap().total_seconds, 30);
    }

    #[test]
    fn list_for_task_filters_and_orders() {
        let store = InMemoryTimerStore::new();
        create(&store, &TimerKey::new("t-1", "bob", day(15)));
        create(&store, &TimerKey::new("t-1", "alice", day(15)));
        create(&store, &TimerKey::new("t-1", "carol", day(14)));
        create(&store, &TimerKey::new("t-2", "alice", day(15)));

        let all = store.list_for_task("t-1", None).unwrap();
        let users: Vec<&str> = all.iter().map(|l| l.key.user_id.as_str()).collect();
        assert_eq!(users, vec!["carol", "alice", "bob"]);

        let on_15th = store.list_for_task("t-1", Some(day(15))).unwrap();
        assert_eq!(on_15th.len(), 2);

        assert!(store.list_for_task("t-3", None).unwrap().is_empty());
    }

    #[test]
    fn concurrent_increments_are_serialized() {
        let store = Arc::new(InMemoryTimerStore::new());
        let key = TimerKey::new("t-1", "u-1", day(14));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let key = key.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store
                            .apply(&key, &|current| {
                                let mut log = current
                                    .cloned()
                                    .unwrap_or_else(|| TimeLog::new(key.clone(), Utc::now()));
                                log.total_seconds += 1;
                                Ok(Applied::changed(log))
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get(&key).unwrap().unwrap().total_seconds, 800);
    }
}
