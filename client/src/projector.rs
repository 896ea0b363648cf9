//! Client-side elapsed-time projection.
//!
//! Between re-syncs the display value of a running timer is extrapolated from
//! the last server snapshot. [`project`] is a pure function of the baseline
//! and the local clock; [`Baseline`] holds the latest snapshot and is replaced
//! whole on every re-sync.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::types::{TimerSnapshot, TimerStatus};

/// Seconds to display for `baseline` at local time `now`.
///
/// Running timers add whole seconds elapsed since `timer_started_at`, clamped
/// at zero when the local clock is behind the server's. Any other state
/// displays `total_seconds` unchanged.
#[must_use]
pub fn project(baseline: &TimerSnapshot, now: DateTime<Utc>) -> u64 {
    match (baseline.timer_status, baseline.timer_started_at) {
        (TimerStatus::Running, Some(started_at)) => {
            let elapsed_ms = now.signed_duration_since(started_at).num_milliseconds();
            let elapsed_secs = u64::try_from(elapsed_ms / 1000).unwrap_or(0);
            baseline.total_seconds.saturating_add(elapsed_secs)
        }
        _ => baseline.total_seconds,
    }
}

/// Latest authoritative snapshot for one timer.
///
/// Writers replace the whole value; the last write wins. Readers either take
/// a copy or wait for the next replacement.
#[derive(Debug, Clone)]
pub struct Baseline {
    tx: Arc<watch::Sender<Option<TimerSnapshot>>>,
}

impl Default for Baseline {
    fn default() -> Self {
        Self::new()
    }
}

impl Baseline {
    /// Creates an empty baseline.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replaces the snapshot, notifying watchers.
    pub fn replace(&self, snapshot: TimerSnapshot) {
        self.tx.send_replace(Some(snapshot));
    }

    /// Returns the current snapshot, if one has been received.
    #[must_use]
    pub fn current(&self) -> Option<TimerSnapshot> {
        *self.tx.borrow()
    }

    /// Projected display seconds at `now`, if a snapshot has been received.
    #[must_use]
    pub fn display(&self, now: DateTime<Utc>) -> Option<u64> {
        self.current().map(|snapshot| project(&snapshot, now))
    }

    /// Returns a receiver that observes every replacement.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<TimerSnapshot>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 14, 9, 0, 0).unwrap()
    }

    fn running(total: u64, started_at: DateTime<Utc>) -> TimerSnapshot {
        TimerSnapshot {
            total_seconds: total,
            timer_status: TimerStatus::Running,
            timer_started_at: Some(started_at),
        }
    }

    #[test]
    fn test_running_adds_elapsed_seconds() {
        let baseline = running(100, t0());
        assert_eq!(project(&baseline, t0() + Duration::seconds(5)), 105);
    }

    #[test]
    fn test_running_floors_partial_seconds() {
        let baseline = running(100, t0());
        assert_eq!(project(&baseline, t0() + Duration::milliseconds(5999)), 105);
        assert_eq!(project(&baseline, t0() + Duration::milliseconds(999)), 100);
    }

    #[test]
    fn test_clock_behind_server_clamps_to_total() {
        let baseline = running(100, t0());
        assert_eq!(project(&baseline, t0() - Duration::seconds(30)), 100);
    }

    #[test]
    fn test_stopped_and_completed_do_not_advance() {
        for status in [TimerStatus::Stopped, TimerStatus::Completed] {
            let baseline = TimerSnapshot {
                total_seconds: 42,
                timer_status: status,
                timer_started_at: None,
            };
            assert_eq!(project(&baseline, t0() + Duration::hours(3)), 42);
        }
    }

    #[test]
    fn test_running_without_start_shows_total() {
        let baseline = TimerSnapshot {
            total_seconds: 7,
            timer_status: TimerStatus::Running,
            timer_started_at: None,
        };
        assert_eq!(project(&baseline, t0()), 7);
    }

    #[test]
    fn test_total_saturates() {
        let baseline = running(u64::MAX - 1, t0());
        assert_eq!(project(&baseline, t0() + Duration::seconds(10)), u64::MAX);
    }

    #[test]
    fn test_baseline_last_write_wins() {
        let baseline = Baseline::new();
        assert!(baseline.current().is_none());
        assert!(baseline.display(t0()).is_none());

        baseline.replace(running(100, t0()));
        baseline.replace(TimerSnapshot {
            total_seconds: 130,
            timer_status: TimerStatus::Stopped,
            timer_started_at: None,
        });

        assert_eq!(baseline.display(t0() + Duration::seconds(60)), Some(130));
    }

    #[tokio::test]
    async fn test_baseline_notifies_watchers() {
        let baseline = Baseline::new();
        let mut rx = baseline.watch();

        let writer = baseline.clone();
        tokio::spawn(async move { writer.replace(running(5, t0())) });

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().map(|s| s.total_seconds), Some(5));
    }
}
