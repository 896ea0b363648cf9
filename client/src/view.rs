//! Live timer view and its refresh pipeline.
//!
//! A mounted [`TimerView`] runs three tasks:
//!
//! - a poller that raises the [`RefreshSignal`] every poll interval,
//! - a push listener that raises the same signal when a change event
//!   concerns the view's task,
//! - a single handler that re-fetches the snapshot and replaces the
//!   [`Baseline`].
//!
//! The signal holds at most one pending refresh, so a burst of ticks and
//! events collapses into one re-fetch. Dropping the view aborts all three
//! tasks and releases the push subscription.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::SnapshotSource;
use crate::error::ClientError;
use crate::projector::Baseline;
use crate::push::{PushMessage, PushSubscription};
use crate::types::{TimerKey, TimerSnapshot, TimerStatus};

/// What caused a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSource {
    Poll,
    Push,
    Manual,
}

/// Raising side of the refresh signal.
#[derive(Debug, Clone)]
pub struct RefreshSignal {
    tx: mpsc::Sender<RefreshSource>,
}

/// Consuming side of the refresh signal.
#[derive(Debug)]
pub struct RefreshReceiver {
    rx: mpsc::Receiver<RefreshSource>,
}

/// Creates a coalescing refresh signal.
#[must_use]
pub fn refresh_signal() -> (RefreshSignal, RefreshReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (RefreshSignal { tx }, RefreshReceiver { rx })
}

impl RefreshSignal {
    /// Requests a refresh.
    ///
    /// Returns `false` only when the receiver is gone. A request made while
    /// one is already pending is merged into it.
    pub fn raise(&self, source: RefreshSource) -> bool {
        match self.tx.try_send(source) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

impl RefreshReceiver {
    /// Waits for the next pending refresh.
    pub async fn recv(&mut self) -> Option<RefreshSource> {
        self.rx.recv().await
    }
}

/// A mounted live view of one timer.
#[derive(Debug)]
pub struct TimerView {
    key: TimerKey,
    baseline: Baseline,
    signal: RefreshSignal,
    fetches: Arc<AtomicU64>,
    tasks: Vec<JoinHandle<()>>,
}

impl TimerView {
    /// Mounts a view for `key`.
    ///
    /// The first poll tick fires immediately, so a baseline is requested
    /// straight away. `push` is optional; without it the view relies on
    /// polling alone.
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount(
        key: TimerKey,
        source: Arc<dyn SnapshotSource>,
        push: Option<PushSubscription>,
        poll_interval: Duration,
    ) -> Self {
        let baseline = Baseline::new();
        let fetches = Arc::new(AtomicU64::new(0));
        let (signal, receiver) = refresh_signal();

        let mut tasks = vec![
            tokio::spawn(run_handler(
                key.clone(),
                source,
                baseline.clone(),
                Arc::clone(&fetches),
                receiver,
            )),
            tokio::spawn(run_poller(signal.clone(), poll_interval)),
        ];
        if let Some(subscription) = push {
            tasks.push(tokio::spawn(run_listener(
                key.task_id.clone(),
                subscription,
                signal.clone(),
            )));
        }

        info!(key = %key, poll_ms = poll_interval.as_millis() as u64, "Timer view mounted");

        Self {
            key,
            baseline,
            signal,
            fetches,
            tasks,
        }
    }

    /// The timer this view shows.
    #[must_use]
    pub fn key(&self) -> &TimerKey {
        &self.key
    }

    /// The latest server snapshot.
    #[must_use]
    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    /// The latest server snapshot, if any has arrived.
    #[must_use]
    pub fn snapshot(&self) -> Option<TimerSnapshot> {
        self.baseline.current()
    }

    /// Seconds to display at `now`.
    #[must_use]
    pub fn display(&self, now: DateTime<Utc>) -> Option<u64> {
        self.baseline.display(now)
    }

    /// Requests an immediate re-fetch, e.g. after a local mutation.
    pub fn refresh(&self) {
        self.signal.raise(RefreshSource::Manual);
    }

    /// Number of re-fetches performed so far.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl Drop for TimerView {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        debug!(key = %self.key, "Timer view unmounted");
    }
}

async fn run_poller(signal: RefreshSignal, poll_interval: Duration) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !signal.raise(RefreshSource::Poll) {
            break;
        }
    }
}

async fn run_listener(task_id: String, mut subscription: PushSubscription, signal: RefreshSignal) {
    while let Some(message) = subscription.recv().await {
        let relevant = match &message {
            PushMessage::Event(event) => event.affects_task(&task_id),
            PushMessage::Missed(count) => {
                warn!(missed = count, "Push subscriber lagged, refreshing");
                true
            }
        };
        if relevant && !signal.raise(RefreshSource::Push) {
            break;
        }
    }
}

async fn run_handler(
    key: TimerKey,
    source: Arc<dyn SnapshotSource>,
    baseline: Baseline,
    fetches: Arc<AtomicU64>,
    mut receiver: RefreshReceiver,
) {
    while let Some(trigger) = receiver.recv().await {
        fetches.fetch_add(1, Ordering::Relaxed);
        match source.fetch(&key).await {
            Ok(snapshot) => {
                debug!(
                    key = %key,
                    ?trigger,
                    total_seconds = snapshot.total_seconds,
                    status = %snapshot.timer_status,
                    "Baseline refreshed"
                );
                baseline.replace(snapshot);
            }
            Err(ClientError::NotFound(_)) => {
                // Never started: nothing accumulated yet.
                baseline.replace(TimerSnapshot {
                    total_seconds: 0,
                    timer_status: TimerStatus::Stopped,
                    timer_started_at: None,
                });
            }
            Err(e) => {
                debug!(key = %key, ?trigger, error = %e, "Refresh failed, keeping previous baseline");
            }
        }
    }
}
