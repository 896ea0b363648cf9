//! Change notification channel for the WorkLogix server.
//!
//! Every mutation that makes a client's cached data stale is announced with a
//! [`ChangeEvent`]. The events carry identifiers only; clients re-fetch the
//! affected resources over REST.
//!
//! # Architecture
//!
//! - [`ChangeBroadcaster`] - fan-out hub around a tokio broadcast channel
//! - [`SubscriberFilter`] - optional per-connection criteria (`?type=&taskId=`)
//!
//! Delivery is best effort. A subscriber that falls more than the channel
//! capacity behind skips the oldest events and is expected to re-fetch.
//!
//! # Example
//!
//! ```rust
//! use chrono::NaiveDate;
//! use worklogix_server::broadcast::{ChangeBroadcaster, SubscriberFilter};
//! use worklogix_server::types::{ChangeEvent, ChangeEventType, TimerStatus};
//!
//! let broadcaster = ChangeBroadcaster::new();
//! let mut rx = broadcaster.subscribe();
//!
//! let event = ChangeEvent::TimerUpdated {
//!     task_id: "t-1".to_string(),
//!     user_id: "u-1".to_string(),
//!     date: NaiveDate::from_ymd_opt(2024, 5, 14).unwrap(),
//!     timer_status: TimerStatus::Running,
//! };
//! assert_eq!(broadcaster.broadcast(event.clone()), 1);
//! assert_eq!(rx.try_recv().unwrap(), event);
//!
//! let filter = SubscriberFilter::new()
//!     .with_event_type(ChangeEventType::TimerUpdated)
//!     .with_task_id("t-1");
//! assert!(filter.matches(&event));
//! ```

use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::{debug, trace};

use crate::types::{ChangeEvent, ChangeEventType};

/// Default channel capacity.
///
/// Subscribers further behind than this receive `RecvError::Lagged`.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Fan-out hub delivering [`ChangeEvent`]s to every connected subscriber.
///
/// Cheap to clone; all clones share the same channel.
#[derive(Debug, Clone)]
pub struct ChangeBroadcaster {
    sender: Sender<ChangeEvent>,
}

impl ChangeBroadcaster {
    /// Creates a broadcaster with [`DEFAULT_CHANNEL_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a broadcaster holding up to `capacity` undelivered events.
    ///
    /// A capacity of 0 is raised to 1.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        debug!(capacity, "Created change broadcaster");
        Self { sender }
    }

    /// Subscribes to events broadcast from now on.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let rx = self.sender.subscribe();
        debug!(
            subscriber_count = self.subscriber_count(),
            "New subscriber added"
        );
        rx
    }

    /// Sends `event` to all current subscribers and returns how many there
    /// were. Never blocks; with no subscribers the event is dropped.
    pub fn broadcast(&self, event: ChangeEvent) -> usize {
        trace!(
            event_type = ?event.event_type(),
            task_id = event.task_id().unwrap_or("-"),
            "Broadcasting change event"
        );

        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No active subscribers to receive event");
                0
            }
        }
    }

    /// Returns the current number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-subscriber filter. Set fields are combined with AND; unset fields
/// always match.
///
/// A task filter only matches events that name a task, so `users_updated`
/// never passes a filter with `task_id` set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberFilter {
    /// Filter by event type.
    pub event_type: Option<ChangeEventType>,

    /// Filter by task id.
    pub task_id: Option<String>,
}

impl SubscriberFilter {
    /// Creates an empty filter that matches all events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_event_type(mut self, event_type: ChangeEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    #[must_use]
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Returns `true` if `event` passes every criterion that is set.
    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if let Some(event_type) = self.event_type {
            if event.event_type() != event_type {
                return false;
            }
        }

        if let Some(ref task_id) = self.task_id {
            if event.task_id() != Some(task_id.as_str()) {
                return false;
            }
        }

        true
    }

    /// Returns `true` if no criterion is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.event_type.is_none() && self.task_id.is_none()
    }
}
