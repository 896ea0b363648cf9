//! WorkLogix timer client.
//!
//! Keeps a live, per-second view of a task timer in sync with the WorkLogix
//! server. The server's snapshot is authoritative; the client only
//! extrapolates between re-syncs.
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for client operations
//! - [`types`]: Wire types shared with the server
//! - [`api`]: REST client for timer and task endpoints
//! - [`projector`]: Elapsed-time projection from a server baseline
//! - [`push`]: Shared push-channel connection with local fan-out
//! - [`view`]: Refresh signal and the mounted timer view

pub mod api;
pub mod config;
pub mod error;
pub mod projector;
pub mod push;
pub mod types;
pub mod view;

pub use api::{RetryPolicy, SnapshotSource, TimerClient};
pub use config::{Config, ConfigError};
pub use error::{ClientError, Result};
pub use projector::{project, Baseline};
pub use push::{PushChannel, PushMessage, PushSubscription};
pub use types::{ChangeEvent, Task, TaskStatus, TimerKey, TimerSnapshot, TimerStatus};
pub use view::{refresh_signal, RefreshReceiver, RefreshSignal, RefreshSource, TimerView};
