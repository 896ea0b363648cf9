//! WorkLogix Server - Task timer service and change notification hub.
//!
//! This crate provides the server side of the WorkLogix task timer:
//! - Per task, per user, per day timer logs with start/pause/complete
//! - Task status synchronization when a timer is completed
//! - A WebSocket channel telling connected clients what to re-fetch
//!
//! # Architecture
//!
//! Time is accumulated on the server clock only. Clients read the
//! authoritative snapshot over REST and project the running value locally;
//! change events carry identifiers, never state.

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod routes;
pub mod service;
pub mod store;
pub mod synchronizer;
pub mod tasks;
pub mod timer;
pub mod types;
