//! # mathlog
//!
//! A cached math API whose operational log travels through Redis pub/sub
//! into SQLite.
//!
//! ## Architecture
//!
//! ```text
//! Client -> HTTP API -> Publisher -> Redis "logs" -> Log worker -> SQLite
//!                           |
//!                           +-> fallback file (on publish failure)
//! ```
//!
//! Delivery is at-most-once: events published while no worker is
//! subscribed are lost.
//!
//! ## Modules
//!
//! - [`event`]: The log event payload and message builder
//! - [`channel`]: Pub/sub transport (Redis, in-memory)
//! - [`publisher`]: Fire-and-forget publishing with file fallback
//! - [`store`]: SQLite log persistence and pagination
//! - [`worker`]: The subscriber that persists events
//! - [`api`]: HTTP routes, auth and failure logging

pub mod api;
pub mod cache;
pub mod channel;
pub mod config;
pub mod event;
pub mod fallback;
pub mod math;
pub mod publisher;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod worker;

// Re-export commonly used types at crate root
pub use channel::{EventChannel, MemoryChannel, RedisChannel};
pub use event::LogEvent;
pub use publisher::Publisher;
pub use store::{LogStore, SqliteLogStore};
pub use worker::LogWorker;

/// Pub/sub channel carrying log events.
pub const LOG_CHANNEL: &str = "logs";
