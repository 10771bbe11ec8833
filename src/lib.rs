//! Slack Channel Archiver Library
//!
//! This library provides tools to:
//! - Fetch channel history and threads under per-tier rate limits
//! - Merge threads into their channel in chronological order
//! - Resolve message authors into a shared user index
//! - Export channels, threads and users as JSON
//! - Retry transient API failures and expose Prometheus metrics

pub mod client;
pub mod config;
pub mod dump;
pub mod error;
pub mod export;
pub mod history;
pub mod limiter;
pub mod message;
pub mod metrics;
pub mod reference;
pub mod retry;
pub mod slack;
pub mod thread;
pub mod users;

#[cfg(test)]
mod testing;

// Re-export common types
pub use client::{Client, UserProfile, Window};
pub use config::Config;
pub use dump::{DumpOptions, Dumper};
pub use error::{ClientError, Error, Result};
pub use limiter::{Limiters, RateLimiter, Tier, TierLimit};
pub use message::{Channel, Message, Thread};
pub use reference::EntityRef;
pub use retry::RetryingClient;
pub use slack::SlackClient;

// Commands module uses re-exported types, so it must be declared after the re-exports
pub mod commands;
