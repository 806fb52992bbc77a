//! Shared building blocks for famwatch
//!
//! This crate provides the platform-independent pieces every backend uses:
//! - The `ChangeEvent` model handed to user callbacks
//! - Rename correlation (cookie/inode keyed, age-swept)
//! - The bidirectional watch-token/path table
//! - The time-bucketed move ring used by the stream backend
//! - Monitor configuration and the error taxonomy

pub mod clock;
pub mod config;
pub mod correlation;
pub mod error;
pub mod event;
pub mod move_ring;
pub mod walk;
pub mod watch_table;

// Re-exports
pub use clock::Clock;
pub use config::MonitorConfig;
pub use correlation::CorrelationTable;
pub use error::{Result, WatchError};
pub use event::{ChangeEvent, EventKind};
pub use move_ring::MoveRing;
pub use watch_table::{DetachedSubtree, WatchTable};
