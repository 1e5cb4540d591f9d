//! Message delivery over the key-value store
//!
//! Two independent mechanisms:
//!
//! - [`ReliableQueue`]: stream plus consumer groups. Delivery is
//!   at-least-once: a message stays pending for its consumer until acked,
//!   and a restarted consumer picks it up again through
//!   [`ReliableQueue::recover_unacked`].
//! - [`DelayQueue`]: a scored set used as a min-priority or time-bucketed
//!   delay queue.

pub mod message;
pub mod priority;
pub mod stream;

use std::time::Duration;

pub use message::QueueMessage;
pub use priority::DelayQueue;
pub use stream::ReliableQueue;

/// Queue behaviour knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// How long a blocking consume waits for a new entry
    pub block: Duration,
    /// Append attempts before a produce gives up
    pub produce_attempts: u32,
    /// Upper id bound when scanning a consumer's pending entries
    pub pending_scan_max: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            block: Duration::from_secs(10),
            produce_attempts: 3,
            pending_scan_max: 10_000_000_000_000,
        }
    }
}
