//! Live fan-out of captured requests to per-jar observers

mod registry;

use serde::{Deserialize, Serialize};

pub use registry::{Subscription, SubscriptionRegistry};

/// Default per-subscriber buffer (in requests)
pub const DEFAULT_BUFFER_SIZE: usize = 64;

/// What broadcast does when a subscriber's buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Unregister the slow subscriber; its stream drains and ends
    #[default]
    Disconnect,
    /// Skip this delivery for the slow subscriber only
    DropNewest,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that accepted the request
    pub delivered: usize,
    /// Deliveries skipped because a buffer was full
    pub dropped: usize,
    /// Subscribers removed (slow, or receiver already gone)
    pub disconnected: usize,
}

impl BroadcastReport {
    /// Number of subscribers offered the request
    #[must_use]
    pub fn offered(&self) -> usize {
        self.delivered + self.dropped + self.disconnected
    }
}
