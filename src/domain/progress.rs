//! Traversal progress of an item along its current location.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How far an item has advanced along its current location, and when that
/// was last computed.
///
/// `progress` accumulates `elapsed_ms * speed / length` over each interval
/// between speed changes. It restarts at zero whenever the item moves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Accumulated progress on the current location.
    pub progress: f64,
    /// Timestamp of the last speed or position update.
    pub datetime: DateTime<Utc>,
}

impl ProgressInfo {
    /// Creates a progress record.
    #[must_use]
    pub const fn new(progress: f64, datetime: DateTime<Utc>) -> Self {
        Self { progress, datetime }
    }

    /// Progress at the start of a location.
    #[must_use]
    pub const fn start(datetime: DateTime<Utc>) -> Self {
        Self::new(0.0, datetime)
    }
}
