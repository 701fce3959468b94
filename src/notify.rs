//! Position-change notifications.
//!
//! The processor informs a [`ChangeNotifier`] after an item's position has
//! been committed. Notification is best effort: it must never block or fail
//! event processing, so implementations swallow delivery problems and count
//! them instead.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

/// Receives committed position changes.
pub trait ChangeNotifier: Send + Sync {
    /// `location_id` is `None` when the item no longer has a position.
    fn notify_position_changed(&self, item_id: &str, location_id: Option<&str>);
}

/// A committed position change, as delivered to channel subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    /// The item that moved.
    pub item_id: String,
    /// Its new location, if any.
    pub location_id: Option<String>,
    /// When the notification was produced.
    pub notified_at: DateTime<Utc>,
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify_position_changed(&self, _item_id: &str, _location_id: Option<&str>) {}
}

/// Forwards notifications to a bounded channel using non-blocking
/// `try_send`. Updates that do not fit, or that have no receiver, are
/// dropped and counted.
#[derive(Debug)]
pub struct ChannelNotifier {
    tx: Sender<PositionUpdate>,
    dropped: AtomicU64,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end of its channel.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Receiver<PositionUpdate>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Updates that could not be delivered.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ChangeNotifier for ChannelNotifier {
    fn notify_position_changed(&self, item_id: &str, location_id: Option<&str>) {
        let update = PositionUpdate {
            item_id: item_id.to_string(),
            location_id: location_id.map(str::to_string),
            notified_at: Utc::now(),
        };
        match self.tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(update)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(item_id = %update.item_id, "notification queue full, update dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
