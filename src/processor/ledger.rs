//! Idempotency ledger keyed by event id.
//!
//! The inbox may redeliver. Re-applying most events is harmless, but a
//! replayed `ITEM_SPEED_CHANGED` would integrate progress twice, so the
//! processor claims each event id before applying it.
//!
//! An id is marked complete only after the event has been applied. A failed
//! event releases its claim, so a later redelivery may try again.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use crate::error::{TrackError, TrackResult};
use crate::event::EventId;

/// Result of claiming an event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// First sighting; the caller owns the event until it completes or
    /// releases it.
    Fresh,
    /// Already applied, or being applied by another worker.
    Duplicate,
}

#[derive(Debug, Default)]
struct LedgerState {
    completed: HashSet<EventId>,
    order: VecDeque<EventId>,
    in_flight: HashSet<EventId>,
}

/// Bounded record of applied and in-flight event ids.
///
/// Remembers at most `capacity` completed ids; the oldest are forgotten
/// first. A capacity of zero disables deduplication.
#[derive(Debug)]
pub struct DeliveryLedger {
    capacity: usize,
    state: Mutex<LedgerState>,
}

impl DeliveryLedger {
    /// Create a ledger remembering up to `capacity` completed ids.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Returns true if deduplication is active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    fn lock(&self) -> TrackResult<std::sync::MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| TrackError::internal("poisoned lock: delivery ledger"))
    }

    /// Claim `id` for processing.
    ///
    /// # Errors
    /// Returns `TrackError::Internal` if the ledger lock is poisoned.
    pub fn claim(&self, id: EventId) -> TrackResult<Claim> {
        if !self.is_enabled() {
            return Ok(Claim::Fresh);
        }
        let mut state = self.lock()?;
        if state.completed.contains(&id) || !state.in_flight.insert(id) {
            return Ok(Claim::Duplicate);
        }
        Ok(Claim::Fresh)
    }

    /// Mark a claimed id as applied.
    ///
    /// # Errors
    /// Returns `TrackError::Internal` if the ledger lock is poisoned.
    pub fn complete(&self, id: EventId) -> TrackResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let mut state = self.lock()?;
        state.in_flight.remove(&id);
        if state.completed.insert(id) {
            state.order.push_back(id);
        }
        while state.order.len() > self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.completed.remove(&oldest);
            }
        }
        Ok(())
    }

    /// Give up a claim without marking the id applied.
    ///
    /// # Errors
    /// Returns `TrackError::Internal` if the ledger lock is poisoned.
    pub fn release(&self, id: EventId) -> TrackResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.lock()?.in_flight.remove(&id);
        Ok(())
    }

    /// Number of completed ids currently remembered.
    #[must_use]
    pub fn remembered(&self) -> usize {
        self.state.lock().map(|s| s.completed.len()).unwrap_or(0)
    }
}
