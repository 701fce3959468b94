//! Event archive.
//!
//! The archive is the system of record for event history. The processor
//! records every event here before touching the read model. Two backends
//! are provided: an in-memory archive for tests and embedded use, and (with
//! the `persistent` feature) an append-only on-disk journal.

#[cfg(feature = "persistent")]
pub mod persistent;

use std::sync::Mutex;

use thiserror::Error;

use crate::event::DomainEvent;

#[cfg(feature = "persistent")]
pub use persistent::{
    open_journal, read_journal, ArchiveLock, JournalArchive, JournalConfig, JOURNAL_FILE,
};

/// Errors raised by an event archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode event: {0}")]
    Encode(String),

    #[error("Archive corrupted at byte {offset}: {reason}")]
    Corrupted { offset: u64, reason: String },

    #[error("Archive at {path} is locked by another process")]
    Locked { path: String },

    #[error("Archive backend error: {0}")]
    Backend(String),
}

/// Durable sink for processed events.
pub trait EventArchive: Send + Sync {
    /// Record one event. Returns once the event is durable.
    fn record(&self, event: &DomainEvent) -> Result<(), ArchiveError>;
}

/// Archive that keeps events in memory, in recording order.
#[derive(Debug, Default)]
pub struct InMemoryEventArchive {
    events: Mutex<Vec<DomainEvent>>,
}

impl InMemoryEventArchive {
    /// Create an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every recorded event.
    ///
    /// # Errors
    /// Returns `ArchiveError::Backend` if the lock is poisoned.
    pub fn events(&self) -> Result<Vec<DomainEvent>, ArchiveError> {
        let events = self
            .events
            .lock()
            .map_err(|_| ArchiveError::Backend("poisoned lock: archive".to_string()))?;
        Ok(events.clone())
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventArchive for InMemoryEventArchive {
    fn record(&self, event: &DomainEvent) -> Result<(), ArchiveError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| ArchiveError::Backend("poisoned lock: archive".to_string()))?;
        events.push(event.clone());
        Ok(())
    }
}
