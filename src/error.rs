//! Error types for trackgraph.
//!
//! All errors in trackgraph are strongly typed using thiserror.
//! This enables pattern matching on specific error conditions
//! and provides clear error messages.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::storage::StorageError;

/// Validation errors raised by domain transitions and input checks.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Cannot move item {item_id} from location {from} to unconnected location {to}")]
    InvalidTransition {
        item_id: String,
        from: String,
        to: String,
    },

    #[error("Precondition failed: {reason}")]
    PreconditionFailed {
        reason: String,
    },

    #[error("Stale event for {entity_id}: event time {event_time} precedes last update {last_time}")]
    StaleEvent {
        entity_id: String,
        event_time: DateTime<Utc>,
        last_time: DateTime<Utc>,
    },

    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        field: String,
        reason: String,
    },

    #[error("Location {location_id} still holds {items} positioned item(s)")]
    LocationOccupied {
        location_id: String,
        items: usize,
    },
}

impl ValidationError {
    /// Shorthand for a `PreconditionFailed` error.
    #[must_use]
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            reason: reason.into(),
        }
    }

    /// Shorthand for an `InvalidField` error.
    #[must_use]
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Top-level error type for trackgraph.
///
/// This enum encompasses all possible errors that can occur
/// while processing an event.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Queue full for {lane} (capacity {capacity})")]
    QueueFull {
        lane: String,
        capacity: usize,
    },

    #[error("Worker lane {lane} disconnected")]
    Disconnected {
        lane: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl TrackError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if a referenced entity does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(StorageError::NotFound { .. }))
    }

    /// Returns true if an entity with the same external id already exists.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::Storage(StorageError::AlreadyExists { .. }))
    }

    /// Returns true if an item was moved to a non-adjacent location.
    #[must_use]
    pub const fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            Self::Validation(ValidationError::InvalidTransition { .. })
        )
    }

    /// Returns true if a concurrent writer modified the record first.
    #[must_use]
    pub const fn is_concurrent_modification(&self) -> bool {
        matches!(
            self,
            Self::Storage(StorageError::ConcurrentModification { .. })
        )
    }

    /// Returns true if this error is retryable.
    ///
    /// Only optimistic-concurrency conflicts are; everything else would fail
    /// the same way on a second attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.is_concurrent_modification()
    }
}

/// Result type alias for trackgraph operations.
pub type TrackResult<T> = Result<T, TrackError>;
