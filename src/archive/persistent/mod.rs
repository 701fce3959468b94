//! Durable event journal.
//!
//! Provides an [`EventArchive`](crate::archive::EventArchive) that survives
//! restarts:
//! - Append-only log of CRC32-checked, length-prefixed JSON frames
//! - File locking for single-process access
//! - Recovery from a partial trailing frame on open
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              JournalArchive              │
//! ├──────────────────────────────────────────┤
//! │  codec (frames)  ──►  events.journal     │
//! │                          │               │
//! │               ArchiveLock (.lock)        │
//! └──────────────────────────────────────────┘
//! ```

mod codec;
mod journal;
mod lock;

pub use journal::{read_journal, JournalArchive, JOURNAL_FILE};
pub use lock::ArchiveLock;

use std::path::Path;

use crate::archive::ArchiveError;

/// Configuration for the on-disk journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalConfig {
    /// Whether to fsync after every append (slower but safer).
    pub sync_on_write: bool,
    /// Largest encoded event accepted, in bytes.
    pub max_frame_bytes: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            max_frame_bytes: 1024 * 1024, // 1 MiB
        }
    }
}

impl JournalConfig {
    const MIN_FRAME_BYTES: usize = 256;

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ArchiveError::Backend` if `max_frame_bytes` is outside
    /// the supported range.
    pub fn validate(self) -> Result<Self, ArchiveError> {
        if !(Self::MIN_FRAME_BYTES..=codec::MAX_FRAME_BYTES).contains(&self.max_frame_bytes) {
            return Err(ArchiveError::Backend(format!(
                "max_frame_bytes must be between {} and {} (got {})",
                Self::MIN_FRAME_BYTES,
                codec::MAX_FRAME_BYTES,
                self.max_frame_bytes
            )));
        }
        Ok(self)
    }
}

/// Open or create a journal in `dir`.
///
/// # Errors
/// - If the configuration is invalid
/// - If the directory cannot be created or another process holds the lock
/// - If the existing journal is corrupted
///
/// # Example
/// ```rust,ignore
/// use trackgraph::archive::persistent::open_journal;
///
/// let journal = open_journal("./events", None)?;
/// ```
pub fn open_journal(
    dir: impl AsRef<Path>,
    config: Option<JournalConfig>,
) -> Result<JournalArchive, ArchiveError> {
    let cfg = config.unwrap_or_default().validate()?;
    JournalArchive::open(dir.as_ref(), cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(JournalConfig::default().validate().is_ok());
        let tiny = JournalConfig {
            max_frame_bytes: 8,
            ..JournalConfig::default()
        };
        assert!(tiny.validate().is_err());
    }
}
