//! Append-only on-disk event journal.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::archive::{ArchiveError, EventArchive};
use crate::event::DomainEvent;

use super::codec;
use super::lock::ArchiveLock;
use super::JournalConfig;

/// File name of the journal inside its directory.
pub const JOURNAL_FILE: &str = "events.journal";

/// Result of scanning a journal file.
struct Scan {
    events: Vec<DomainEvent>,
    /// Byte offset just past the last intact frame.
    valid_len: u64,
    /// Whether the file ends in a partial frame.
    truncated: bool,
}

fn scan(path: &Path) -> Result<Scan, ArchiveError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader).map_err(|e| ArchiveError::Corrupted {
        offset: 0,
        reason: e.to_string(),
    })?;

    let mut events = Vec::new();
    let mut valid_len = codec::HEADER_LEN;
    loop {
        match codec::decode_frame::<DomainEvent>(&mut reader) {
            Ok(Some(event)) => {
                valid_len = reader.stream_position()?;
                events.push(event);
            }
            Ok(None) => {
                return Ok(Scan {
                    events,
                    valid_len,
                    truncated: false,
                })
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Ok(Scan {
                    events,
                    valid_len,
                    truncated: true,
                })
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(ArchiveError::Corrupted {
                    offset: valid_len,
                    reason: e.to_string(),
                })
            }
            Err(e) => return Err(ArchiveError::Io(e)),
        }
    }
}

/// Reads every event in the journal under `dir`, in append order.
///
/// A partial frame at the end of the file (a crash mid-append) is ignored.
///
/// # Errors
/// - `ArchiveError::Io` if the journal cannot be opened
/// - `ArchiveError::Corrupted` on a bad header or a checksum mismatch before
///   the tail
pub fn read_journal(dir: &Path) -> Result<Vec<DomainEvent>, ArchiveError> {
    let path = dir.join(JOURNAL_FILE);
    let scan = scan(&path)?;
    if scan.truncated {
        warn!(path = %path.display(), valid_len = scan.valid_len, "journal ends in a partial frame");
    }
    Ok(scan.events)
}

/// An [`EventArchive`] backed by a CRC-framed append-only file.
///
/// Holds an exclusive lock on its directory while open.
#[derive(Debug)]
pub struct JournalArchive {
    dir: PathBuf,
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    recorded: AtomicU64,
    config: JournalConfig,
    _lock: ArchiveLock,
}

impl JournalArchive {
    /// Opens (or creates) the journal in `dir`.
    ///
    /// An existing journal is scanned; a partial trailing frame left by a
    /// crash is cut off so new frames append to an intact file.
    ///
    /// # Errors
    /// - `ArchiveError::Locked` if another handle has the directory open
    /// - `ArchiveError::Corrupted` if the existing journal is damaged
    /// - `ArchiveError::Io` on filesystem errors
    pub fn open(dir: &Path, config: JournalConfig) -> Result<Self, ArchiveError> {
        std::fs::create_dir_all(dir)?;
        let lock = ArchiveLock::acquire(dir)?;
        let path = dir.join(JOURNAL_FILE);

        let existing = path.exists() && std::fs::metadata(&path)?.len() > 0;
        let recorded = if existing {
            let scan = scan(&path)?;
            if scan.truncated {
                warn!(
                    path = %path.display(),
                    valid_len = scan.valid_len,
                    "truncating partial frame left by an interrupted append"
                );
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(scan.valid_len)?;
                file.sync_all()?;
            }
            scan.events.len() as u64
        } else {
            let mut file = File::create(&path)?;
            codec::write_header(&mut file)?;
            if config.sync_on_write {
                file.sync_all()?;
            }
            0
        };

        let file = OpenOptions::new().append(true).open(&path)?;
        debug!(path = %path.display(), recorded, "journal opened");

        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            writer: Mutex::new(BufWriter::new(file)),
            recorded: AtomicU64::new(recorded),
            config,
            _lock: lock,
        })
    }

    /// Directory holding the journal.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events in the journal, including those recorded by earlier processes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.recorded.load(Ordering::Acquire)
    }

    /// Returns true if the journal holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads back every event in append order.
    ///
    /// # Errors
    /// See [`read_journal`].
    pub fn read_all(&self) -> Result<Vec<DomainEvent>, ArchiveError> {
        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| ArchiveError::Backend("poisoned lock: journal writer".to_string()))?;
            writer.flush()?;
        }
        read_journal(&self.dir)
    }

    /// Current file size in bytes.
    ///
    /// # Errors
    /// Returns `ArchiveError::Io` if the file metadata cannot be read.
    pub fn size_bytes(&self) -> Result<u64, ArchiveError> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

impl EventArchive for JournalArchive {
    fn record(&self, event: &DomainEvent) -> Result<(), ArchiveError> {
        let frame = codec::encode_frame(event, self.config.max_frame_bytes)
            .map_err(|e| ArchiveError::Encode(e.to_string()))?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| ArchiveError::Backend("poisoned lock: journal writer".to_string()))?;
        writer.write_all(&frame)?;
        writer.flush()?;
        if self.config.sync_on_write {
            writer.get_ref().sync_data()?;
        }

        self.recorded.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config() -> JournalConfig {
        JournalConfig {
            sync_on_write: false,
            ..JournalConfig::default()
        }
    }

    #[test]
    fn test_record_and_read_back() {
        let dir = tempdir().unwrap();
        let journal = JournalArchive::open(dir.path(), config()).unwrap();
        assert!(journal.is_empty());

        let a = DomainEvent::item_created("I1", "crate", 1.0);
        let b = DomainEvent::item_position_changed("I1", "L1");
        journal.record(&a).unwrap();
        journal.record(&b).unwrap();

        assert_eq!(journal.len(), 2);
        assert_eq!(journal.read_all().unwrap(), vec![a, b]);
    }

    #[test]
    fn test_reopen_continues_appending() {
        let dir = tempdir().unwrap();
        let first = DomainEvent::location_activated("L1");
        {
            let journal = JournalArchive::open(dir.path(), config()).unwrap();
            journal.record(&first).unwrap();
        }

        let journal = JournalArchive::open(dir.path(), config()).unwrap();
        assert_eq!(journal.len(), 1);
        let second = DomainEvent::location_deactivated("L1");
        journal.record(&second).unwrap();
        assert_eq!(journal.read_all().unwrap(), vec![first, second]);
    }

    #[test]
    fn test_open_is_exclusive() {
        let dir = tempdir().unwrap();
        let _journal = JournalArchive::open(dir.path(), config()).unwrap();
        let err = JournalArchive::open(dir.path(), config()).unwrap_err();
        assert!(matches!(err, ArchiveError::Locked { .. }));
    }

    #[test]
    fn test_oversized_event_is_an_encode_error() {
        let dir = tempdir().unwrap();
        let journal = JournalArchive::open(
            dir.path(),
            JournalConfig {
                sync_on_write: false,
                max_frame_bytes: 16,
            },
        )
        .unwrap();
        let err = journal
            .record(&DomainEvent::item_created("I1", "a long enough name", 1.0))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Encode(_)));
        assert!(journal.is_empty());
    }

    #[test]
    fn test_bad_header_is_corruption() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(JOURNAL_FILE), b"NOPE!").unwrap();
        let err = read_journal(dir.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::Corrupted { offset: 0, .. }));
    }
}
