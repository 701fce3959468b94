//! Exclusive directory lock for the journal.
//!
//! One process may write a journal directory at a time. The lock is an
//! advisory OS lock on `<dir>/.lock`, released when the `ArchiveLock` (and
//! with it the file handle) is dropped.

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};

use crate::archive::ArchiveError;

/// Held for as long as a `JournalArchive` is open.
#[derive(Debug)]
pub struct ArchiveLock {
    _file: File,
    path: PathBuf,
}

impl ArchiveLock {
    /// Acquire the lock on `dir`, failing immediately if it is held.
    ///
    /// # Errors
    /// - `ArchiveError::Locked` if another handle holds the lock
    /// - `ArchiveError::Io` if the lock file cannot be opened
    pub fn acquire(dir: &Path) -> Result<Self, ArchiveError> {
        let lock_path = dir.join(".lock");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        match Self::try_lock(&file) {
            Ok(()) => Ok(Self {
                _file: file,
                path: lock_path,
            }),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(ArchiveError::Locked {
                path: dir.display().to_string(),
            }),
            Err(e) => Err(ArchiveError::Io(e)),
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> IoResult<()> {
        use std::os::unix::io::AsRawFd;

        let fd = file.as_raw_fd();
        // SAFETY: `fd` is a valid open descriptor owned by `file` for the
        // duration of the call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let errno = IoError::last_os_error();
            if errno.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(IoError::new(ErrorKind::WouldBlock, "journal is locked"));
            }
            return Err(errno);
        }
        Ok(())
    }

    #[cfg(windows)]
    fn try_lock(file: &File) -> IoResult<()> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
        };

        let handle = file.as_raw_handle() as HANDLE;
        // SAFETY: `handle` belongs to `file`; OVERLAPPED is plain data and
        // valid when zeroed.
        let result = unsafe {
            let mut overlapped = std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>();
            LockFileEx(
                handle,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                1,
                0,
                &mut overlapped,
            )
        };
        if result == 0 {
            let err = IoError::last_os_error();
            return Err(IoError::new(ErrorKind::WouldBlock, format!("journal is locked: {err}")));
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File) -> IoResult<()> {
        Err(IoError::new(
            ErrorKind::Unsupported,
            "file locking not supported on this platform",
        ))
    }
}
