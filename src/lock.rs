//! Advisory non-blocking exclusive file lock guarding a single concurrent
//! run, plus a probe the admin API uses to reject writes while a run holds
//! it. Grounded on the pack's daemon-lifecycle example's `fs2`-based
//! lock-file-as-pidfile pattern.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock already held")]
    AlreadyLocked,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An acquired lock. Dropping it releases the OS lock and closes the file;
/// the lock file itself is left on disk (its presence is not meaningful,
/// only its lock state is).
pub struct Lock {
    file: File,
    path: PathBuf,
}

impl Lock {
    /// Open `path`, take a non-blocking exclusive advisory lock, and (if
    /// `payload` is non-empty) truncate the file and write it — conventionally
    /// `pid=<N>\n`.
    pub fn acquire(path: impl AsRef<Path>, payload: &[u8]) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(LockError::AlreadyLocked)
            }
            Err(e) => return Err(e.into()),
        }

        if !payload.is_empty() {
            file.set_len(0)?;
            use std::io::Seek;
            file.seek(std::io::SeekFrom::Start(0))?;
            file.write_all(payload)?;
            file.sync_all()?;
        }

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock and close the file handle. Equivalent to dropping
    /// the `Lock`, spelled out for callers that want the release to be
    /// explicit at the call site.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Attempts the same non-blocking lock on a scratch handle and reports
/// whether it was denied. Never holds the lock itself.
pub fn is_locked(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    let file = match OpenOptions::new().read(true).write(true).create(true).open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
        Err(_) => false,
    }
}
