//! Single-instance guard.
//!
//! An exclusive advisory lock on a file in the app data dir. The OS drops the
//! lock when the process exits, so a crash never leaves a stale lock behind.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("Another instance is already running")]
    AlreadyRunning,

    #[error("Cannot open instance lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Default lock location.
pub fn lock_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("send-to-crm")
        .join("instance.lock")
}

/// Held for the lifetime of the process.
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self, InstanceError> {
        let io_err = |source| InstanceError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(io_err)?;

        match file.try_lock() {
            Ok(()) => {
                log::info!("[APP] Acquired instance lock {}", path.display());
                Ok(Self { _file: file })
            }
            Err(TryLockError::WouldBlock) => Err(InstanceError::AlreadyRunning),
            Err(TryLockError::Error(e)) => Err(io_err(e)),
        }
    }
}
