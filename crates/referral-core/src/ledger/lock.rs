//! Cross-process exclusion for a snapshot file.
//!
//! [`super::SharedLedger`] only serializes writers inside one process. Two
//! processes that each load, change and save the same snapshot must hold a
//! [`LedgerLock`] from load to save, or the later save drops the earlier
//! one's records.

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use fd_lock::{RwLock, RwLockWriteGuard};

use super::LedgerError;

/// Advisory lock on `<snapshot>.lock`. The snapshot itself is replaced by
/// rename on every save, so it cannot carry the lock.
pub struct LedgerLock {
    path: PathBuf,
    file: RwLock<File>,
}

impl LedgerLock {
    /// Opens (creating if needed) the lock file next to `snapshot`.
    pub fn open(snapshot: &Path) -> Result<Self, LedgerError> {
        let path = lock_path(snapshot);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: RwLock::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until no other holder remains. Released when the guard drops.
    pub fn exclusive(&mut self) -> Result<RwLockWriteGuard<'_, File>, LedgerError> {
        let guard = self.file.write()?;
        tracing::debug!(lock = %self.path.display(), "ledger lock acquired");
        Ok(guard)
    }
}

fn lock_path(snapshot: &Path) -> PathBuf {
    let mut name = snapshot
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "ledger".into());
    name.push(".lock");
    snapshot.with_file_name(name)
}
