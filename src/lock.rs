use std::fs::{self, File};

use camino::{Utf8Path, Utf8PathBuf};
use fd_lock::{RwLock, RwLockWriteGuard};

use crate::error::AfDataError;
use crate::source::Source;

const LOCK_DIR: &str = ".locks";

/// Advisory lock serializing operations on one source.
///
/// Two invocations working on the same source would otherwise both observe
/// "not available" and race on the same staging area. The lock is keyed by
/// flag and version, so distinct sources and distinct versions never contend.
/// It is held through the OS file lock and released when the guard drops,
/// including when the process dies.
pub struct SourceLock {
    path: Utf8PathBuf,
    lock: RwLock<File>,
}

impl SourceLock {
    pub fn open(root: &Utf8Path, source: &Source) -> Result<Self, AfDataError> {
        let dir = root.join(LOCK_DIR);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| AfDataError::Filesystem(err.to_string()))?;
        let path = dir.join(format!("{}-{}.lock", source.name(), source.version()));
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_std_path())
            .map_err(|err| AfDataError::Filesystem(format!("open lock {path}: {err}")))?;
        Ok(Self {
            path,
            lock: RwLock::new(file),
        })
    }

    /// Blocks until no other holder works on this source.
    pub fn acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>, AfDataError> {
        let path = &self.path;
        self.lock
            .write()
            .map_err(|err| AfDataError::Filesystem(format!("lock {path}: {err}")))
    }
}
