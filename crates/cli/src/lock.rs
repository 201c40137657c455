//! Advisory commit lock
//!
//! Cross-process exclusion through `flock(2)` on `<dir>/<name>.lock`.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Default directory for lock files
pub const DEFAULT_LOCK_DIR: &str = "/run/rcfg";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock '{name}'")]
    LockTimeout { name: String, waited: Duration },

    #[error("invalid lock name '{0}': only letters, digits, '_' and '-' are allowed")]
    InvalidLockName(String),

    #[error("lock I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, LockError>;

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A named lock; held while `is_locked()` is true
#[derive(Debug)]
pub struct Lock {
    name: String,
    path: PathBuf,
    file: Option<File>,
}

impl Lock {
    /// Lock `name` in [`DEFAULT_LOCK_DIR`]
    pub fn new(name: &str) -> Result<Self> {
        Self::in_dir(Path::new(DEFAULT_LOCK_DIR), name)
    }

    /// Lock `name` in `dir`; the name is checked before touching the filesystem
    pub fn in_dir(dir: &Path, name: &str) -> Result<Self> {
        if !valid_name(name) {
            return Err(LockError::InvalidLockName(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            path: dir.join(format!("{}.lock", name)),
            file: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_locked(&self) -> bool {
        self.file.is_some()
    }

    /// Acquire the lock, polling until `timeout` elapses
    ///
    /// A zero timeout makes a single attempt. Acquiring a lock this handle
    /// already holds succeeds immediately.
    pub fn acquire(&mut self, timeout: Duration) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let io_err = |source| LockError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let start = Instant::now();
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&self.path)
                .map_err(io_err)?;
            if try_flock_exclusive(&file).map_err(io_err)? {
                if is_current(&self.path, &file).map_err(io_err)? {
                    debug!(lock = %self.name, "lock acquired");
                    self.file = Some(file);
                    return Ok(());
                }
                // Unlinked by the previous holder after we opened it
                debug!(lock = %self.name, "lock file replaced, retrying");
                continue;
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(LockError::LockTimeout {
                    name: self.name.clone(),
                    waited,
                });
            }
            std::thread::sleep(POLL_INTERVAL.min(timeout - waited));
        }
    }

    /// Release the lock; releasing an unheld lock is a no-op
    ///
    /// The lock file is unlinked only when it can be re-locked right after
    /// the release, so a waiting process never loses its file.
    pub fn release(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        unlock(&file).map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        })?;
        if matches!(try_flock_exclusive(&file), Ok(true)) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
                }
            }
        }
        debug!(lock = %self.name, "lock released");
        Ok(())
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(lock = %self.name, error = %e, "failed to release lock");
        }
    }
}

/// Try to acquire exclusive file lock (non-blocking)
fn try_flock_exclusive(file: &File) -> std::io::Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Whether `file` is still the file linked at `path`
fn is_current(path: &Path, file: &File) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(linked) => Ok(linked.dev() == held.dev() && linked.ino() == held.ino()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn unlock(file: &File) -> std::io::Result<()> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    flock(file.as_raw_fd(), FlockArg::Unlock)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_times_out() {
        let dir = TempDir::new().unwrap();
        let mut first = Lock::in_dir(dir.path(), "commit").unwrap();
        first.acquire(Duration::ZERO).unwrap();
        assert!(first.is_locked());

        let mut second = Lock::in_dir(dir.path(), "commit").unwrap();
        let start = Instant::now();
        let err = second.acquire(Duration::from_millis(300)).unwrap_err();
        assert!(matches!(err, LockError::LockTimeout { .. }));
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(!second.is_locked());

        first.release().unwrap();
        second.acquire(Duration::ZERO).unwrap();
        assert!(second.is_locked());
    }

    #[test]
    fn test_release_is_idempotent_and_unlinks() {
        let dir = TempDir::new().unwrap();
        let mut lock = Lock::in_dir(dir.path(), "commit").unwrap();
        lock.acquire(Duration::ZERO).unwrap();
        assert!(lock.path().exists());

        lock.release().unwrap();
        assert!(!lock.path().exists());
        lock.release().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_unlinked_file_is_not_current() {
        let dir = TempDir::new().unwrap();
        let mut holder = Lock::in_dir(dir.path(), "commit").unwrap();
        holder.acquire(Duration::ZERO).unwrap();

        // A waiter that opened the file before the holder released it
        let stale = OpenOptions::new().read(true).write(true).open(holder.path()).unwrap();
        assert!(is_current(holder.path(), &stale).unwrap());
        holder.release().unwrap();
        assert!(!holder.path().exists());

        // flock on the unlinked inode succeeds but must not count
        assert!(try_flock_exclusive(&stale).unwrap());
        assert!(!is_current(holder.path(), &stale).unwrap());

        let mut next = Lock::in_dir(dir.path(), "commit").unwrap();
        next.acquire(Duration::ZERO).unwrap();
        assert!(!is_current(next.path(), &stale).unwrap());
        let mut contender = Lock::in_dir(dir.path(), "commit").unwrap();
        assert!(matches!(
            contender.acquire(Duration::ZERO),
            Err(LockError::LockTimeout { .. })
        ));
    }

    #[test]
    fn test_drop_releases() {
        let dir = TempDir::new().unwrap();
        {
            let mut lock = Lock::in_dir(dir.path(), "commit").unwrap();
            lock.acquire(Duration::ZERO).unwrap();
        }
        let mut again = Lock::in_dir(dir.path(), "commit").unwrap();
        again.acquire(Duration::ZERO).unwrap();
    }

    #[test]
    fn test_invalid_name_checked_first() {
        let missing = Path::new("/nonexistent/rcfg/locks");
        for name in ["", "../etc", "a b", "x.lock"] {
            assert!(matches!(
                Lock::in_dir(missing, name),
                Err(LockError::InvalidLockName(_))
            ));
        }
        assert!(Lock::in_dir(missing, "config_commit-1").is_ok());
    }
}
