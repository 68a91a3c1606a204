//! Advisory lock files guarding the shared resources listed in the
//! concurrency model: `server.lock`, `backup.lock`, `wal-sync.lock`,
//! `receive-wal.lock`. Presence of an OS-level exclusive lock on the
//! file, not presence of the file itself, is what "held" means — the
//! file is left behind (containing the last holder's pid) after a clean
//! release, and a stale leftover never blocks a fresh acquisition.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use barman_core::{Error, Result};
use fs2::FileExt;

/// A held advisory lock. Dropping it releases the OS lock; the file
/// itself is left on disk for the next holder to reuse.
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Attempts to acquire `path` non-blockingly. On success the current
    /// pid is written into the file. On failure, returns
    /// `Error::LockBusy` carrying whatever pid is recorded in the file
    /// (0 if unreadable — still busy, just with an unknown holder).
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let mut file = file;
                file.set_len(0)?;
                write!(file, "{}", std::process::id())?;
                file.sync_all()?;
                Ok(LockGuard {
                    file,
                    path: path.to_path_buf(),
                })
            }
            Err(_) => {
                let mut holder = String::new();
                let mut reread = File::open(path)?;
                let _ = reread.read_to_string(&mut holder);
                let pid = holder.trim().parse().unwrap_or(0);
                Err(Error::LockBusy {
                    path: path.to_path_buf(),
                    pid,
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Lock file names, relative to a server's lock directory.
pub fn server_lock_path(lock_directory: &Path) -> PathBuf {
    lock_directory.join(".server.lock")
}

pub fn backup_lock_path(lock_directory: &Path, backup_id: &str) -> PathBuf {
    lock_directory.join(format!(".{}-backup.lock", backup_id))
}

pub fn wal_sync_lock_path(lock_directory: &Path) -> PathBuf {
    lock_directory.join(".wal-sync.lock")
}

pub fn receive_wal_lock_path(lock_directory: &Path) -> PathBuf {
    lock_directory.join(".receive-wal.lock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquisition_is_refused_while_held() {
        let dir = tempdir().unwrap();
        let path = server_lock_path(dir.path());
        let _first = LockGuard::acquire(&path).unwrap();
        let err = LockGuard::acquire(&path).unwrap_err();
        assert!(matches!(err, Error::LockBusy { .. }));
    }

    #[test]
    fn lock_is_reacquirable_after_guard_is_dropped() {
        let dir = tempdir().unwrap();
        let path = server_lock_path(dir.path());
        {
            let _first = LockGuard::acquire(&path).unwrap();
        }
        let second = LockGuard::acquire(&path);
        assert!(second.is_ok());
    }

    #[test]
    fn busy_error_carries_holders_pid() {
        let dir = tempdir().unwrap();
        let path = server_lock_path(dir.path());
        let _first = LockGuard::acquire(&path).unwrap();
        let err = LockGuard::acquire(&path).unwrap_err();
        match err {
            Error::LockBusy { pid, .. } => assert_eq!(pid, std::process::id()),
            _ => panic!("expected LockBusy"),
        }
    }
}
