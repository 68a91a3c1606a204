//! The error taxonomy shared by every barman crate.
//!
//! Every fallible operation in the catalog, retention, copy and engine
//! layers returns [`Result<T>`], an alias over [`Error`]. The variants are
//! tagged by failure class rather than by originating module so that
//! callers (the CLI, the cron scheduler, hook scripts) can match on *what
//! kind of thing went wrong* without needing to know which crate raised it.
//!
//! [`Error::SyncNothingToDo`] and [`Error::SyncToBeDeleted`] are control
//! signals, not failures: the sync engine uses them to short-circuit a
//! comparison without allocating a side channel. Treat them as `Ok`-ish
//! outcomes when matching.

use std::path::PathBuf;

/// Result alias used throughout the barman workspace.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The unified error type for catalog, retention, copy and engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration value was missing, malformed, or contradictory.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// An advisory lock file is already held by another process.
    #[error("lock {path} is already held by pid {pid}")]
    LockBusy { path: PathBuf, pid: u32 },

    /// An external command (hook script, compressor, remote copy tool)
    /// exited with a non-zero status.
    #[error("command `{command}` failed with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    /// A bulk or single-file copy failed partway through.
    #[error("data transfer failure copying {item}: {reason}")]
    DataTransferFailure { item: String, reason: String },

    /// A backup id was referenced that does not exist in the catalog.
    #[error("unknown backup id: {0}")]
    UnknownBackup(String),

    /// A string that should have been a 24-hex-character WAL segment name
    /// (or one of the recognised special file names) did not parse.
    #[error("'{0}' is not a valid WAL segment name")]
    BadSegmentName(String),

    /// A `backup.info` or `xlog.db` line failed to parse.
    #[error("{path}: invalid line '{line}': {reason}")]
    CatalogParse {
        path: PathBuf,
        line: String,
        reason: String,
    },

    /// The sync engine encountered a condition it cannot reconcile.
    #[error("sync error: {0}")]
    SyncError(String),

    /// Control signal: the compared resource is already up to date on the
    /// passive node. Not a failure.
    #[error("nothing to do")]
    SyncNothingToDo,

    /// Control signal: the resource exists on the passive node but has been
    /// retired on the primary and should be removed. Not a failure.
    #[error("resource is obsolete and should be deleted")]
    SyncToBeDeleted,

    /// The requested compression algorithm does not match what the catalog
    /// already recorded for a resource (e.g. a WAL segment compressed with
    /// a different codec than the one currently configured).
    #[error("compression incompatibility: expected {expected}, found {found}")]
    CompressionIncompatibility { expected: String, found: String },

    /// An exclusive-mode backup was attempted against a server that is
    /// itself a standby (`pg_is_in_recovery() = true`).
    #[error("cannot start an exclusive backup: the database is in recovery")]
    DatabaseInRecovery,

    /// A pre/post-retry hook script returned the abort-and-stop contract
    /// exit code.
    #[error("hook script aborted the operation: {0}")]
    AbortedRetryHookScript(String),

    /// An unrecoverable condition that should stop the current operation
    /// entirely rather than being retried or reported per-item.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Transparent wrapper for I/O failures bubbled up from `std::fs`/`std::io`.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the two control-signal variants that callers should treat
    /// as a successful no-op rather than propagate as a hard failure.
    pub fn is_control_signal(&self) -> bool {
        matches!(self, Error::SyncNothingToDo | Error::SyncToBeDeleted)
    }
}
