//! Orchestrates the executor, the catalog, and retention: the two
//! server-lock-serialized entry points (`backup`, `delete`), the cron
//! operations (`archive_wal`, `check_backup`, `cron_retention`), and the
//! advisory lock files and hook-script plumbing they all share.
//!
//! Nothing in this crate decides transport or coordination policy on its
//! own — that lives in `barman-executor` — but it is the one place that
//! knows how those pieces fit together into the backup manager's state
//! machine.

mod archive_wal;
mod backup_manager;
mod check;
mod hooks;
mod lock;

pub use archive_wal::{archive_wal, ArchiveOutcome, Archiver, FileDropArchiver, StreamingArchiver};
pub use backup_manager::{backup, cron_retention, delete};
pub use check::check_backup;
pub use lock::{
    backup_lock_path, receive_wal_lock_path, server_lock_path, wal_sync_lock_path, LockGuard,
};
