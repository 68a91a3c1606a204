//! The on-disk-truth-backed backup catalog, the WAL journal, and pure
//! retention classification over both.
//!
//! Nothing in this crate spawns a process or talks to a database; it only
//! reads and writes the text files under a server's `barman_home`
//! (`backup.info` per backup, `xlog.db` for the WAL journal) and computes
//! retention classifications over what it finds. The executor and manager
//! crates are the ones that decide *when* to call into here.

mod atomic;
mod backup;
mod catalog;
mod retention;
mod wal;

pub use atomic::{fsync_dir, write_atomic};
pub use backup::Backup;
pub use catalog::BackupCatalog;
pub use retention::{evaluate, RetentionPolicy, RetentionReport};
pub use wal::{WalCatalog, WalRecord};
