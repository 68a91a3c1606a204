//! Domain primitives shared by every barman crate: the error taxonomy,
//! WAL segment name grammar, LSN arithmetic, tablespace descriptors,
//! lifecycle/retention status enums and the resolved server configuration
//! shape.
//!
//! Nothing in this crate touches the filesystem or spawns a process; it is
//! the vocabulary the catalog, retention, copy and engine crates build on.

mod config;
mod error;
mod lsn;
mod segment;
mod status;
mod tablespace;

pub use config::{
    BackupCoordination, BackupTransport, HookScripts, ReuseBackupMode, ServerConfig,
};
pub use error::{Error, Result};
pub use lsn::Lsn;
pub use segment::{
    generate_range, hash_dir, is_any_xlog_file, is_backup_file, is_history_file, is_wal_file,
    SegmentName, DEFAULT_XLOG_SEG_SIZE,
};
pub use status::{BackupStatus, RetentionStatus};
pub use tablespace::Tablespace;
