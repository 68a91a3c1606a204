//! The database-facing port the executor talks through.
//!
//! `DatabaseClient` is an opaque external capability: a real
//! implementation opens a libpq connection (or shells
//! out to `psql`) and is deliberately not built here. Tests in this crate
//! and the manager crate drive the executor against a stub.

use async_trait::async_trait;
use barman_core::{Lsn, Result, Tablespace};
use std::path::PathBuf;

/// A snapshot of the facts `startBackup` needs from the running database,
/// gathered before the start-of-backup request is issued.
#[derive(Debug, Clone)]
pub struct DatabaseProbe {
    pub version: u32,
    pub systemid: Option<String>,
    pub pgdata: PathBuf,
    pub tablespaces: Vec<Tablespace>,
    pub config_file: PathBuf,
    pub hba_file: PathBuf,
    pub ident_file: PathBuf,
    pub xlog_segment_size: u64,
}

/// What a start/stop backup request handed back.
///
/// `Lsn` carries a raw position that must be resolved to a segment name
/// using the timeline (when the database supplied one); `Explicit` is
/// already resolved and is trusted as-is.
#[derive(Debug, Clone)]
pub enum BackupEndpointResponse {
    Lsn { lsn: Lsn, timeline: Option<u32> },
    Explicit { wal_file: String, offset: u64 },
}

/// The concurrent-backup stop response additionally carries the backup
/// label blob the database generated, which the coordinator writes to
/// disk inside the destination data directory.
#[derive(Debug, Clone)]
pub struct ConcurrentStopResponse {
    pub end: BackupEndpointResponse,
    pub backup_label: String,
}

#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn probe(&self) -> Result<DatabaseProbe>;
    async fn is_in_recovery(&self) -> Result<bool>;

    /// True if the server-side helper extension required by the
    /// concurrent-backup fallback path (older database versions with no
    /// native concurrent-backup API) is installed.
    async fn has_backup_helper_extension(&self) -> Result<bool>;

    /// True if this database version exposes the native concurrent-backup
    /// API and does not need the helper extension at all.
    async fn has_native_concurrent_backup(&self) -> Result<bool>;

    async fn start_exclusive_backup(&self, label: &str) -> Result<BackupEndpointResponse>;
    async fn stop_exclusive_backup(&self) -> Result<BackupEndpointResponse>;

    async fn start_concurrent_backup(&self, label: &str) -> Result<BackupEndpointResponse>;
    async fn stop_concurrent_backup(&self) -> Result<ConcurrentStopResponse>;

    /// Requests a WAL segment switch so the backup's end-of-backup segment
    /// is archived promptly. Callers must not invoke this while the server
    /// is in recovery; prefer the coordinator, which checks first.
    async fn switch_wal(&self) -> Result<()>;

    /// Runs the database's native streaming base-backup protocol,
    /// writing the result under `destination`. Used only by the
    /// `DatabaseStreaming` transport; returns the number of bytes
    /// received.
    async fn stream_base_backup(
        &self,
        destination: &std::path::Path,
        bandwidth_limit: Option<u64>,
    ) -> Result<u64>;

    /// Whether the streaming backup tool this client shells out to
    /// supports a bandwidth-limit flag at all.
    async fn supports_streaming_bandwidth_limit(&self) -> Result<bool>;

    /// Requests a named restore point (`barman_<backup_id>`) be recorded
    /// at the current database position, once a backup completes
    /// successfully.
    async fn request_restore_point(&self, name: &str) -> Result<()>;
}
