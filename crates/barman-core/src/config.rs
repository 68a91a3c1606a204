//! Per-server configuration.
//!
//! Parsing barman's own `.ini`-style configuration file is outside this
//! crate's scope (see the engine's ambient configuration layer for that);
//! what lives here is the validated, in-memory shape every component
//! actually consumes. It is `Serialize`/`Deserialize` because the sync
//! engine ships it verbatim as part of a primary node's `sync-info`
//! snapshot so a passive node can detect configuration drift.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// How the copy controller may speed up a backup by reusing data from a
/// previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReuseBackupMode {
    /// Every file is copied in full.
    None,
    /// Unchanged files are copied from the previous backup (safe, slower).
    Copy,
    /// Unchanged files are hard-linked from the previous backup (fast,
    /// requires same filesystem).
    Link,
}

impl Default for ReuseBackupMode {
    fn default() -> Self {
        ReuseBackupMode::None
    }
}

/// Which transport moves data from the source database to the backup
/// catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupTransport {
    /// rsync/ssh-style file copy against the data directory.
    FileCopyRemote,
    /// `pg_basebackup`-style streaming replication protocol.
    DatabaseStreaming,
    /// No copy is performed by barman; a separate agent mirrors the data
    /// and barman only manages catalog metadata (e.g. a storage snapshot).
    PassiveMirror,
}

/// Which coordination protocol brackets the low-level file copy. Only
/// meaningful when [`BackupTransport::FileCopyRemote`] is in use; the
/// other transports coordinate backup start/stop themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupCoordination {
    /// `pg_start_backup`/`pg_stop_backup` in exclusive mode: blocks any
    /// other concurrent backup and requires the server not be a standby.
    Exclusive,
    /// The 9.6+ concurrent backup API: safe to run from a standby and to
    /// overlap with other connections.
    Concurrent,
}

/// The validated, resolved configuration for a single managed server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,

    /// Root of this server's catalog: backups, wals, and lock files live
    /// under here unless overridden individually.
    pub barman_home: PathBuf,
    pub basebackups_directory: PathBuf,
    pub wals_directory: PathBuf,
    pub lock_directory: PathBuf,
    pub incoming_wals_directory: PathBuf,

    pub transport: BackupTransport,
    pub coordination: BackupCoordination,

    /// The WAL compression codec this server's archiver applies, if any
    /// (`"gzip"`, `"bzip2"`, ...). A passive node refuses to sync WAL from
    /// a primary configured with a different setting: it would otherwise
    /// catalogue segments under a codec it never applied itself.
    pub compression: Option<String>,

    /// `redundancy N` or `recovery window of N {days,weeks,months}`,
    /// parsed by `barman-storage::retention`.
    pub retention_policy: Option<String>,
    pub wal_retention_policy: Option<String>,
    pub minimum_redundancy: u32,

    pub parallel_jobs: usize,
    pub reuse_backup: ReuseBackupMode,
    pub network_compression: bool,
    pub bandwidth_limit: Option<u64>,
    pub tablespace_bandwidth_limit: HashMap<String, u64>,

    /// Command used to reach the database host for file-copy transports,
    /// e.g. `"ssh postgres@pg1"`. Opaque to barman-core; the engine's
    /// transport implementations parse and invoke it.
    pub ssh_command: Option<String>,

    /// Maximum acceptable age, in seconds, of the most recent `DONE`
    /// backup before `barman check` should flag this server.
    pub last_backup_maximum_age_secs: Option<i64>,

    /// Hook scripts. Each entry is an absolute path to an executable
    /// invoked with the documented environment contract; empty means no
    /// hook is configured for that point.
    pub hooks: HookScripts,
}

/// The ten hook points barman exposes around backup, delete, and WAL
/// archiving.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookScripts {
    pub pre_backup_script: Option<PathBuf>,
    pub post_backup_script: Option<PathBuf>,
    pub pre_backup_retry_script: Option<PathBuf>,
    pub post_backup_retry_script: Option<PathBuf>,
    pub pre_archive_script: Option<PathBuf>,
    pub post_archive_script: Option<PathBuf>,
    pub pre_archive_retry_script: Option<PathBuf>,
    pub post_archive_retry_script: Option<PathBuf>,
    pub pre_delete_script: Option<PathBuf>,
    pub post_delete_script: Option<PathBuf>,
}

impl ServerConfig {
    /// Builds a config with every directory derived from `barman_home` and
    /// otherwise-conservative defaults, suitable for tests and as a
    /// starting point once the real `.ini` parser resolves user overrides.
    pub fn with_defaults(name: impl Into<String>, barman_home: PathBuf) -> Self {
        let name = name.into();
        let server_home = barman_home.join(&name);
        Self {
            basebackups_directory: server_home.join("base"),
            wals_directory: server_home.join("wals"),
            lock_directory: server_home.clone(),
            incoming_wals_directory: server_home.join("incoming"),
            barman_home,
            name,
            transport: BackupTransport::FileCopyRemote,
            coordination: BackupCoordination::Concurrent,
            compression: None,
            retention_policy: None,
            wal_retention_policy: None,
            minimum_redundancy: 0,
            parallel_jobs: 1,
            reuse_backup: ReuseBackupMode::None,
            network_compression: false,
            bandwidth_limit: None,
            tablespace_bandwidth_limit: HashMap::new(),
            ssh_command: None,
            last_backup_maximum_age_secs: None,
            hooks: HookScripts::default(),
        }
    }
}
