//! The three ways backup data actually moves from the source database
//! to the backup catalog.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use barman_catalog::Backup;
use barman_core::{Error, Result};
use barman_copy::{
    copy, CopyItem, CopyJob, CopyStats, DirectoryItem, FileItem, ItemClass, ReuseMode,
};

use crate::client::DatabaseClient;

/// Paths under `PGDATA` that are never part of a base backup: transient
/// runtime state, lock/PID files, and log output. `pg_control` is handled
/// separately by the executor, not through this list, because its copy
/// must be the last thing written.
const FIXED_PGDATA_EXCLUDES: &[&str] = &[
    "/pg_xlog/*",
    "/pg_wal/*",
    "/pg_log/*",
    "/log/*",
    "/postmaster.pid",
    "/postmaster.opts",
    "/pg_dynshmem/*",
    "/pg_notify/*",
    "/pg_replslot/*",
    "/pg_serial/*",
    "/pg_snapshots/*",
    "/pg_stat_tmp/*",
    "/pg_subtrans/*",
    "/global/pg_control",
];

/// What happened when [`Transport::run`] was asked to move a backup's
/// data. `PassiveMirror` never touches the filesystem itself, so it has
/// no stats to report.
pub enum TransportOutcome {
    Copied(CopyStats),
    Deferred,
}

pub struct FileCopyRemoteOptions {
    pub user_exclude: Vec<String>,
    pub parallel_jobs: usize,
    pub network_compression: bool,
    pub reuse_mode: ReuseMode,
    pub retry_times: u32,
    pub retry_sleep: std::time::Duration,
}

pub struct DatabaseStreamingOptions {
    pub bandwidth_limit: Option<u64>,
    pub tablespace_bandwidth_limit: HashMap<String, u64>,
    pub reuse_mode: ReuseMode,
    pub network_compression: bool,
}

impl DatabaseStreamingOptions {
    /// Rejects combinations streaming cannot honor, checked once at
    /// configuration time rather than repeated on every backup attempt.
    pub fn validate(&self, tool_supports_bandwidth_limit: bool) -> Result<()> {
        if !self.tablespace_bandwidth_limit.is_empty() {
            return Err(Error::ConfigError(
                "database streaming transport cannot apply a per-tablespace bandwidth cap".into(),
            ));
        }
        if self.reuse_mode != ReuseMode::None {
            return Err(Error::ConfigError(
                "database streaming transport does not support incremental reuse".into(),
            ));
        }
        if self.network_compression {
            return Err(Error::ConfigError(
                "database streaming transport does not support network compression".into(),
            ));
        }
        if self.bandwidth_limit.is_some() && !tool_supports_bandwidth_limit {
            return Err(Error::ConfigError(
                "the configured streaming backup tool has no bandwidth-limit flag".into(),
            ));
        }
        Ok(())
    }
}

pub enum Transport {
    FileCopyRemote(FileCopyRemoteOptions),
    DatabaseStreaming(DatabaseStreamingOptions),
    PassiveMirror,
}

impl Transport {
    pub async fn run(
        &self,
        client: &dyn DatabaseClient,
        backup: &Backup,
        backup_destination: &Path,
        reuse_source: Option<&Path>,
        safe_horizon: Option<std::time::SystemTime>,
    ) -> Result<TransportOutcome> {
        match self {
            Transport::FileCopyRemote(opts) => {
                let stats = run_file_copy_remote(opts, backup, backup_destination, reuse_source, safe_horizon).await?;
                Ok(TransportOutcome::Copied(stats))
            }
            Transport::DatabaseStreaming(opts) => {
                let bytes = run_database_streaming(opts, client, backup, backup_destination).await?;
                let mut stats = CopyStats::default();
                stats.total_bytes = bytes;
                Ok(TransportOutcome::Copied(stats))
            }
            Transport::PassiveMirror => Ok(TransportOutcome::Deferred),
        }
    }
}

async fn run_file_copy_remote(
    opts: &FileCopyRemoteOptions,
    backup: &Backup,
    backup_destination: &Path,
    reuse_source: Option<&Path>,
    safe_horizon: Option<std::time::SystemTime>,
) -> Result<CopyStats> {
    let pgdata = backup
        .pgdata
        .as_ref()
        .ok_or_else(|| Error::Fatal("backup.pgdata unset before copy".into()))?;

    let mut exclude: Vec<String> = FIXED_PGDATA_EXCLUDES.iter().map(|s| s.to_string()).collect();
    exclude.extend(opts.user_exclude.iter().cloned());

    let mut exclude_and_protect = Vec::new();
    let mut items = Vec::new();

    if let Some(tablespaces) = &backup.tablespaces {
        for ts in tablespaces {
            exclude_and_protect.push(format!("/pg_tblspc/{}", ts.oid));
            items.push(CopyItem::Directory(DirectoryItem {
                label: format!("tablespace {}", ts.name),
                source: PathBuf::from(&ts.location),
                destination: backup_destination.join(format!("{}", ts.oid)),
                include: vec![],
                exclude: vec![],
                exclude_and_protect: vec![],
                bandwidth_limit: None,
                reuse_source: reuse_source.map(|r| r.join(format!("{}", ts.oid))),
                class: ItemClass::Tablespace,
            }));
        }
    }

    items.push(CopyItem::Directory(DirectoryItem {
        label: "pgdata".into(),
        source: pgdata.clone(),
        destination: backup_destination.join("pgdata"),
        include: vec![],
        exclude,
        exclude_and_protect,
        bandwidth_limit: None,
        reuse_source: reuse_source.map(|r| r.join("pgdata")),
        class: ItemClass::PgData,
    }));

    items.push(CopyItem::File(FileItem {
        label: "pg_control".into(),
        source: pgdata.join("global/pg_control"),
        destination: backup_destination.join("pgdata/global/pg_control"),
        optional: false,
        class: ItemClass::PgControl,
    }));

    for extra in external_config_files(backup) {
        items.push(CopyItem::File(FileItem {
            label: extra.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            source: extra.clone(),
            destination: backup_destination.join("pgdata").join(extra.file_name().unwrap_or_default()),
            optional: true,
            class: ItemClass::Config,
        }));
    }

    let mut job = CopyJob::new(items);
    job.parallel_jobs = opts.parallel_jobs;
    job.network_compression = opts.network_compression;
    job.reuse_mode = opts.reuse_mode;
    job.safe_horizon = safe_horizon;
    job.retry_times = opts.retry_times;
    job.retry_sleep = opts.retry_sleep;

    copy(job).await
}

async fn run_database_streaming(
    opts: &DatabaseStreamingOptions,
    client: &dyn DatabaseClient,
    backup: &Backup,
    backup_destination: &Path,
) -> Result<u64> {
    let tool_supports_bandwidth_limit = client.supports_streaming_bandwidth_limit().await?;
    opts.validate(tool_supports_bandwidth_limit)?;

    let reported = external_config_files(backup);
    for path in &reported {
        tracing::warn!(path = %path.display(), "outside the data directory, not copied by the streaming transport — back this up manually");
    }

    client.stream_base_backup(backup_destination, opts.bandwidth_limit).await
}

/// Configuration files that must be called out rather than silently
/// copied: `config_file`/`hba_file`/`ident_file` entries that live
/// outside `pgdata`. Inside `pgdata` they're already covered by the
/// pgdata directory copy.
fn external_config_files(backup: &Backup) -> Vec<PathBuf> {
    let Some(pgdata) = backup.pgdata.as_ref() else {
        return Vec::new();
    };
    [&backup.config_file, &backup.hba_file, &backup.ident_file]
        .into_iter()
        .filter_map(|p| p.clone())
        .filter(|p| !p.starts_with(pgdata))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use barman_core::BackupStatus;

    fn backup_with_pgdata(pgdata: &Path) -> Backup {
        let mut b = Backup::new_empty("20240101T000000", "main");
        b.status = BackupStatus::Started;
        b.pgdata = Some(pgdata.to_path_buf());
        b
    }

    #[test]
    fn external_config_files_excludes_paths_under_pgdata() {
        let pgdata = Path::new("/var/lib/postgresql/14/main");
        let mut b = backup_with_pgdata(pgdata);
        b.config_file = Some(pgdata.join("postgresql.conf"));
        b.hba_file = Some(PathBuf::from("/etc/postgresql/14/main/pg_hba.conf"));
        let reported = external_config_files(&b);
        assert_eq!(reported, vec![PathBuf::from("/etc/postgresql/14/main/pg_hba.conf")]);
    }

    #[test]
    fn streaming_options_reject_tablespace_bandwidth_cap() {
        let mut tablespace_bandwidth_limit = HashMap::new();
        tablespace_bandwidth_limit.insert("ts1".to_string(), 1024);
        let opts = DatabaseStreamingOptions {
            bandwidth_limit: None,
            tablespace_bandwidth_limit,
            reuse_mode: ReuseMode::None,
            network_compression: false,
        };
        assert!(opts.validate(true).is_err());
    }

    #[test]
    fn streaming_options_reject_bandwidth_limit_without_tool_support() {
        let opts = DatabaseStreamingOptions {
            bandwidth_limit: Some(1024),
            tablespace_bandwidth_limit: HashMap::new(),
            reuse_mode: ReuseMode::None,
            network_compression: false,
        };
        assert!(opts.validate(false).is_err());
        assert!(opts.validate(true).is_ok());
    }
}
