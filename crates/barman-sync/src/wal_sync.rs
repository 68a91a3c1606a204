//! `syncWals`: mirrors whatever new WAL a `sync-info` snapshot offers into
//! the local archive and journal.

use std::path::Path;

use barman_catalog::{BackupCatalog, WalCatalog, WalRecord};
use barman_copy::{copy, CopyItem, CopyJob, FileItem, ItemClass};
use barman_core::{BackupStatus, Error, Result, ServerConfig};
use barman_manager::{wal_sync_lock_path, LockGuard};

use crate::snapshot::SyncSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncWalsOutcome {
    Synced(usize),
    NothingToDo,
}

/// Runs `syncWals()`: acquires `wal-sync.lock`, validates the primary is
/// compression-compatible and that the passive's earliest backup is not
/// newer than the WAL the primary is offering (a gap there means no local
/// backup could ever need that WAL), copies the new segments, and appends
/// their records to the local WAL Catalog.
///
/// A clean tick with nothing new from the primary returns
/// `NothingToDo` rather than an error: this runs on every cron tick and
/// must not spam logs when there is simply nothing to do yet.
pub async fn sync_wals(
    config: &ServerConfig,
    local_catalog: &BackupCatalog,
    wal_catalog: &WalCatalog,
    snapshot: &SyncSnapshot,
    primary_compression: Option<&str>,
    primary_wals_directory: &Path,
) -> Result<SyncWalsOutcome> {
    let _lock = LockGuard::acquire(&wal_sync_lock_path(&config.lock_directory))?;

    if config.compression.as_deref() != primary_compression {
        return Err(Error::CompressionIncompatibility {
            expected: config.compression.clone().unwrap_or_else(|| "none".to_string()),
            found: primary_compression.unwrap_or("none").to_string(),
        });
    }

    if snapshot.wals.is_empty() {
        return Ok(SyncWalsOutcome::NothingToDo);
    }

    if let Some(earliest_backup) = local_catalog.first(BackupStatus::NOT_EMPTY) {
        let earliest_offered = &snapshot.wals[0].name;
        if let Some(begin_wal) = &earliest_backup.begin_wal {
            if begin_wal.as_str() > earliest_offered.as_str() {
                tracing::warn!(
                    server = %config.name,
                    earliest_local_backup = %earliest_backup.backup_id,
                    earliest_offered_wal = %earliest_offered,
                    "earliest local backup is newer than the earliest WAL offered by the primary, skipping sync"
                );
                return Ok(SyncWalsOutcome::NothingToDo);
            }
        }
    }

    let already_archived: std::collections::HashSet<String> =
        wal_catalog.scan()?.into_iter().map(|r| r.name).collect();

    let mut items = Vec::new();
    for record in &snapshot.wals {
        if already_archived.contains(&record.name) {
            continue;
        }
        let hash_dir = barman_core::hash_dir(&record.name)?;
        let file_name = wal_file_name(record);
        items.push(CopyItem::File(FileItem {
            label: record.name.clone(),
            source: primary_wals_directory.join(&hash_dir).join(&file_name),
            destination: config.wals_directory.join(&hash_dir).join(&file_name),
            optional: false,
            class: ItemClass::Config,
        }));
    }

    if items.is_empty() {
        return Ok(SyncWalsOutcome::NothingToDo);
    }

    let count = items.len();
    let mut job = CopyJob::new(items);
    job.parallel_jobs = config.parallel_jobs;
    job.network_compression = config.network_compression;
    copy(job).await?;

    for record in &snapshot.wals {
        if !already_archived.contains(&record.name) {
            wal_catalog.append(record)?;
        }
    }

    Ok(SyncWalsOutcome::Synced(count))
}

fn wal_file_name(record: &WalRecord) -> String {
    match &record.compression {
        Some(ext) => format!("{}.{}", record.name, ext),
        None => record.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barman_catalog::Backup;
    use tempfile::tempdir;

    fn config(dir: &Path) -> ServerConfig {
        ServerConfig::with_defaults("main", dir.to_path_buf())
    }

    fn snapshot_with(wals: Vec<WalRecord>) -> SyncSnapshot {
        SyncSnapshot {
            version: "1.0.0".into(),
            config: serde_json::json!({}),
            backups: Default::default(),
            wals,
            last_name: String::new(),
            last_position: 0,
        }
    }

    #[tokio::test]
    async fn mismatched_compression_is_rejected() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.compression = Some("gzip".to_string());
        let local_catalog = BackupCatalog::new();
        let wal_catalog = WalCatalog::new(cfg.wals_directory.join("xlog.db"));
        let snapshot = snapshot_with(vec![]);

        let result = sync_wals(&cfg, &local_catalog, &wal_catalog, &snapshot, None, dir.path()).await;
        assert!(matches!(result, Err(Error::CompressionIncompatibility { .. })));
    }

    #[tokio::test]
    async fn empty_wal_list_is_nothing_to_do() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let local_catalog = BackupCatalog::new();
        let wal_catalog = WalCatalog::new(cfg.wals_directory.join("xlog.db"));
        let snapshot = snapshot_with(vec![]);

        let outcome = sync_wals(&cfg, &local_catalog, &wal_catalog, &snapshot, None, dir.path())
            .await
            .unwrap();
        assert_eq!(outcome, SyncWalsOutcome::NothingToDo);
    }

    #[tokio::test]
    async fn earliest_local_backup_newer_than_offered_wal_skips_with_warning() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let mut local_catalog = BackupCatalog::new();
        let mut b = Backup::new_empty("20240101T000000", "main");
        b.status = BackupStatus::Done;
        b.begin_wal = Some("000000010000000000000010".to_string());
        local_catalog.add(b);
        let wal_catalog = WalCatalog::new(cfg.wals_directory.join("xlog.db"));
        let snapshot = snapshot_with(vec![WalRecord::new(
            "000000010000000000000002",
            16 * 1024 * 1024,
            1.0,
            None,
        )]);

        let outcome = sync_wals(&cfg, &local_catalog, &wal_catalog, &snapshot, None, dir.path())
            .await
            .unwrap();
        assert_eq!(outcome, SyncWalsOutcome::NothingToDo);
        assert!(wal_catalog.scan().unwrap().is_empty());
    }

    #[tokio::test]
    async fn new_segments_are_copied_and_appended_to_the_journal() {
        let primary_home = tempdir().unwrap();
        let primary_wals = primary_home.path().join("wals");
        std::fs::create_dir_all(primary_wals.join("0000000100000000")).unwrap();
        std::fs::write(
            primary_wals.join("0000000100000000/000000010000000000000001"),
            b"segment-data",
        )
        .unwrap();

        let passive_home = tempdir().unwrap();
        let cfg = config(passive_home.path());
        let local_catalog = BackupCatalog::new();
        let wal_catalog = WalCatalog::new(cfg.wals_directory.join("xlog.db"));
        let snapshot = snapshot_with(vec![WalRecord::new(
            "000000010000000000000001",
            13,
            1.0,
            None,
        )]);

        let outcome = sync_wals(&cfg, &local_catalog, &wal_catalog, &snapshot, None, &primary_wals)
            .await
            .unwrap();
        assert_eq!(outcome, SyncWalsOutcome::Synced(1));
        assert!(cfg
            .wals_directory
            .join("0000000100000000")
            .join("000000010000000000000001")
            .exists());
        assert_eq!(wal_catalog.scan().unwrap().len(), 1);
    }
}
