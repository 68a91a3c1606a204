//! `syncBackup`: the passive-side decision of what to do about one backup
//! id, and the Copy Controller invocation that actually mirrors it.

use std::collections::HashMap;
use std::path::Path;

use barman_catalog::{Backup, BackupCatalog, RetentionPolicy};
use barman_copy::{copy, CopyItem, CopyJob, DirectoryItem, ItemClass};
use barman_core::{BackupStatus, Error, Result, RetentionStatus, ServerConfig};
use barman_manager::{backup_lock_path, LockGuard};

use crate::snapshot::SyncSnapshot;

/// What `sync_backup` actually did, for cron's logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    NothingToDo,
    Deleted,
}

/// The pure decision matrix: given whether `backup_id` is
/// still on the primary, what the local copy (if any) looks like, and
/// whether local retention has already retired it, decide what to do.
///
/// Returns `Ok(())` when a copy is required; the two "do nothing, but for
/// a specific reason" and "remove what's here" cases are reported as the
/// matching control-signal variants rather than a boolean, so a caller
/// can log precisely why nothing happened.
pub fn check_sync_required(
    backup_id: &str,
    primary_backups: &HashMap<String, Backup>,
    local_backup: Option<&Backup>,
    local_retention_status: RetentionStatus,
) -> Result<()> {
    if !primary_backups.contains_key(backup_id) {
        return match local_backup {
            None => Err(Error::SyncError(format!(
                "backup {} is not present on the primary and has no local copy",
                backup_id
            ))),
            Some(local) if local.status == BackupStatus::Done => Err(Error::SyncNothingToDo),
            Some(_) => Err(Error::SyncToBeDeleted),
        };
    }

    if let Some(local) = local_backup {
        if local.status == BackupStatus::Done {
            return Err(Error::SyncNothingToDo);
        }
    }

    if local_retention_status == RetentionStatus::Obsolete {
        return Err(Error::SyncNothingToDo);
    }

    Ok(())
}

/// Classifies what local retention would do with `remote_backup` if it
/// were already synced, by evaluating the configured policy against the
/// local catalog with that one backup's metadata added. Backups not yet
/// `DONE` on the primary are never subject to retention, so this always
/// reports `NONE` for them.
fn classify_local_retention(
    config: &ServerConfig,
    local_catalog: &BackupCatalog,
    remote_backup: Option<&Backup>,
) -> RetentionStatus {
    let Some(remote) = remote_backup else {
        return RetentionStatus::None;
    };
    if remote.status != BackupStatus::Done {
        return RetentionStatus::None;
    }
    let Some(policy_text) = config.retention_policy.as_ref() else {
        return RetentionStatus::None;
    };
    let Some(policy) = RetentionPolicy::parse(policy_text) else {
        return RetentionStatus::None;
    };

    let mut hypothetical = BackupCatalog::new();
    for backup in local_catalog.iter() {
        hypothetical.add(backup.clone());
    }
    hypothetical.add(remote.clone());

    let report = barman_catalog::evaluate(
        &hypothetical,
        policy,
        config.minimum_redundancy,
        remote.end_time.unwrap_or_else(chrono::Utc::now),
    );
    report.status_of(&remote.backup_id)
}

/// Runs `syncBackup(id)` to completion: acquires `backup.lock`, applies
/// the decision matrix, and either removes an orphaned local remnant or
/// mirrors the backup tree from `primary_basebackups_directory` via the
/// Copy Controller.
///
/// The backup's metadata file, its per-tablespace symlinks under
/// `pgdata/pg_tblspc/<oid>`, are excluded from the copy and protected from
/// deletion by a stale destination sweep: `backup.info` is written locally
/// from the primary's JSON record once the copy succeeds, not shipped as a
/// file, and a tablespace symlink is reconstructed from that same metadata
/// rather than trusted from the wire.
pub async fn sync_backup(
    config: &ServerConfig,
    local_catalog: &mut BackupCatalog,
    backup_id: &str,
    snapshot: &SyncSnapshot,
    primary_basebackups_directory: &Path,
) -> Result<SyncOutcome> {
    let _lock = LockGuard::acquire(&backup_lock_path(&config.lock_directory, backup_id))?;

    let local_backup = local_catalog.get(backup_id).cloned();
    let remote_backup = snapshot.backups.get(backup_id);
    let retention_status = classify_local_retention(config, local_catalog, remote_backup);

    match check_sync_required(
        backup_id,
        &snapshot.backups,
        local_backup.as_ref(),
        retention_status,
    ) {
        Ok(()) => {}
        Err(Error::SyncNothingToDo) => return Ok(SyncOutcome::NothingToDo),
        Err(Error::SyncToBeDeleted) => {
            if let Some(local) = local_backup {
                let destination = local.directory(&config.basebackups_directory);
                if destination.exists() {
                    std::fs::remove_dir_all(&destination)?;
                }
                local_catalog.remove(backup_id);
            }
            return Ok(SyncOutcome::Deleted);
        }
        Err(e) => return Err(e),
    }

    let remote_backup = remote_backup.ok_or_else(|| {
        Error::Fatal("sync_backup: decision matrix said to copy but the backup is absent from the primary snapshot".into())
    })?;

    let source_dir = primary_basebackups_directory.join(backup_id);
    let destination_dir = config.basebackups_directory.join(backup_id);

    let mut exclude_and_protect = vec!["/backup.info".to_string()];
    if let Some(tablespaces) = &remote_backup.tablespaces {
        for ts in tablespaces {
            exclude_and_protect.push(format!("/pgdata/pg_tblspc/{}", ts.oid));
        }
    }

    let item = CopyItem::Directory(DirectoryItem {
        label: format!("backup {}", backup_id),
        source: source_dir,
        destination: destination_dir,
        include: vec![],
        exclude: vec![],
        exclude_and_protect,
        bandwidth_limit: None,
        reuse_source: None,
        class: ItemClass::PgData,
    });

    let mut job = CopyJob::new(vec![item]);
    job.parallel_jobs = config.parallel_jobs;
    job.network_compression = config.network_compression;

    copy(job).await?;

    let mut synced = remote_backup.clone();
    synced.save(&config.basebackups_directory)?;
    local_catalog.add(synced);

    Ok(SyncOutcome::Synced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use barman_core::BackupStatus::*;
    use chrono::Utc;

    fn backup(id: &str, status: barman_core::BackupStatus) -> Backup {
        let mut b = Backup::new_empty(id, "main");
        b.status = status;
        b
    }

    #[test]
    fn absent_on_primary_with_no_local_copy_is_a_sync_error() {
        let primary = HashMap::new();
        let result = check_sync_required("unknown", &primary, None, RetentionStatus::None);
        assert!(matches!(result, Err(Error::SyncError(_))));
    }

    #[test]
    fn absent_on_primary_with_incomplete_local_copy_is_to_be_deleted() {
        let primary = HashMap::new();
        let local = backup("x", Failed);
        let result = check_sync_required("x", &primary, Some(&local), RetentionStatus::None);
        assert!(matches!(result, Err(Error::SyncToBeDeleted)));
    }

    #[test]
    fn absent_on_primary_with_complete_local_copy_is_nothing_to_do() {
        let primary = HashMap::new();
        let local = backup("x", Done);
        let result = check_sync_required("x", &primary, Some(&local), RetentionStatus::None);
        assert!(matches!(result, Err(Error::SyncNothingToDo)));
    }

    #[test]
    fn present_locally_as_done_is_nothing_to_do() {
        let mut primary = HashMap::new();
        primary.insert("x".to_string(), backup("x", Done));
        let local = backup("x", Done);
        let result = check_sync_required("x", &primary, Some(&local), RetentionStatus::None);
        assert!(matches!(result, Err(Error::SyncNothingToDo)));
    }

    #[test]
    fn obsolete_under_local_retention_is_nothing_to_do() {
        let mut primary = HashMap::new();
        primary.insert("x".to_string(), backup("x", Done));
        let result = check_sync_required("x", &primary, None, RetentionStatus::Obsolete);
        assert!(matches!(result, Err(Error::SyncNothingToDo)));
    }

    #[test]
    fn not_yet_done_and_not_obsolete_requires_a_copy() {
        let mut primary = HashMap::new();
        primary.insert("x".to_string(), backup("x", WaitingForWals));
        let result = check_sync_required("x", &primary, None, RetentionStatus::None);
        assert!(result.is_ok());
    }

    #[test]
    fn classify_local_retention_ignores_non_done_remote_backups() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::with_defaults("main", dir.path().to_path_buf());
        config.retention_policy = Some("REDUNDANCY 1".to_string());
        let local_catalog = BackupCatalog::new();
        let remote = backup("x", Started);
        assert_eq!(
            classify_local_retention(&config, &local_catalog, Some(&remote)),
            RetentionStatus::None
        );
    }

    #[test]
    fn classify_local_retention_applies_redundancy_floor_across_local_and_remote() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::with_defaults("main", dir.path().to_path_buf());
        config.retention_policy = Some("REDUNDANCY 1".to_string());

        let mut local_catalog = BackupCatalog::new();
        let mut newer_local = backup("20240103T000000", Done);
        newer_local.end_time = Some(Utc::now());
        local_catalog.add(newer_local);

        let mut older_remote = backup("20240101T000000", Done);
        older_remote.end_time = Some(Utc::now() - chrono::Duration::days(10));

        assert_eq!(
            classify_local_retention(&config, &local_catalog, Some(&older_remote)),
            RetentionStatus::Obsolete
        );
    }
}
