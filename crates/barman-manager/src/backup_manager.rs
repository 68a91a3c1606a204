//! `backup()` and `delete()`, the two server-lock-serialized operations
//! that mutate the catalog.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use barman_catalog::{BackupCatalog, RetentionPolicy, WalCatalog};
use barman_core::{BackupCoordination, BackupStatus, Error, RetentionStatus, Result, ServerConfig};
use barman_executor::{execute, DatabaseClient, Transport};

use crate::hooks;
use crate::lock::{backup_lock_path, server_lock_path, LockGuard};

/// Runs one backup attempt against `config`'s server, start to finish:
/// hooks, id reservation, delegation to the executor, post-backup
/// fsync-and-size accounting, and the final restore point request.
///
/// Serialized by `server.lock`: a concurrent caller gets `LockBusy`
/// immediately, with no side effects.
pub async fn backup(
    config: &ServerConfig,
    client: &dyn DatabaseClient,
    transport: Transport,
    catalog: &mut BackupCatalog,
    wal_catalog: &WalCatalog,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<String> {
    let _lock = LockGuard::acquire(&server_lock_path(&config.lock_directory))?;

    let mut env = HashMap::new();
    hooks::run_plain_hook(config.hooks.pre_backup_script.as_ref(), &config.name, &env).await?;
    hooks::run_retry_hook(config.hooks.pre_backup_retry_script.as_ref(), &config.name, &env).await?;

    let backup_id = now.format("%Y%m%dT%H%M%S").to_string();
    let mut backup = barman_catalog::Backup::new_empty(&backup_id, &config.name);
    backup.transport = Some(config.transport);
    backup.coordination = Some(config.coordination);
    backup.status = BackupStatus::Empty;
    backup.save(&config.basebackups_directory)?;
    catalog.add(backup.clone());

    let is_first_backup = catalog.available(barman_core::BackupStatus::NOT_EMPTY).len() <= 1;

    let result = execute(
        client,
        transport,
        config.coordination,
        &mut backup,
        &config.basebackups_directory,
        is_first_backup,
        Some(wal_catalog),
    )
    .await;

    match result {
        Ok(()) => {
            let destination = backup.directory(&config.basebackups_directory);
            let size = fsync_tree(&destination)?;
            backup.size = Some(size);
            backup.status = BackupStatus::WaitingForWals;
            backup.save(&config.basebackups_directory)?;
            if let Err(e) = client.request_restore_point(&format!("barman_{}", backup_id)).await {
                tracing::warn!(error = %e, "failed to request restore point after a successful backup");
            }
        }
        Err(ref e) => {
            tracing::warn!(error = %e, backup_id = %backup_id, "backup attempt failed");
        }
    }

    catalog.add(backup.clone());

    env.insert("BARMAN_BACKUP_DIR".to_string(), backup.directory(&config.basebackups_directory).display().to_string());
    env.insert("BARMAN_BACKUP_ID".to_string(), backup_id.clone());
    env.insert("BARMAN_STATUS".to_string(), backup.status.to_string());
    env.insert("BARMAN_ERROR".to_string(), backup.error.clone().unwrap_or_default());

    hooks::run_retry_hook(config.hooks.post_backup_retry_script.as_ref(), &config.name, &env).await?;
    hooks::run_plain_hook(config.hooks.post_backup_script.as_ref(), &config.name, &env).await?;

    result.map(|()| backup_id)
}

/// Fsyncs every file and containing directory under `root`, returning
/// the total byte size of all regular files. Called once right after a
/// successful copy so the backup is durable on disk before it's marked
/// `WAITING_FOR_WALS`.
fn fsync_tree(root: &Path) -> Result<u64> {
    let mut total = 0u64;
    let mut dirs = HashSet::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        if entry.file_type().is_file() {
            let file = std::fs::File::open(entry.path())?;
            file.sync_all()?;
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
            if let Some(parent) = entry.path().parent() {
                dirs.insert(parent.to_path_buf());
            }
        } else if entry.file_type().is_dir() {
            dirs.insert(entry.path().to_path_buf());
        }
    }
    for dir in dirs {
        barman_catalog::fsync_dir(&dir)?;
    }
    Ok(total)
}

/// Deletes `backup_id`, serialized by `server.lock`.
///
/// Refuses to delete a `DONE` backup that would take the server below
/// `minimum_redundancy`. Reclaims WAL that only the deleted backup
/// needed, honoring protected timelines (any timeline still carrying an
/// archiving-but-unfinished backup, other than the cutoff backup's own
/// timeline).
pub async fn delete(
    config: &ServerConfig,
    catalog: &mut BackupCatalog,
    wal_catalog: &WalCatalog,
    backup_id: &str,
) -> Result<()> {
    let _lock = LockGuard::acquire(&server_lock_path(&config.lock_directory))?;

    let backup = catalog
        .get(backup_id)
        .cloned()
        .ok_or_else(|| Error::UnknownBackup(backup_id.to_string()))?;

    if backup.status == BackupStatus::Done {
        let done_count = catalog.available(&[BackupStatus::Done]).len();
        if done_count <= config.minimum_redundancy as usize {
            return Err(Error::ConfigError(format!(
                "cannot delete backup {}: only {} DONE backup(s) remain, at or below minimum_redundancy {}",
                backup_id, done_count, config.minimum_redundancy
            )));
        }
    }

    let mut env = HashMap::new();
    env.insert("BARMAN_BACKUP_ID".to_string(), backup_id.to_string());
    hooks::run_plain_hook(config.hooks.pre_delete_script.as_ref(), &config.name, &env).await?;

    let destination = backup.directory(&config.basebackups_directory);
    if let Some(tablespaces) = &backup.tablespaces {
        for ts in tablespaces {
            let ts_dir = destination.join(ts.oid.to_string());
            if ts_dir.exists() {
                std::fs::remove_dir_all(&ts_dir).map_err(|_| {
                    Error::Fatal(format!(
                        "could not remove tablespace directory {}; remove this directory manually",
                        ts_dir.display()
                    ))
                })?;
            }
        }
    }
    let pgdata_dir = destination.join("pgdata");
    if pgdata_dir.exists() {
        std::fs::remove_dir_all(&pgdata_dir).map_err(|_| {
            Error::Fatal(format!(
                "could not remove data directory {}; remove this directory manually",
                pgdata_dir.display()
            ))
        })?;
    }
    std::fs::remove_dir_all(&destination).map_err(|_| {
        Error::Fatal(format!(
            "could not remove backup directory {}; remove this directory manually",
            destination.display()
        ))
    })?;

    let was_oldest = catalog.first(BackupStatus::NOT_EMPTY).map(|b| b.backup_id.as_str()) == Some(backup_id);
    if was_oldest {
        reclaim_after_delete(config, catalog, wal_catalog, &backup)?;
    }

    catalog.remove(backup_id);
    let leftover_lock = backup_lock_path(&config.lock_directory, backup_id);
    let _ = std::fs::remove_file(leftover_lock);

    hooks::run_plain_hook(config.hooks.post_delete_script.as_ref(), &config.name, &env).await?;

    Ok(())
}

fn reclaim_after_delete(
    config: &ServerConfig,
    catalog: &BackupCatalog,
    wal_catalog: &WalCatalog,
    deleted: &barman_catalog::Backup,
) -> Result<()> {
    let next = catalog.next(&deleted.backup_id, barman_core::BackupStatus::NOT_EMPTY)?;

    let cutoff_wal = match (config.coordination, next) {
        (BackupCoordination::Concurrent, _) => deleted.begin_wal.clone(),
        (BackupCoordination::Exclusive, Some(next)) => next.begin_wal.clone(),
        (BackupCoordination::Exclusive, None) => None,
    };

    let cutoff_timeline = deleted.timeline;
    let protected_timelines: HashSet<u32> = catalog
        .iter()
        .filter(|b| barman_core::BackupStatus::ARCHIVING.contains(&b.status))
        .filter_map(|b| b.timeline)
        .filter(|tl| Some(*tl) != cutoff_timeline)
        .collect();

    let wals_directory = wal_catalog
        .path()
        .parent()
        .ok_or_else(|| Error::Fatal("xlog.db has no parent directory".into()))?
        .to_path_buf();

    wal_catalog.rewrite(
        |record| {
            if record.is_history() {
                return true;
            }
            let Ok(segment) = barman_core::SegmentName::parse(&record.name) else {
                tracing::warn!(
                    wal = %record.name,
                    "dropping malformed WAL journal entry during reclamation; run rebuild-xlogdb if this segment is still needed"
                );
                return false;
            };
            if protected_timelines.contains(&segment.timeline) {
                return true;
            }
            match &cutoff_wal {
                Some(cutoff) => record.name.as_str() >= cutoff.as_str(),
                None => false,
            }
        },
        |record| {
            let hash_dir = barman_core::hash_dir(&record.name).unwrap_or_default();
            let path = wals_directory.join(hash_dir).join(&record.name);
            match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Io(e)),
            }
        },
    )
}

/// Enforces `config.retention_policy` against the catalog, deleting every
/// backup the policy classifies `OBSOLETE`. A missing or unparsable policy
/// is a no-op, not an error: retention enforcement is opt-in per server.
///
/// Deletes are serialized in ascending (oldest-first) backup id order so
/// each one sees the WAL reclamation left behind by the one before it.
/// One backup's delete failing is logged and does not stop the sweep from
/// trying the rest, the same tolerance `archive_wal` gives its archivers.
pub async fn cron_retention(
    config: &ServerConfig,
    catalog: &mut BackupCatalog,
    wal_catalog: &WalCatalog,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    let Some(policy_text) = config.retention_policy.as_ref() else {
        return Ok(());
    };
    let Some(policy) = RetentionPolicy::parse(policy_text) else {
        tracing::warn!(server = %config.name, policy = %policy_text, "unparsable retention_policy, skipping enforcement");
        return Ok(());
    };

    let report = barman_catalog::evaluate(catalog, policy, config.minimum_redundancy, now);

    let mut obsolete: Vec<String> = report
        .classification
        .iter()
        .filter(|(_, status)| **status == RetentionStatus::Obsolete)
        .map(|(id, _)| id.clone())
        .collect();
    obsolete.sort();

    for backup_id in obsolete {
        tracing::info!(server = %config.name, backup_id = %backup_id, "enforcing retention policy: removing backup");
        if let Err(e) = delete(config, catalog, wal_catalog, &backup_id).await {
            tracing::warn!(server = %config.name, backup_id = %backup_id, error = %e, "failed to delete obsolete backup, continuing");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use barman_catalog::Backup;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn done_backup(config: &ServerConfig, id: &str, end_time: chrono::DateTime<chrono::Utc>) -> Backup {
        let mut b = Backup::new_empty(id, &config.name);
        b.status = BackupStatus::Done;
        b.end_time = Some(end_time);
        std::fs::create_dir_all(b.directory(&config.basebackups_directory)).unwrap();
        b.save(&config.basebackups_directory).unwrap();
        b
    }

    #[tokio::test]
    async fn cron_retention_with_no_policy_configured_is_a_no_op() {
        let home = tempdir().unwrap();
        let config = ServerConfig::with_defaults("main", home.path().to_path_buf());
        let mut catalog = BackupCatalog::new();
        catalog.add(done_backup(&config, "20240101T000000", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let wal_catalog = WalCatalog::new(config.wals_directory.join("xlog.db"));

        cron_retention(&config, &mut catalog, &wal_catalog, Utc::now()).await.unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn cron_retention_deletes_backups_the_policy_classifies_obsolete() {
        let home = tempdir().unwrap();
        let mut config = ServerConfig::with_defaults("main", home.path().to_path_buf());
        config.retention_policy = Some("REDUNDANCY 1".to_string());
        let mut catalog = BackupCatalog::new();
        for day in 1..=3u32 {
            catalog.add(done_backup(
                &config,
                &format!("2024010{}T000000", day),
                Utc.with_ymd_and_hms(2024, 1, day as u32, 0, 0, 0).unwrap(),
            ));
        }
        let wal_catalog = WalCatalog::new(config.wals_directory.join("xlog.db"));

        cron_retention(
            &config,
            &mut catalog,
            &wal_catalog,
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains("20240103T000000"));
        assert!(!config
            .basebackups_directory
            .join("20240101T000000")
            .exists());
    }
}
