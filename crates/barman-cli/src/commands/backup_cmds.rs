//! `backup`, `delete`, `recover`, `check`, `check-backup`, `cron`.

use std::path::{Path, PathBuf};

use barman_catalog::{Backup, BackupCatalog, WalCatalog};
use barman_core::{Error, Result, ServerConfig};
use barman_copy::{copy, CopyItem, CopyJob, DirectoryItem, FileItem, ItemClass};
use barman_executor::Transport;

use crate::client::NullDatabaseClient;

fn wal_catalog(config: &ServerConfig) -> WalCatalog {
    WalCatalog::new(config.wals_directory.join("xlog.db"))
}

fn transport_for(config: &ServerConfig) -> Transport {
    match config.transport {
        barman_core::BackupTransport::FileCopyRemote => {
            Transport::FileCopyRemote(barman_executor::FileCopyRemoteOptions {
                user_exclude: Vec::new(),
                parallel_jobs: config.parallel_jobs,
                network_compression: config.network_compression,
                reuse_mode: match config.reuse_backup {
                    barman_core::ReuseBackupMode::None => barman_copy::ReuseMode::None,
                    barman_core::ReuseBackupMode::Copy => barman_copy::ReuseMode::Copy,
                    barman_core::ReuseBackupMode::Link => barman_copy::ReuseMode::Link,
                },
                retry_times: 0,
                retry_sleep: std::time::Duration::from_secs(0),
            })
        }
        barman_core::BackupTransport::DatabaseStreaming => {
            Transport::DatabaseStreaming(barman_executor::DatabaseStreamingOptions {
                bandwidth_limit: config.bandwidth_limit,
                tablespace_bandwidth_limit: config.tablespace_bandwidth_limit.clone(),
                reuse_mode: barman_copy::ReuseMode::None,
                network_compression: false,
            })
        }
        barman_core::BackupTransport::PassiveMirror => Transport::PassiveMirror,
    }
}

pub async fn backup(config: &ServerConfig) -> Result<()> {
    let mut catalog = BackupCatalog::load(&config.basebackups_directory)?;
    let wal_catalog = wal_catalog(config);
    let client = NullDatabaseClient;
    let transport = transport_for(config);
    let id = barman_manager::backup(
        config,
        &client,
        transport,
        &mut catalog,
        &wal_catalog,
        chrono::Utc::now(),
    )
    .await?;
    println!("Starting backup for server {} (backup id {})", config.name, id);
    Ok(())
}

pub async fn delete(config: &ServerConfig, backup_id: &str) -> Result<()> {
    let mut catalog = BackupCatalog::load(&config.basebackups_directory)?;
    let wal_catalog = wal_catalog(config);
    barman_manager::delete(config, &mut catalog, &wal_catalog, backup_id).await?;
    println!("Backup {} deleted from server {}", backup_id, config.name);
    Ok(())
}

pub async fn cron(config: &ServerConfig) -> Result<()> {
    let mut catalog = BackupCatalog::load(&config.basebackups_directory)?;
    let wal_catalog = wal_catalog(config);

    for backup in catalog.available(barman_core::BackupStatus::ARCHIVING) {
        let id = backup.backup_id.clone();
        let mut b = backup.clone();
        barman_manager::check_backup(&mut b, &wal_catalog, &config.basebackups_directory)?;
        catalog.add(b);
        tracing::info!(backup_id = %id, "re-checked in-progress backup");
    }

    barman_manager::cron_retention(config, &mut catalog, &wal_catalog, chrono::Utc::now()).await?;
    println!("Cron run complete for server {}", config.name);
    Ok(())
}

pub fn check_backup(config: &ServerConfig, backup_id: &str) -> Result<()> {
    let mut catalog = BackupCatalog::load(&config.basebackups_directory)?;
    let wal_catalog = wal_catalog(config);
    let mut backup = catalog
        .get(backup_id)
        .cloned()
        .ok_or_else(|| Error::UnknownBackup(backup_id.to_string()))?;
    barman_manager::check_backup(&mut backup, &wal_catalog, &config.basebackups_directory)?;
    println!("Backup {}: {}", backup_id, backup.status);
    catalog.add(backup);
    Ok(())
}

/// A coarse, connection-free health check: the directories this server
/// needs exist and are writable, its retention policy (if any) parses,
/// and its most recent `DONE` backup is not older than
/// `last_backup_maximum_age_secs` (if configured). Anything requiring a
/// live database connection is out of scope here, same boundary as the
/// rest of this crate's `DatabaseClient` usage.
pub fn check(config: &ServerConfig, nagios: bool) -> Result<()> {
    let mut results: Vec<(&'static str, bool, String)> = Vec::new();

    for (label, dir) in [
        ("basebackups directory", &config.basebackups_directory),
        ("wals directory", &config.wals_directory),
        ("incoming wals directory", &config.incoming_wals_directory),
        ("lock directory", &config.lock_directory),
    ] {
        let ok = dir.is_dir();
        results.push((label, ok, if ok { "OK".into() } else { format!("{} does not exist", dir.display()) }));
    }

    if let Some(policy) = &config.retention_policy {
        let ok = barman_catalog::RetentionPolicy::parse(policy).is_some();
        results.push(("retention policy", ok, if ok { "OK".into() } else { format!("cannot parse '{}'", policy) }));
    }

    if let Some(max_age) = config.last_backup_maximum_age_secs {
        let catalog = BackupCatalog::load(&config.basebackups_directory)?;
        let done = catalog.available(&[barman_core::BackupStatus::Done]);
        let latest = done.iter().max_by_key(|b| b.backup_id.clone());
        let ok = match latest.and_then(|b| b.end_time) {
            Some(end_time) => (chrono::Utc::now() - end_time).num_seconds() <= max_age,
            None => false,
        };
        results.push((
            "backup age",
            ok,
            if ok {
                "OK".into()
            } else {
                "no backup recent enough".into()
            },
        ));
    }

    let all_ok = results.iter().all(|(_, ok, _)| *ok);

    if nagios {
        if all_ok {
            println!("BARMAN OK - all checks passed for server {}", config.name);
        } else {
            let failed: Vec<&str> = results.iter().filter(|(_, ok, _)| !ok).map(|(l, _, _)| *l).collect();
            println!("BARMAN CRITICAL - {} failed for server {}", failed.join(", "), config.name);
        }
    } else {
        println!("Server {}:", config.name);
        for (label, ok, detail) in &results {
            println!("\t{}: {}", label, if *ok { "OK".to_string() } else { format!("FAILED ({})", detail) });
        }
    }

    if all_ok {
        Ok(())
    } else {
        Err(Error::Fatal(format!("one or more checks failed for server {}", config.name)))
    }
}

/// Restores `backup_id` into `destination`: copies the tablespaces and
/// data directory via the Copy Controller, the way a full (non-
/// incremental) restore does. WAL replay itself is Postgres's job once
/// the files land — this only stages them.
pub async fn recover(config: &ServerConfig, backup_id: &str, destination: &Path) -> Result<()> {
    let catalog = BackupCatalog::load(&config.basebackups_directory)?;
    let backup = catalog
        .get(backup_id)
        .cloned()
        .ok_or_else(|| Error::UnknownBackup(backup_id.to_string()))?;

    if backup.status != barman_core::BackupStatus::Done {
        return Err(Error::Fatal(format!(
            "backup {} is not DONE (status {}); refusing to recover from it",
            backup_id, backup.status
        )));
    }

    let source_dir = backup.directory(&config.basebackups_directory);
    let mut items = Vec::new();

    if let Some(tablespaces) = &backup.tablespaces {
        for ts in tablespaces {
            items.push(CopyItem::Directory(DirectoryItem {
                label: format!("tablespace {}", ts.name),
                source: source_dir.join(ts.oid.to_string()),
                destination: PathBuf::from(&ts.location),
                include: vec![],
                exclude: vec![],
                exclude_and_protect: vec![],
                bandwidth_limit: None,
                reuse_source: None,
                class: ItemClass::Tablespace,
            }));
        }
    }

    items.push(CopyItem::Directory(DirectoryItem {
        label: "pgdata".into(),
        source: source_dir.join("pgdata"),
        destination: destination.to_path_buf(),
        include: vec![],
        exclude: vec![],
        exclude_and_protect: vec![],
        bandwidth_limit: None,
        reuse_source: None,
        class: ItemClass::PgData,
    }));

    items.push(CopyItem::File(FileItem {
        label: "pg_control".into(),
        source: source_dir.join("pgdata/global/pg_control"),
        destination: destination.join("global/pg_control"),
        optional: false,
        class: ItemClass::PgControl,
    }));

    let mut job = CopyJob::new(items);
    job.parallel_jobs = config.parallel_jobs;
    copy(job).await?;

    println!(
        "Backup {} of server {} recovered into {}",
        backup_id,
        config.name,
        destination.display()
    );
    Ok(())
}
