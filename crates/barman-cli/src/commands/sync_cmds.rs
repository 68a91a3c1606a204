//! `sync-info`, `sync-backup`, `sync-wals`: the passive-node side of the
//! pull-based sync protocol. There is no ssh transport in this crate, so
//! the primary's snapshot is read from stdin as JSON (exactly what a real
//! deployment would pipe over ssh into this same command) rather than
//! fetched directly.

use std::io::Read;
use std::path::Path;

use barman_catalog::{BackupCatalog, WalCatalog};
use barman_core::{Error, Result, ServerConfig};
use barman_sync::SyncSnapshot;

const PROTOCOL_VERSION: &str = "1.0.0";

fn wal_catalog(config: &ServerConfig) -> WalCatalog {
    WalCatalog::new(config.wals_directory.join("xlog.db"))
}

fn read_snapshot_from_stdin() -> Result<SyncSnapshot> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .map_err(Error::Io)?;
    serde_json::from_str(&text)
        .map_err(|e| Error::SyncError(format!("malformed sync-info snapshot on stdin: {}", e)))
}

/// Prints this node's own snapshot to stdout, as a primary does when a
/// passive node asks for one. `since` is the `(last_name, last_position)`
/// the caller already has, for an incremental reply.
pub fn sync_info(config: &ServerConfig, since: Option<(&str, u64)>) -> Result<()> {
    let catalog = BackupCatalog::load(&config.basebackups_directory)?;
    let wal_catalog = wal_catalog(config);
    let snapshot = barman_sync::build_sync_info(&catalog, &wal_catalog, config, PROTOCOL_VERSION, since)?;
    let text = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| Error::SyncError(format!("failed to serialize sync-info snapshot: {}", e)))?;
    println!("{}", text);
    Ok(())
}

/// Reads a primary's snapshot from stdin and mirrors `backup_id` from
/// `primary_basebackups_directory` if the decision matrix says a copy is
/// required.
pub async fn sync_backup(
    config: &ServerConfig,
    backup_id: &str,
    primary_basebackups_directory: &Path,
) -> Result<()> {
    let snapshot = read_snapshot_from_stdin()?;
    let mut local_catalog = BackupCatalog::load(&config.basebackups_directory)?;
    let outcome = barman_sync::sync_backup(
        config,
        &mut local_catalog,
        backup_id,
        &snapshot,
        primary_basebackups_directory,
    )
    .await?;

    match outcome {
        barman_sync::SyncOutcome::Synced => println!("backup {} synced from primary", backup_id),
        barman_sync::SyncOutcome::NothingToDo => println!("backup {} is already up to date", backup_id),
        barman_sync::SyncOutcome::Deleted => println!("backup {} removed (no longer on primary)", backup_id),
    }
    Ok(())
}

/// Reads a primary's snapshot from stdin and copies whatever new WAL it
/// offers into the local archive and journal.
pub async fn sync_wals(
    config: &ServerConfig,
    primary_wals_directory: &Path,
    primary_compression: Option<&str>,
) -> Result<()> {
    let snapshot = read_snapshot_from_stdin()?;
    let local_catalog = BackupCatalog::load(&config.basebackups_directory)?;
    let wal_catalog = wal_catalog(config);
    let outcome = barman_sync::sync_wals(
        config,
        &local_catalog,
        &wal_catalog,
        &snapshot,
        primary_compression,
        primary_wals_directory,
    )
    .await?;

    match outcome {
        barman_sync::SyncWalsOutcome::Synced(n) => println!("{} new WAL segment(s) synced", n),
        barman_sync::SyncWalsOutcome::NothingToDo => println!("no new WAL to sync"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sync_info_succeeds_on_an_empty_server() {
        let dir = tempdir().unwrap();
        let config = ServerConfig::with_defaults("main", dir.path().to_path_buf());
        std::fs::create_dir_all(&config.basebackups_directory).unwrap();
        assert!(sync_info(&config, None).is_ok());
    }
}
