//! The `sync-info` snapshot: what a primary node serializes for a passive
//! node to consume, and the incremental-position bookkeeping that keeps a
//! repeated sync from re-shipping WAL the passive already has.

use std::collections::HashMap;

use barman_catalog::{Backup, BackupCatalog, WalCatalog, WalRecord};
use barman_core::{Error, Result, ServerConfig};
use serde::{Deserialize, Serialize};

/// The JSON document a primary node prints to stdout and a passive node
/// parses back. `wals` only ever holds the records strictly after
/// `(last_name, last_position)` as understood by the *previous* snapshot;
/// `last_name`/`last_position` in this document describe where the
/// journal ends right now, for the passive to pass back on its next call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub version: String,
    pub config: serde_json::Value,
    pub backups: HashMap<String, Backup>,
    pub wals: Vec<WalRecord>,
    pub last_name: String,
    pub last_position: u64,
}

/// Builds the snapshot a primary node serves from `catalog`/`wal_catalog`.
///
/// `since` is the `(last_name, last_position)` pair the passive node
/// already has, or `None` on a first-ever sync (full catalog, full
/// journal). Providing only one half of the pair, or a `last_name` that
/// the journal no longer has a matching offset for (the journal was
/// rebuilt, or the passive is simply wrong), is reported as
/// [`Error::SyncError`] rather than silently served from the beginning:
/// a stale incremental request must not be allowed to masquerade as
/// "nothing changed".
pub fn build_sync_info(
    catalog: &BackupCatalog,
    wal_catalog: &WalCatalog,
    config: &ServerConfig,
    version: &str,
    since: Option<(&str, u64)>,
) -> Result<SyncSnapshot> {
    let records = wal_catalog.scan()?;
    let backups = catalog
        .iter()
        .map(|b| (b.backup_id.clone(), b.clone()))
        .collect();
    let config_json = serde_json::to_value(config)
        .map_err(|e| Error::SyncError(format!("failed to serialize server config: {}", e)))?;

    if records.is_empty() {
        return Ok(SyncSnapshot {
            version: version.to_string(),
            config: config_json,
            backups,
            wals: Vec::new(),
            last_name: String::new(),
            last_position: 0,
        });
    }

    let mut cumulative = 0u64;
    let mut offsets = Vec::with_capacity(records.len());
    for record in &records {
        let start = cumulative;
        cumulative += record.to_line().len() as u64 + 1;
        offsets.push((start, cumulative));
    }

    let wals = match since {
        None => records.clone(),
        Some((name, position)) => {
            let found = records
                .iter()
                .zip(offsets.iter())
                .position(|(r, (_, end))| r.name == name && *end == position);
            match found {
                Some(idx) => records[idx + 1..].to_vec(),
                None => {
                    return Err(Error::SyncError(format!(
                        "no WAL record named '{}' at journal position {}",
                        name, position
                    )))
                }
            }
        }
    };

    let last = records.last().expect("checked non-empty above");
    Ok(SyncSnapshot {
        version: version.to_string(),
        config: config_json,
        backups,
        wals,
        last_name: last.name.clone(),
        last_position: cumulative,
    })
}
