//! The two ways a `FileCopyRemote` backup brackets the low-level copy
//! with start/stop requests to the database.

use std::path::Path;

use async_trait::async_trait;
use barman_catalog::Backup;
use barman_core::{Error, Result};

use crate::client::{BackupEndpointResponse, DatabaseClient};

#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn start_backup(&self, client: &dyn DatabaseClient, backup: &mut Backup) -> Result<()>;
    async fn stop_backup(
        &self,
        client: &dyn DatabaseClient,
        backup: &mut Backup,
        backup_destination: &Path,
    ) -> Result<()>;
}

/// Resolves a start/stop response into the `begin_*`/`end_*` fields,
/// deriving the WAL segment and offset from a raw LSN when the database
/// only gave us a position, and trusting an already-resolved response
/// as-is.
fn apply_response(
    backup: &mut Backup,
    response: BackupEndpointResponse,
    is_begin: bool,
) -> Result<()> {
    let (xlog, wal, offset) = match response {
        BackupEndpointResponse::Lsn { lsn, timeline: Some(timeline) } => {
            let segment_size = backup
                .xlog_segment_size
                .ok_or_else(|| Error::Fatal("xlog_segment_size unknown before resolving LSN".into()))?;
            let (segment, offset) = lsn.to_segment(timeline, segment_size);
            (lsn.to_string(), segment.to_file_name(), offset)
        }
        BackupEndpointResponse::Lsn { lsn, timeline: None } => {
            // No timeline supplied: we can still record the raw LSN, but
            // cannot name a segment without guessing the timeline.
            (lsn.to_string(), String::new(), 0)
        }
        BackupEndpointResponse::Explicit { wal_file, offset } => (String::new(), wal_file, offset),
    };

    if is_begin {
        backup.begin_xlog = Some(xlog);
        backup.begin_wal = if wal.is_empty() { None } else { Some(wal) };
        backup.begin_offset = Some(offset);
    } else {
        backup.end_xlog = Some(xlog);
        backup.end_wal = if wal.is_empty() { None } else { Some(wal) };
        backup.end_offset = Some(offset);
        backup.end_time = Some(chrono::Utc::now());
    }
    Ok(())
}

/// `pg_start_backup`/`pg_stop_backup` in exclusive mode.
pub struct ExclusiveCoordinator;

#[async_trait]
impl Coordinator for ExclusiveCoordinator {
    async fn start_backup(&self, client: &dyn DatabaseClient, backup: &mut Backup) -> Result<()> {
        if client.is_in_recovery().await? {
            return Err(Error::DatabaseInRecovery);
        }
        let label = format!("barman_{}", backup.backup_id);
        let response = client.start_exclusive_backup(&label).await?;
        backup.begin_time = Some(chrono::Utc::now());
        apply_response(backup, response, true)
    }

    async fn stop_backup(
        &self,
        client: &dyn DatabaseClient,
        backup: &mut Backup,
        _backup_destination: &Path,
    ) -> Result<()> {
        let response = client.stop_exclusive_backup().await?;
        apply_response(backup, response, false)
    }
}

/// The 9.6+ concurrent-backup API, with a server-side helper-extension
/// fallback for older databases that don't expose it natively.
pub struct ConcurrentCoordinator;

impl ConcurrentCoordinator {
    async fn ensure_usable(&self, client: &dyn DatabaseClient) -> Result<()> {
        if client.has_native_concurrent_backup().await? {
            return Ok(());
        }
        if client.has_backup_helper_extension().await? {
            return Ok(());
        }
        Err(Error::ConfigError(
            "concurrent backup requires either native support or the backup helper extension, \
             and this server has neither"
                .to_string(),
        ))
    }
}

#[async_trait]
impl Coordinator for ConcurrentCoordinator {
    async fn start_backup(&self, client: &dyn DatabaseClient, backup: &mut Backup) -> Result<()> {
        self.ensure_usable(client).await?;
        let label = format!("barman_{}", backup.backup_id);
        let response = client.start_concurrent_backup(&label).await?;
        backup.begin_time = Some(chrono::Utc::now());
        apply_response(backup, response, true)
    }

    async fn stop_backup(
        &self,
        client: &dyn DatabaseClient,
        backup: &mut Backup,
        backup_destination: &Path,
    ) -> Result<()> {
        let response = client.stop_concurrent_backup().await?;
        let pgdata = backup_destination.join("pgdata");
        std::fs::write(pgdata.join("backup_label"), &response.backup_label)?;

        if let Some(tablespaces) = &backup.tablespaces {
            if !tablespaces.is_empty() {
                let mut contents = String::new();
                for ts in tablespaces {
                    contents.push_str(&ts.to_map_line());
                    contents.push('\n');
                }
                std::fs::write(pgdata.join("tablespace_map"), contents)?;
            }
        }

        apply_response(backup, response.end, false)?;

        if !client.is_in_recovery().await? {
            client.switch_wal().await?;
        }
        Ok(())
    }
}

/// Picks the coordinator matching a server's configured coordination mode.
/// Only meaningful for [`crate::transport::Transport::FileCopyRemote`];
/// the other transports coordinate backup start/stop themselves and use
/// [`DatabaseStreamingCoordinator`]/[`PassiveMirrorCoordinator`] instead.
pub fn coordinator_for(coordination: barman_core::BackupCoordination) -> Box<dyn Coordinator> {
    match coordination {
        barman_core::BackupCoordination::Exclusive => Box::new(ExclusiveCoordinator),
        barman_core::BackupCoordination::Concurrent => Box::new(ConcurrentCoordinator),
    }
}

/// The streaming protocol issues its own start/stop commands as part of
/// the base-backup exchange, so this coordinator only stamps the
/// timestamps the executor's common contract expects; the WAL positions
/// come back from [`DatabaseClient::stream_base_backup`] itself.
pub struct DatabaseStreamingCoordinator;

#[async_trait]
impl Coordinator for DatabaseStreamingCoordinator {
    async fn start_backup(&self, _client: &dyn DatabaseClient, backup: &mut Backup) -> Result<()> {
        backup.begin_time = Some(chrono::Utc::now());
        Ok(())
    }

    async fn stop_backup(
        &self,
        _client: &dyn DatabaseClient,
        backup: &mut Backup,
        _backup_destination: &Path,
    ) -> Result<()> {
        backup.end_time = Some(chrono::Utc::now());
        Ok(())
    }
}

/// A passive-mirror backup has no data transfer of its own, so there is
/// nothing to start or stop here either; the Sync Engine fills in the
/// WAL positions from the primary's `sync-info` snapshot.
pub struct PassiveMirrorCoordinator;

#[async_trait]
impl Coordinator for PassiveMirrorCoordinator {
    async fn start_backup(&self, _client: &dyn DatabaseClient, backup: &mut Backup) -> Result<()> {
        backup.begin_time = Some(chrono::Utc::now());
        Ok(())
    }

    async fn stop_backup(
        &self,
        _client: &dyn DatabaseClient,
        backup: &mut Backup,
        _backup_destination: &Path,
    ) -> Result<()> {
        backup.end_time = Some(chrono::Utc::now());
        Ok(())
    }
}
