//! The common `execute(backup)` contract every transport/coordination
//! combination shares.

use std::path::Path;

use barman_catalog::{Backup, WalCatalog};
use barman_core::{BackupCoordination, BackupStatus, Error, Result};

use crate::client::DatabaseClient;
use crate::coordination::{coordinator_for, Coordinator, DatabaseStreamingCoordinator, PassiveMirrorCoordinator};
use crate::transport::{Transport, TransportOutcome};

/// Validates the configuration-time forbidden combinations that apply
/// across transport and coordination, beyond what each transport already
/// checks on its own options.
pub fn validate_combination(transport: &Transport, coordination: BackupCoordination) -> Result<()> {
    if matches!(transport, Transport::DatabaseStreaming(_)) && coordination == BackupCoordination::Exclusive {
        return Err(Error::ConfigError(
            "database streaming transport cannot be paired with exclusive coordination".into(),
        ));
    }
    Ok(())
}

fn coordinator_for_transport(transport: &Transport, coordination: BackupCoordination) -> Box<dyn Coordinator> {
    match transport {
        Transport::FileCopyRemote(_) => coordinator_for(coordination),
        Transport::DatabaseStreaming(_) => Box::new(DatabaseStreamingCoordinator),
        Transport::PassiveMirror => Box::new(PassiveMirrorCoordinator),
    }
}

/// Runs one backup attempt end to end against `backup`, which must
/// already be persisted in `EMPTY` status (the manager reserves the id
/// and writes the initial `backup.info` before calling in here).
///
/// `basebackups_directory` is the server's base backups root (so
/// `backup.save` can be called as the attempt progresses); `wal_catalog`
/// and `wals_directory` are only consulted when `is_first_backup` is
/// true, to reclaim WAL segments that predate this backup's start.
pub async fn execute(
    client: &dyn DatabaseClient,
    transport: Transport,
    coordination: BackupCoordination,
    backup: &mut Backup,
    basebackups_directory: &Path,
    is_first_backup: bool,
    wal_catalog: Option<&WalCatalog>,
) -> Result<()> {
    validate_combination(&transport, coordination)?;
    let coordinator = coordinator_for_transport(&transport, coordination);

    let mut current_action = "initializing".to_string();

    let result: Result<()> = async {
        current_action = "connecting to the database".to_string();
        let probe = client.probe().await?;
        backup.version = Some(probe.version);
        backup.systemid = probe.systemid;
        backup.pgdata = Some(probe.pgdata);
        backup.tablespaces = Some(probe.tablespaces);
        backup.config_file = Some(probe.config_file);
        backup.hba_file = Some(probe.hba_file);
        backup.ident_file = Some(probe.ident_file);
        backup.xlog_segment_size = Some(probe.xlog_segment_size);

        current_action = "issuing start backup command".to_string();
        backup.status = BackupStatus::Started;
        coordinator.start_backup(client, backup).await?;
        backup.save(basebackups_directory)?;

        if is_first_backup {
            if let (Some(wal_catalog), Some(begin_wal)) = (wal_catalog, backup.begin_wal.clone()) {
                current_action = "reclaiming WALs older than the first backup".to_string();
                reclaim_wals_before(wal_catalog, &begin_wal)?;
            }
        }

        current_action = "copying files".to_string();
        let backup_destination = backup.directory(basebackups_directory);
        let reuse_source: Option<std::path::PathBuf> = None; // supplied by the manager when reuse is configured
        let outcome = transport
            .run(client, backup, &backup_destination, reuse_source.as_deref(), None)
            .await?;
        if let TransportOutcome::Copied(stats) = outcome {
            backup.size = Some(stats.total_bytes);
        }
        backup.save(basebackups_directory)?;

        current_action = "issuing stop backup command".to_string();
        coordinator.stop_backup(client, backup, &backup_destination).await?;
        backup.status = BackupStatus::WaitingForWals;
        backup.save(basebackups_directory)?;

        Ok(())
    }
    .await;

    if let Err(e) = result {
        backup.status = BackupStatus::Failed;
        let first_line = e.to_string().lines().next().unwrap_or_default().to_string();
        backup.error = Some(format!("failure {} ({})", current_action, first_line));
        // Best-effort stop: if the backup got far enough to have started,
        // try to close it out so the database isn't left mid-backup.
        if backup.begin_time.is_some() {
            let backup_destination = backup.directory(basebackups_directory);
            if let Err(stop_err) = coordinator.stop_backup(client, backup, &backup_destination).await {
                tracing::warn!(error = %stop_err, "best-effort stop backup also failed after the original failure");
                backup.error = Some(format!(
                    "{}; additionally, the best-effort stop backup failed: {}",
                    backup.error.clone().unwrap_or_default(),
                    stop_err
                ));
            }
        }
        let _ = backup.save(basebackups_directory);
        return Err(e);
    }

    Ok(())
}

/// Drops every WAL record older than `begin_wal` from the journal and
/// deletes its on-disk file: a segment older than a server's first
/// backup cannot belong to any restorable backup, so it's dead weight.
fn reclaim_wals_before(wal_catalog: &WalCatalog, begin_wal: &str) -> Result<()> {
    let wals_directory = wal_catalog
        .path()
        .parent()
        .ok_or_else(|| Error::Fatal("xlog.db has no parent directory".into()))?
        .to_path_buf();
    let begin_wal = begin_wal.to_string();
    wal_catalog.rewrite(
        |record| record.is_history() || record.name.as_str() >= begin_wal.as_str(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BackupEndpointResponse, ConcurrentStopResponse, DatabaseProbe};
    use async_trait::async_trait;
    use barman_core::Lsn;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct StubClient {
        in_recovery: bool,
        fail_start: bool,
        switch_wal_called: AtomicBool,
        stream_bytes: u64,
        _log: Mutex<Vec<String>>,
    }

    impl StubClient {
        fn new() -> Self {
            Self {
                in_recovery: false,
                fail_start: false,
                switch_wal_called: AtomicBool::new(false),
                stream_bytes: 1024,
                _log: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DatabaseClient for StubClient {
        async fn probe(&self) -> Result<DatabaseProbe> {
            Ok(DatabaseProbe {
                version: 140000,
                systemid: Some("1234567890".into()),
                pgdata: std::path::PathBuf::from("/var/lib/postgresql/14/main"),
                tablespaces: vec![],
                config_file: std::path::PathBuf::from("/var/lib/postgresql/14/main/postgresql.conf"),
                hba_file: std::path::PathBuf::from("/var/lib/postgresql/14/main/pg_hba.conf"),
                ident_file: std::path::PathBuf::from("/var/lib/postgresql/14/main/pg_ident.conf"),
                xlog_segment_size: barman_core::DEFAULT_XLOG_SEG_SIZE,
            })
        }

        async fn is_in_recovery(&self) -> Result<bool> {
            Ok(self.in_recovery)
        }

        async fn has_backup_helper_extension(&self) -> Result<bool> {
            Ok(true)
        }

        async fn has_native_concurrent_backup(&self) -> Result<bool> {
            Ok(true)
        }

        async fn start_exclusive_backup(&self, _label: &str) -> Result<BackupEndpointResponse> {
            if self.fail_start {
                return Err(Error::CommandFailed {
                    command: "pg_start_backup".into(),
                    status: 1,
                    stderr: "could not start backup".into(),
                });
            }
            Ok(BackupEndpointResponse::Lsn {
                lsn: Lsn::from_parts(0, 0x2000000),
                timeline: Some(1),
            })
        }

        async fn stop_exclusive_backup(&self) -> Result<BackupEndpointResponse> {
            Ok(BackupEndpointResponse::Lsn {
                lsn: Lsn::from_parts(0, 0x4000000),
                timeline: Some(1),
            })
        }

        async fn start_concurrent_backup(&self, _label: &str) -> Result<BackupEndpointResponse> {
            Ok(BackupEndpointResponse::Lsn {
                lsn: Lsn::from_parts(0, 0x2000000),
                timeline: Some(1),
            })
        }

        async fn stop_concurrent_backup(&self) -> Result<ConcurrentStopResponse> {
            Ok(ConcurrentStopResponse {
                end: BackupEndpointResponse::Lsn {
                    lsn: Lsn::from_parts(0, 0x4000000),
                    timeline: Some(1),
                },
                backup_label: "START WAL LOCATION: 0/2000000\n".into(),
            })
        }

        async fn switch_wal(&self) -> Result<()> {
            self.switch_wal_called.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stream_base_backup(&self, _destination: &Path, _bandwidth_limit: Option<u64>) -> Result<u64> {
            Ok(self.stream_bytes)
        }

        async fn supports_streaming_bandwidth_limit(&self) -> Result<bool> {
            Ok(false)
        }

        async fn request_restore_point(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn exclusive_file_copy_remote_runs_start_to_stop() {
        let dir = tempdir().unwrap();
        let pgdata = tempdir().unwrap();
        std::fs::create_dir_all(pgdata.path().join("global")).unwrap();
        std::fs::write(pgdata.path().join("global/pg_control"), b"control").unwrap();

        let client = StubClient::new();
        let mut backup = Backup::new_empty("20240101T000000", "main");
        backup.status = BackupStatus::Empty;
        backup.save(dir.path()).unwrap();

        let transport = Transport::FileCopyRemote(crate::transport::FileCopyRemoteOptions {
            user_exclude: vec![],
            parallel_jobs: 2,
            network_compression: false,
            reuse_mode: barman_copy::ReuseMode::None,
            retry_times: 0,
            retry_sleep: std::time::Duration::from_secs(0),
        });

        // Swap in a pgdata we actually control so the copy has something
        // real to walk.
        let probe_pgdata = pgdata.path().to_path_buf();
        struct PgdataClient(StubClient, std::path::PathBuf);
        #[async_trait]
        impl DatabaseClient for PgdataClient {
            async fn probe(&self) -> Result<DatabaseProbe> {
                let mut p = self.0.probe().await?;
                p.pgdata = self.1.clone();
                Ok(p)
            }
            async fn is_in_recovery(&self) -> Result<bool> {
                self.0.is_in_recovery().await
            }
            async fn has_backup_helper_extension(&self) -> Result<bool> {
                self.0.has_backup_helper_extension().await
            }
            async fn has_native_concurrent_backup(&self) -> Result<bool> {
                self.0.has_native_concurrent_backup().await
            }
            async fn start_exclusive_backup(&self, label: &str) -> Result<BackupEndpointResponse> {
                self.0.start_exclusive_backup(label).await
            }
            async fn stop_exclusive_backup(&self) -> Result<BackupEndpointResponse> {
                self.0.stop_exclusive_backup().await
            }
            async fn start_concurrent_backup(&self, label: &str) -> Result<BackupEndpointResponse> {
                self.0.start_concurrent_backup(label).await
            }
            async fn stop_concurrent_backup(&self) -> Result<ConcurrentStopResponse> {
                self.0.stop_concurrent_backup().await
            }
            async fn switch_wal(&self) -> Result<()> {
                self.0.switch_wal().await
            }
            async fn stream_base_backup(&self, d: &Path, b: Option<u64>) -> Result<u64> {
                self.0.stream_base_backup(d, b).await
            }
            async fn supports_streaming_bandwidth_limit(&self) -> Result<bool> {
                self.0.supports_streaming_bandwidth_limit().await
            }
            async fn request_restore_point(&self, name: &str) -> Result<()> {
                self.0.request_restore_point(name).await
            }
        }
        let client = PgdataClient(client, probe_pgdata);

        execute(
            &client,
            transport,
            BackupCoordination::Exclusive,
            &mut backup,
            dir.path(),
            false,
            None,
        )
        .await
        .unwrap();

        assert_eq!(backup.status, BackupStatus::WaitingForWals);
        assert!(backup.begin_wal.is_some());
        assert!(backup.end_wal.is_some());
        assert!(dir
            .path()
            .join("20240101T000000/pgdata/global/pg_control")
            .exists());
    }

    #[tokio::test]
    async fn exclusive_coordination_rejects_database_in_recovery() {
        let dir = tempdir().unwrap();
        let mut client = StubClient::new();
        client.in_recovery = true;
        let mut backup = Backup::new_empty("20240101T000000", "main");

        let transport = Transport::FileCopyRemote(crate::transport::FileCopyRemoteOptions {
            user_exclude: vec![],
            parallel_jobs: 1,
            network_compression: false,
            reuse_mode: barman_copy::ReuseMode::None,
            retry_times: 0,
            retry_sleep: std::time::Duration::from_secs(0),
        });

        let err = execute(
            &client,
            transport,
            BackupCoordination::Exclusive,
            &mut backup,
            dir.path(),
            false,
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::DatabaseInRecovery));
        assert_eq!(backup.status, BackupStatus::Failed);
        let message = backup.error.unwrap();
        assert!(message.starts_with("failure issuing start backup command"));
    }

    #[tokio::test]
    async fn failed_start_records_action_and_first_line_in_error() {
        let dir = tempdir().unwrap();
        let mut client = StubClient::new();
        client.fail_start = true;
        let mut backup = Backup::new_empty("20240101T000000", "main");

        let transport = Transport::FileCopyRemote(crate::transport::FileCopyRemoteOptions {
            user_exclude: vec![],
            parallel_jobs: 1,
            network_compression: false,
            reuse_mode: barman_copy::ReuseMode::None,
            retry_times: 0,
            retry_sleep: std::time::Duration::from_secs(0),
        });

        let err = execute(
            &client,
            transport,
            BackupCoordination::Exclusive,
            &mut backup,
            dir.path(),
            false,
            None,
        )
        .await;
        assert!(err.is_err());
        assert_eq!(backup.status, BackupStatus::Failed);
        let message = backup.error.unwrap();
        assert!(message.starts_with("failure issuing start backup command"));
        assert!(message.contains("could not start backup"));
    }

    #[test]
    fn database_streaming_cannot_pair_with_exclusive_coordination() {
        let transport = Transport::DatabaseStreaming(crate::transport::DatabaseStreamingOptions {
            bandwidth_limit: None,
            tablespace_bandwidth_limit: Default::default(),
            reuse_mode: barman_copy::ReuseMode::None,
            network_compression: false,
        });
        assert!(validate_combination(&transport, BackupCoordination::Exclusive).is_err());
        assert!(validate_combination(&transport, BackupCoordination::Concurrent).is_ok());
    }
}
