//! `diagnose`, `replication-status`.

use barman_catalog::{BackupCatalog, WalCatalog};
use barman_core::{Error, Result, ServerConfig};
use serde::Serialize;

#[derive(Serialize)]
struct Diagnosis {
    config: ServerConfig,
    backups: Vec<barman_catalog::Backup>,
    wals: usize,
}

/// `diagnose`: a single JSON document dumping this server's configuration
/// and the full state of its catalogs, for bug reports and support
/// requests. Unlike every other command in this crate, the machine-
/// readable form is the point, so this always prints JSON rather than a
/// formatted table.
pub fn diagnose(config: &ServerConfig) -> Result<()> {
    let catalog = BackupCatalog::load(&config.basebackups_directory)?;
    let wal_catalog = WalCatalog::new(config.wals_directory.join("xlog.db"));

    let diagnosis = Diagnosis {
        config: config.clone(),
        backups: catalog.iter().cloned().collect(),
        wals: wal_catalog.scan()?.len(),
    };

    let text = serde_json::to_string_pretty(&diagnosis)
        .map_err(|e| Error::Fatal(format!("failed to serialize diagnosis: {}", e)))?;
    println!("{}", text);
    Ok(())
}

/// `replication-status`: queries `pg_stat_replication` for the state of
/// every connected streaming client. That query is the database
/// connection's job, not this crate's; like `receive-wal`, this reports
/// the boundary rather than faking a reply.
pub fn replication_status(_config: &ServerConfig) -> Result<()> {
    Err(Error::Fatal(
        "replication-status requires a live database connection, which barman-cli does not provide"
            .to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn diagnose_succeeds_on_an_empty_server() {
        let dir = tempdir().unwrap();
        let config = ServerConfig::with_defaults("main", dir.path().to_path_buf());
        std::fs::create_dir_all(&config.basebackups_directory).unwrap();
        assert!(diagnose(&config).is_ok());
    }

    #[test]
    fn replication_status_fails_without_a_database_connection() {
        let dir = tempdir().unwrap();
        let config = ServerConfig::with_defaults("main", dir.path().to_path_buf());
        assert!(replication_status(&config).is_err());
    }
}
