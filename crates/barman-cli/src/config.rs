//! Loads a server's configuration from `<barman_home>/<server>.json`.
//!
//! Parsing barman's native `.ini` configuration format is explicitly out
//! of the core's scope (spec.md §1); this loader is the CLI's own ambient
//! replacement for it, not a re-implementation of that format. Every field
//! is optional and layers over [`ServerConfig::with_defaults`], so a bare
//! `{}` file is a valid (if minimal) configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use barman_core::{BackupCoordination, BackupTransport, Error, HookScripts, Result, ReuseBackupMode, ServerConfig};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
struct ServerConfigFile {
    transport: Option<BackupTransport>,
    coordination: Option<BackupCoordination>,
    compression: Option<String>,
    retention_policy: Option<String>,
    wal_retention_policy: Option<String>,
    minimum_redundancy: Option<u32>,
    parallel_jobs: Option<usize>,
    reuse_backup: Option<ReuseBackupMode>,
    network_compression: Option<bool>,
    bandwidth_limit: Option<u64>,
    tablespace_bandwidth_limit: Option<HashMap<String, u64>>,
    ssh_command: Option<String>,
    last_backup_maximum_age_secs: Option<i64>,
    hooks: Option<HookScripts>,
}

/// Loads `<barman_home>/<server_name>.json` if present and merges it onto
/// `ServerConfig::with_defaults(server_name, barman_home)`. A missing file
/// is not an error: it means "use the defaults", matching how a freshly
/// registered passive-mirror server has nothing to configure yet.
pub fn load_server_config(barman_home: &Path, server_name: &str) -> Result<ServerConfig> {
    let mut config = ServerConfig::with_defaults(server_name, barman_home.to_path_buf());

    let config_path = barman_home.join(format!("{}.json", server_name));
    let text = match std::fs::read_to_string(&config_path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(config),
        Err(e) => return Err(Error::Io(e)),
    };

    let file: ServerConfigFile = serde_json::from_str(&text).map_err(|e| {
        Error::ConfigError(format!("{}: {}", config_path.display(), e))
    })?;

    if let Some(v) = file.transport {
        config.transport = v;
    }
    if let Some(v) = file.coordination {
        config.coordination = v;
    }
    if file.compression.is_some() {
        config.compression = file.compression;
    }
    if file.retention_policy.is_some() {
        config.retention_policy = file.retention_policy;
    }
    if file.wal_retention_policy.is_some() {
        config.wal_retention_policy = file.wal_retention_policy;
    }
    if let Some(v) = file.minimum_redundancy {
        config.minimum_redundancy = v;
    }
    if let Some(v) = file.parallel_jobs {
        config.parallel_jobs = v;
    }
    if let Some(v) = file.reuse_backup {
        config.reuse_backup = v;
    }
    if let Some(v) = file.network_compression {
        config.network_compression = v;
    }
    if file.bandwidth_limit.is_some() {
        config.bandwidth_limit = file.bandwidth_limit;
    }
    if let Some(v) = file.tablespace_bandwidth_limit {
        config.tablespace_bandwidth_limit = v;
    }
    if file.ssh_command.is_some() {
        config.ssh_command = file.ssh_command;
    }
    if file.last_backup_maximum_age_secs.is_some() {
        config.last_backup_maximum_age_secs = file.last_backup_maximum_age_secs;
    }
    if let Some(v) = file.hooks {
        config.hooks = v;
    }

    Ok(config)
}

/// The default `barman_home`: `$BARMAN_HOME`, or `/var/lib/barman` when unset.
pub fn default_barman_home() -> PathBuf {
    std::env::var_os("BARMAN_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/var/lib/barman"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_config_file_is_just_defaults() {
        let dir = tempdir().unwrap();
        let config = load_server_config(dir.path(), "main").unwrap();
        assert_eq!(config.minimum_redundancy, 0);
        assert_eq!(config.parallel_jobs, 1);
    }

    #[test]
    fn overrides_layer_onto_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("main.json"),
            r#"{"minimum_redundancy": 3, "retention_policy": "REDUNDANCY 3"}"#,
        )
        .unwrap();
        let config = load_server_config(dir.path(), "main").unwrap();
        assert_eq!(config.minimum_redundancy, 3);
        assert_eq!(config.retention_policy.as_deref(), Some("REDUNDANCY 3"));
        assert_eq!(config.parallel_jobs, 1);
    }

    #[test]
    fn malformed_config_file_is_a_config_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("main.json"), "not json").unwrap();
        assert!(matches!(
            load_server_config(dir.path(), "main"),
            Err(Error::ConfigError(_))
        ));
    }
}
