//! The CLI's only `DatabaseClient` implementation.
//!
//! `DatabaseClient` is an opaque external capability by design (spec.md
//! §1/§4.5): a real implementation opens a libpq connection or shells out
//! to `psql`/`pg_basebackup`, and building that integration is explicitly
//! not this core's job. `NullDatabaseClient` exists only so the CLI's
//! `backup`/`recover`/`switch-wal` dispatch type-checks against a concrete
//! `dyn DatabaseClient`; every method fails with a clear message naming
//! the missing capability rather than silently pretending to succeed.

use async_trait::async_trait;
use barman_core::{Error, Result};
use barman_executor::{BackupEndpointResponse, ConcurrentStopResponse, DatabaseClient, DatabaseProbe};
use std::path::Path;

pub struct NullDatabaseClient;

fn no_database() -> Error {
    Error::Fatal(
        "this command requires a live database connection, which barman-cli does not provide; \
         the database client is an external capability this core treats as opaque"
            .to_string(),
    )
}

#[async_trait]
impl DatabaseClient for NullDatabaseClient {
    async fn probe(&self) -> Result<DatabaseProbe> {
        Err(no_database())
    }

    async fn is_in_recovery(&self) -> Result<bool> {
        Err(no_database())
    }

    async fn has_backup_helper_extension(&self) -> Result<bool> {
        Err(no_database())
    }

    async fn has_native_concurrent_backup(&self) -> Result<bool> {
        Err(no_database())
    }

    async fn start_exclusive_backup(&self, _label: &str) -> Result<BackupEndpointResponse> {
        Err(no_database())
    }

    async fn stop_exclusive_backup(&self) -> Result<BackupEndpointResponse> {
        Err(no_database())
    }

    async fn start_concurrent_backup(&self, _label: &str) -> Result<BackupEndpointResponse> {
        Err(no_database())
    }

    async fn stop_concurrent_backup(&self) -> Result<ConcurrentStopResponse> {
        Err(no_database())
    }

    async fn switch_wal(&self) -> Result<()> {
        Err(no_database())
    }

    async fn stream_base_backup(&self, _destination: &Path, _bandwidth_limit: Option<u64>) -> Result<u64> {
        Err(no_database())
    }

    async fn supports_streaming_bandwidth_limit(&self) -> Result<bool> {
        Err(no_database())
    }

    async fn request_restore_point(&self, _name: &str) -> Result<()> {
        Err(no_database())
    }
}
