//! `get-wal`, `put-wal`, `switch-wal`, `receive-wal`.
//!
//! `get-wal`/`put-wal` only ever touch the local archive and incoming
//! spool, so they need no database connection. `switch-wal` and
//! `receive-wal` do, and fail through [`NullDatabaseClient`] with the same
//! boundary error the rest of this crate uses for that.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use barman_core::{Error, Result, SegmentName, ServerConfig};
use barman_executor::DatabaseClient;

use crate::client::NullDatabaseClient;

/// `get-wal <segment>`: writes the archived segment's bytes to stdout, or
/// into `<output_directory>/<segment>` when one is given. `peek` instead
/// lists the next `peek` segment names on or after `segment`, without
/// transferring anything.
pub fn get_wal(
    config: &ServerConfig,
    segment: &str,
    output_directory: Option<&Path>,
    peek: Option<usize>,
) -> Result<()> {
    if let Some(n) = peek {
        for name in peek_segments(config, segment, n)? {
            println!("{}", name);
        }
        return Ok(());
    }

    let source = locate_segment(config, segment)?;
    let mut bytes = Vec::new();
    std::fs::File::open(&source)?.read_to_end(&mut bytes)?;

    match output_directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            std::fs::write(dir.join(segment), &bytes)?;
        }
        None => {
            std::io::stdout().write_all(&bytes)?;
        }
    }
    Ok(())
}

fn locate_segment(config: &ServerConfig, segment: &str) -> Result<PathBuf> {
    let path = if segment.ends_with(".history") {
        config.wals_directory.join(segment)
    } else {
        SegmentName::parse(segment.split('.').next().unwrap_or(segment))?;
        let hash_dir = barman_core::hash_dir(segment)?;
        config.wals_directory.join(hash_dir).join(segment)
    };
    if !path.is_file() {
        return Err(Error::Fatal(format!("WAL segment {} not found in the archive", segment)));
    }
    Ok(path)
}

/// Names of up to `n` archived segments at or after `segment`, in archive
/// order. Uses the WAL Catalog rather than the hashed directory layout
/// directly, since the journal is already sorted and deduplicated.
fn peek_segments(config: &ServerConfig, segment: &str, n: usize) -> Result<Vec<String>> {
    let wal_catalog = barman_catalog::WalCatalog::new(config.wals_directory.join("xlog.db"));
    let mut names: Vec<String> = wal_catalog.scan()?.into_iter().map(|r| r.name).collect();
    names.sort();
    Ok(names
        .into_iter()
        .filter(|name| name.as_str() >= segment)
        .take(n)
        .collect())
}

/// `put-wal`: reads one segment's bytes from stdin and drops it into
/// `incoming_wals_directory`, the same spool [`barman_manager::archive_wal`]'s
/// `FileDropArchiver` already knows how to pick up.
pub fn put_wal(config: &ServerConfig, segment: &str) -> Result<()> {
    SegmentName::parse(segment.split('.').next().unwrap_or(segment))?;
    let mut bytes = Vec::new();
    std::io::stdin().read_to_end(&mut bytes)?;
    std::fs::create_dir_all(&config.incoming_wals_directory)?;
    std::fs::write(config.incoming_wals_directory.join(segment), &bytes)?;
    Ok(())
}

/// `switch-wal`: asks the database to switch to a new WAL segment. This
/// crate carries no live database connection, so this always fails with
/// the same boundary error every `NullDatabaseClient` method does; the
/// flags are still accepted so the command line shape matches a real
/// deployment's.
pub async fn switch_wal(
    _force: bool,
    _archive: bool,
    _archive_timeout: Option<std::time::Duration>,
) -> Result<()> {
    NullDatabaseClient.switch_wal().await
}

/// `receive-wal`: continuous streaming replication into the archive.
/// Modeling a long-running `pg_receivewal`-style subprocess, or
/// replication-slot lifecycle management, is out of scope for the
/// `DatabaseClient` boundary this crate defines; this reports that
/// plainly rather than faking a connection.
pub fn receive_wal(
    _stop: bool,
    _reset: bool,
    _create_slot: bool,
    _drop_slot: bool,
) -> Result<()> {
    Err(Error::Fatal(
        "receive-wal requires a continuously running streaming-replication connection, \
         which barman-cli does not provide"
            .to_string(),
    ))
}
