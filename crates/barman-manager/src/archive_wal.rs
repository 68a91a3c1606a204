//! `archiveWal`: moves incoming WAL segments from a spool directory into
//! the archive tree and records them in the WAL catalog.
//!
//! Archiving is a plug-in port: idempotent, at-least-once, and failures
//! of one archiver must not block the other. Two archivers are
//! registered per server — one draining the file-drop spool (`incoming/`,
//! fed by the database's `archive_command`) and one draining the
//! streaming spool (`streaming/`, fed by a WAL-receiver subprocess) — and
//! `archive_wal` runs both, collecting rather than short-circuiting on a
//! per-archiver failure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use barman_catalog::{WalCatalog, WalRecord};
use barman_core::{is_any_xlog_file, Result};

use crate::hooks;

/// One source of incoming WAL files. `FileDropArchiver` and
/// `StreamingArchiver` differ only in which spool directory they drain
/// and what they're named in logs; the move-validate-catalog logic is
/// shared.
pub trait Archiver: Send + Sync {
    fn name(&self) -> &'static str;
    fn spool_directory(&self) -> &Path;
}

pub struct FileDropArchiver {
    pub incoming_directory: PathBuf,
}

impl Archiver for FileDropArchiver {
    fn name(&self) -> &'static str {
        "file-drop"
    }
    fn spool_directory(&self) -> &Path {
        &self.incoming_directory
    }
}

pub struct StreamingArchiver {
    pub streaming_directory: PathBuf,
}

impl Archiver for StreamingArchiver {
    fn name(&self) -> &'static str {
        "streaming"
    }
    fn spool_directory(&self) -> &Path {
        &self.streaming_directory
    }
}

/// What happened to one archiver's spool during an `archive_wal` tick.
#[derive(Debug, Default)]
pub struct ArchiveOutcome {
    pub archived: Vec<String>,
    pub quarantined: Vec<String>,
}

/// Drains every registered archiver's spool into `wals_directory`,
/// appending each successfully archived segment to `wal_catalog`.
/// Pre/post WAL-archive hooks bracket the whole batch, matching the
/// plain fire-and-continue contract every other hook point in this
/// crate uses.
///
/// One archiver's failure (its spool became unreadable, a rename raced
/// with something else) is logged and does not prevent the others from
/// running, and does not fail the overall call — same tolerance as
/// `cron`, which must never let one server's trouble take down the
/// sweep for the rest. A failed archiver is simply absent from the
/// returned map.
pub async fn archive_wal(
    archivers: &[Box<dyn Archiver>],
    wals_directory: &Path,
    wal_catalog: &WalCatalog,
    server_name: &str,
    pre_archive_script: Option<&PathBuf>,
    post_archive_script: Option<&PathBuf>,
) -> Result<HashMap<&'static str, ArchiveOutcome>> {
    let env = HashMap::new();
    hooks::run_plain_hook(pre_archive_script, server_name, &env).await?;

    let mut results = HashMap::new();

    for archiver in archivers {
        match drain_one(archiver.as_ref(), wals_directory, wal_catalog) {
            Ok(outcome) => {
                results.insert(archiver.name(), outcome);
            }
            Err(e) => {
                tracing::warn!(
                    archiver = archiver.name(),
                    error = %e,
                    "archiver failed; continuing with the remaining archivers"
                );
            }
        }
    }

    hooks::run_plain_hook(post_archive_script, server_name, &env).await?;

    Ok(results)
}

/// Applied to an empty spool, this is a no-op: nothing to move, nothing
/// appended to the catalog.
fn drain_one(
    archiver: &dyn Archiver,
    wals_directory: &Path,
    wal_catalog: &WalCatalog,
) -> Result<ArchiveOutcome> {
    let spool = archiver.spool_directory();
    let mut outcome = ArchiveOutcome::default();
    if !spool.is_dir() {
        return Ok(outcome);
    }

    let mut entries: Vec<_> = std::fs::read_dir(spool)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        if !entry.path().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_string();
        if file_name.ends_with(".tmp") {
            continue;
        }

        if !is_any_xlog_file(&file_name) {
            quarantine(&entry.path(), &file_name, "unrecognised-file-name", wals_directory)?;
            outcome.quarantined.push(file_name);
            continue;
        }

        match archive_one_segment(&entry.path(), &file_name, wals_directory, wal_catalog) {
            Ok(()) => outcome.archived.push(file_name),
            Err(e) => {
                tracing::warn!(file = %file_name, error = %e, "failed to archive WAL segment, quarantining");
                quarantine(&entry.path(), &file_name, "archive-failed", wals_directory)?;
                outcome.quarantined.push(file_name);
            }
        }
    }

    Ok(outcome)
}

fn archive_one_segment(
    source: &Path,
    file_name: &str,
    wals_directory: &Path,
    wal_catalog: &WalCatalog,
) -> Result<()> {
    let hash_dir = barman_core::hash_dir(file_name)?;
    let destination_dir = wals_directory.join(&hash_dir);
    std::fs::create_dir_all(&destination_dir)?;
    let destination = destination_dir.join(file_name);

    let metadata = source.metadata()?;
    let size = metadata.len();
    let modified = metadata.modified()?;
    let time = modified
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();

    std::fs::rename(source, &destination).or_else(|_| {
        std::fs::copy(source, &destination)?;
        std::fs::remove_file(source)
    })?;

    let record = WalRecord::new(file_name.to_string(), size, time, None);
    wal_catalog.append(&record)
}

/// Moves a spool file that could not be archived into `errors/` with a
/// reason suffix, so a bad drop never blocks the rest of the spool and
/// is still visible for operator triage.
fn quarantine(source: &Path, file_name: &str, reason: &str, wals_directory: &Path) -> Result<()> {
    let errors_dir = wals_directory
        .parent()
        .map(|server_home| server_home.join("errors"))
        .unwrap_or_else(|| wals_directory.join("errors"));
    std::fs::create_dir_all(&errors_dir)?;
    let destination = errors_dir.join(format!("{}.{}", file_name, reason));
    std::fs::rename(source, &destination).or_else(|_| {
        std::fs::copy(source, &destination)?;
        std::fs::remove_file(source)
    })?;
    tracing::warn!(file = %file_name, reason, "quarantined incoming WAL file");
    Ok(())
}
