//! Bulk copy job description and execution.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use barman_core::{Error, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Which of the four fixed classes an item belongs to. Copy order is
/// pinned to this enum's declaration order: every tablespace, then
/// pgdata, then `pg_control`, then external config files. `pg_control`
/// must land last among data-bearing files so a crash mid-copy never
/// leaves a destination that looks consistent but isn't.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemClass {
    Tablespace,
    PgData,
    PgControl,
    Config,
}

/// One directory to copy, with its filter rules.
#[derive(Debug, Clone)]
pub struct DirectoryItem {
    pub label: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Matched paths are neither transferred nor deleted, even when the
    /// directory is being differentially ("smart") synced against a reuse
    /// source.
    pub exclude_and_protect: Vec<String>,
    pub bandwidth_limit: Option<u64>,
    /// A previous backup's copy of this directory, used for incremental
    /// reuse (hardlink or local-copy-then-diff) when the job's global
    /// `reuse_mode` is not `None`.
    pub reuse_source: Option<PathBuf>,
    pub class: ItemClass,
}

/// One file to copy.
#[derive(Debug, Clone)]
pub struct FileItem {
    pub label: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub optional: bool,
    pub class: ItemClass,
}

#[derive(Debug, Clone)]
pub enum CopyItem {
    Directory(DirectoryItem),
    File(FileItem),
}

impl CopyItem {
    pub fn label(&self) -> &str {
        match self {
            CopyItem::Directory(d) => &d.label,
            CopyItem::File(f) => &f.label,
        }
    }

    pub fn class(&self) -> ItemClass {
        match self {
            CopyItem::Directory(d) => d.class,
            CopyItem::File(f) => f.class,
        }
    }
}

/// How incremental reuse against a previous backup is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseMode {
    None,
    /// Copy unchanged files from the reuse source, then diff against the
    /// live source.
    Copy,
    /// Hardlink unchanged files from the reuse source.
    Link,
}

/// Invoked between retry attempts on a failed item; typically wipes the
/// partially-written destination so the next attempt starts clean.
#[async_trait]
pub trait RetryCallback: Send + Sync {
    async fn before_retry(&self, item_label: &str, attempt: u32, error: &Error);
}

/// A callback that does nothing between retries beyond the configured
/// sleep; useful for tests and for transports that don't need to reset
/// destination state.
pub struct NoopRetryCallback;

#[async_trait]
impl RetryCallback for NoopRetryCallback {
    async fn before_retry(&self, _item_label: &str, _attempt: u32, _error: &Error) {}
}

/// Global parameters for one bulk copy job.
pub struct CopyJob {
    pub items: Vec<CopyItem>,
    pub parallel_jobs: usize,
    pub network_compression: bool,
    pub reuse_mode: ReuseMode,
    /// Files with an mtime older than this may be delta-skipped against
    /// the reuse source without a full byte comparison.
    pub safe_horizon: Option<std::time::SystemTime>,
    pub retry_times: u32,
    pub retry_sleep: Duration,
    pub retry_callback: Arc<dyn RetryCallback>,
}

impl CopyJob {
    pub fn new(items: Vec<CopyItem>) -> Self {
        Self {
            items,
            parallel_jobs: 1,
            network_compression: false,
            reuse_mode: ReuseMode::None,
            safe_horizon: None,
            retry_times: 0,
            retry_sleep: Duration::from_secs(0),
            retry_callback: Arc::new(NoopRetryCallback),
        }
    }
}

/// Per-class byte counters plus total wall time, returned by a completed
/// job.
#[derive(Debug, Clone, Default)]
pub struct CopyStats {
    pub total_time: Duration,
    pub bytes_by_class: std::collections::HashMap<ItemClass, u64>,
    pub total_bytes: u64,
}

/// Runs `job` to completion: every tablespace, then pgdata, then
/// `pg_control`, then config files, each class waiting on the previous
/// one to fully land before starting (only items *within* a class run
/// concurrently, up to `job.parallel_jobs`).
///
/// Returns aggregate statistics on success, or the first irrecoverable
/// `DataTransferFailure` (after retries) on failure — at which point any
/// still-running siblings in the same class are allowed to finish so
/// partial destination state is at least internally consistent for the
/// items that did complete.
pub async fn copy(job: CopyJob) -> Result<CopyStats> {
    let started = Instant::now();
    let mut stats = CopyStats::default();

    let mut by_class: std::collections::BTreeMap<ItemClass, Vec<CopyItem>> = Default::default();
    for item in job.items {
        by_class.entry(item.class()).or_default().push(item);
    }

    let semaphore = Arc::new(Semaphore::new(job.parallel_jobs.max(1)));
    let retry_times = job.retry_times;
    let retry_sleep = job.retry_sleep;
    let retry_callback = job.retry_callback.clone();
    let reuse_mode = job.reuse_mode;
    let safe_horizon = job.safe_horizon;

    for class in [
        ItemClass::Tablespace,
        ItemClass::PgData,
        ItemClass::PgControl,
        ItemClass::Config,
    ] {
        let Some(items) = by_class.remove(&class) else {
            continue;
        };
        let mut set = JoinSet::new();
        for item in items {
            let permit = semaphore.clone();
            let retry_callback = retry_callback.clone();
            set.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore not closed");
                copy_item_with_retry(item, reuse_mode, safe_horizon, retry_times, retry_sleep, retry_callback)
                    .await
            });
        }
        while let Some(res) = set.join_next().await {
            let (label, class, bytes) = res.map_err(|e| Error::Fatal(format!("copy task panicked: {e}")))??;
            stats.total_bytes += bytes;
            *stats.bytes_by_class.entry(class).or_insert(0) += bytes;
            tracing::debug!(item = %label, bytes, "copy item completed");
        }
    }

    stats.total_time = started.elapsed();
    Ok(stats)
}

async fn copy_item_with_retry(
    item: CopyItem,
    reuse_mode: ReuseMode,
    safe_horizon: Option<std::time::SystemTime>,
    retry_times: u32,
    retry_sleep: Duration,
    retry_callback: Arc<dyn RetryCallback>,
) -> Result<(String, ItemClass, u64)> {
    let label = item.label().to_string();
    let class = item.class();
    let mut attempt = 0u32;
    loop {
        let result = tokio::task::spawn_blocking({
            let item = item.clone();
            move || copy_one_item(&item, reuse_mode, safe_horizon)
        })
        .await
        .map_err(|e| Error::Fatal(format!("copy task panicked: {e}")))?;

        match result {
            Ok(bytes) => return Ok((label, class, bytes)),
            Err(e) if attempt < retry_times => {
                attempt += 1;
                retry_callback.before_retry(&label, attempt, &e).await;
                tokio::time::sleep(retry_sleep).await;
            }
            Err(e) => {
                return Err(Error::DataTransferFailure {
                    item: label,
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn copy_one_item(
    item: &CopyItem,
    reuse_mode: ReuseMode,
    safe_horizon: Option<std::time::SystemTime>,
) -> Result<u64> {
    match item {
        CopyItem::File(f) => copy_one_file(&f.source, &f.destination, f.optional),
        CopyItem::Directory(d) => crate::treecopy::copy_directory(d, reuse_mode, safe_horizon),
    }
}

fn copy_one_file(source: &std::path::Path, destination: &std::path::Path, optional: bool) -> Result<u64> {
    if !source.exists() {
        if optional {
            return Ok(0);
        }
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("required file {} is missing", source.display()),
        )));
    }
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = std::fs::copy(source, destination)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn copy_runs_classes_in_fixed_order_and_reports_bytes() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        std::fs::write(src_dir.path().join("pg_control"), b"PGDATA_CONTROL").unwrap();
        std::fs::write(src_dir.path().join("postgresql.conf"), b"shared_buffers=1GB").unwrap();

        let job = CopyJob::new(vec![
            CopyItem::File(FileItem {
                label: "pg_control".into(),
                source: src_dir.path().join("pg_control"),
                destination: dst_dir.path().join("pg_control"),
                optional: false,
                class: ItemClass::PgControl,
            }),
            CopyItem::File(FileItem {
                label: "postgresql.conf".into(),
                source: src_dir.path().join("postgresql.conf"),
                destination: dst_dir.path().join("postgresql.conf"),
                optional: false,
                class: ItemClass::Config,
            }),
        ]);
        let stats = copy(job).await.unwrap();
        assert!(stats.total_bytes > 0);
        assert!(dst_dir.path().join("pg_control").exists());
        assert!(dst_dir.path().join("postgresql.conf").exists());
    }

    #[tokio::test]
    async fn missing_optional_file_is_skipped_without_error() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let job = CopyJob::new(vec![CopyItem::File(FileItem {
            label: "ident.conf".into(),
            source: src_dir.path().join("does-not-exist"),
            destination: dst_dir.path().join("ident.conf"),
            optional: true,
            class: ItemClass::Config,
        })]);
        let stats = copy(job).await.unwrap();
        assert_eq!(stats.total_bytes, 0);
        assert!(!dst_dir.path().join("ident.conf").exists());
    }

    #[tokio::test]
    async fn missing_required_file_fails_with_data_transfer_failure() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let job = CopyJob::new(vec![CopyItem::File(FileItem {
            label: "pg_control".into(),
            source: src_dir.path().join("does-not-exist"),
            destination: dst_dir.path().join("pg_control"),
            optional: false,
            class: ItemClass::PgControl,
        })]);
        let err = copy(job).await.unwrap_err();
        assert!(matches!(err, Error::DataTransferFailure { .. }));
    }
}
