//! Directory tree transfer: walks a [`DirectoryItem`]'s source tree,
//! applies its include/exclude/exclude-and-protect filters, and either
//! copies each surviving file fresh or reuses it from a previous
//! backup's copy when the job's [`ReuseMode`] allows it.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use barman_core::{Error, Result};
use walkdir::WalkDir;

use crate::job::{DirectoryItem, ReuseMode};
use crate::pattern::PatternSet;

pub fn copy_directory(
    item: &DirectoryItem,
    reuse_mode: ReuseMode,
    safe_horizon: Option<SystemTime>,
) -> Result<u64> {
    if !item.source.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("directory {} does not exist", item.source.display()),
        )));
    }
    fs::create_dir_all(&item.destination)?;

    let include = PatternSet::compile(&item.include);
    let exclude = PatternSet::compile(&item.exclude);
    let protect = PatternSet::compile(&item.exclude_and_protect);

    let mut total_bytes = 0u64;

    for entry in WalkDir::new(&item.source).into_iter() {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        let relative = entry
            .path()
            .strip_prefix(&item.source)
            .expect("walkdir entries are always under their root");
        if relative.as_os_str().is_empty() {
            continue; // the root itself
        }
        let relative_str = relative.to_string_lossy().replace('\\', "/");

        if protect.is_match(&relative_str) {
            continue;
        }
        if !include.is_empty() && !include.is_match(&relative_str) && !entry.file_type().is_dir() {
            continue;
        }
        if exclude.is_match(&relative_str) {
            continue;
        }

        let destination = item.destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)?;
            continue;
        }
        if !entry.file_type().is_file() {
            continue; // symlinks and other special files are not bulk-copied
        }

        let source_path = entry.path();
        let reused = item
            .reuse_source
            .as_ref()
            .filter(|_| reuse_mode != ReuseMode::None)
            .and_then(|reuse_root| try_reuse(reuse_mode, reuse_root, relative, source_path, &destination, safe_horizon));

        total_bytes += match reused {
            Some(bytes) => bytes?,
            None => fs::copy(source_path, &destination)?,
        };
    }

    prune_stale(item, &protect)?;

    Ok(total_bytes)
}

/// Removes files under `item.destination` that no longer exist under
/// `item.source`, so a destination left over from an earlier attempt
/// converges to exactly what the current source contains. Anything
/// matched by `exclude-and-protect` is left alone even if it has no
/// counterpart in the source tree — that's the whole point of
/// protecting it.
fn prune_stale(item: &DirectoryItem, protect: &PatternSet) -> Result<()> {
    if !item.destination.is_dir() {
        return Ok(());
    }
    let mut stale = Vec::new();
    for entry in WalkDir::new(&item.destination).contents_first(true) {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        let relative = entry
            .path()
            .strip_prefix(&item.destination)
            .expect("walkdir entries are always under their root");
        if relative.as_os_str().is_empty() {
            continue;
        }
        let relative_str = relative.to_string_lossy().replace('\\', "/");
        if protect.is_match(&relative_str) {
            continue;
        }
        if !item.source.join(relative).exists() {
            stale.push(entry.path().to_path_buf());
        }
    }
    for path in stale {
        if path.is_dir() {
            let _ = fs::remove_dir(&path); // only removes if now empty
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Attempts to satisfy `destination` from `reuse_root` instead of a fresh
/// copy from `source_path`. Returns `None` when the file isn't eligible
/// for reuse (missing from the reuse source, or changed since), meaning
/// the caller should fall back to a full copy.
fn try_reuse(
    mode: ReuseMode,
    reuse_root: &Path,
    relative: &Path,
    source_path: &Path,
    destination: &Path,
    safe_horizon: Option<SystemTime>,
) -> Option<Result<u64>> {
    let reuse_path = reuse_root.join(relative);
    let reuse_meta = fs::metadata(&reuse_path).ok()?;
    let source_meta = fs::metadata(source_path).ok()?;

    let unchanged = source_meta.len() == reuse_meta.len()
        && source_meta.modified().ok() == reuse_meta.modified().ok()
        && safe_horizon
            .zip(source_meta.modified().ok())
            .map(|(horizon, mtime)| mtime < horizon)
            .unwrap_or(false);

    if !unchanged {
        return None;
    }

    Some(match mode {
        ReuseMode::Link => fs::hard_link(&reuse_path, destination)
            .or_else(|_| fs::copy(&reuse_path, destination).map(|_| ()))
            .map(|_| reuse_meta.len())
            .map_err(Error::Io),
        ReuseMode::Copy => fs::copy(&reuse_path, destination).map_err(Error::Io),
        ReuseMode::None => unreachable!("reuse attempted with ReuseMode::None"),
    })
}
