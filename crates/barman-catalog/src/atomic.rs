//! "Write temp sibling, fsync, rename, fsync directory" — the atomic save
//! pattern used by every persisted catalog file (`backup.info`, `xlog.db`).

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use barman_core::Result;

/// Writes `contents` to `path` atomically: nothing ever observes a
/// partially-written file. On success the containing directory has also
/// been fsynced, so the rename itself is durable across a crash.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tmp");
    let tmp_path = dir.join(format!(".{}.tmp-{}", file_name, std::process::id()));

    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(contents)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    fsync_dir(dir)?;
    Ok(())
}

/// fsyncs a directory so that prior renames/creates/removals within it are
/// durable. A no-op-ish best-effort on platforms where opening a directory
/// for fsync is not meaningful; errors here are still surfaced since the
/// durability guarantee would otherwise silently not hold.
pub fn fsync_dir(dir: &Path) -> Result<()> {
    let dir_file = File::open(dir)?;
    dir_file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("thing.txt");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn write_atomic_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("thing.txt");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }
}
