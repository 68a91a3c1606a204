//! WAL segment records and the `xlog.db` journal.
//!
//! `xlog.db` is a tab-separated text file, one record per line:
//! `name\tsize\ttime\tcompression\n`. `compression` may be the literal
//! `None`; old lines written before compression support existed simply
//! lack the field and are read the same way.

use barman_core::{is_any_xlog_file, is_history_file, Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::atomic::fsync_dir;

/// One archived WAL (or `.history`) file as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub name: String,
    pub size: u64,
    pub time: f64,
    pub compression: Option<String>,
}

impl WalRecord {
    pub fn new(name: impl Into<String>, size: u64, time: f64, compression: Option<String>) -> Self {
        Self {
            name: name.into(),
            size,
            time,
            compression,
        }
    }

    pub fn is_history(&self) -> bool {
        is_history_file(&self.name)
    }

    /// Renders the tab-separated journal line, without trailing newline.
    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.name,
            self.size,
            self.time,
            self.compression.as_deref().unwrap_or("None")
        )
    }

    /// Parses one journal line. A missing fourth field (old-format lines
    /// written before compression tagging existed) is treated as `None`,
    /// same as an explicit `None` literal.
    pub fn from_line(line: &str, path: &Path) -> Result<Self> {
        let mut parts = line.split('\t');
        let name = parts.next().ok_or_else(|| Error::CatalogParse {
            path: path.to_path_buf(),
            line: line.to_string(),
            reason: "missing name field".into(),
        })?;
        let size = parts
            .next()
            .ok_or_else(|| Error::CatalogParse {
                path: path.to_path_buf(),
                line: line.to_string(),
                reason: "missing size field".into(),
            })?
            .parse::<u64>()
            .map_err(|_| Error::CatalogParse {
                path: path.to_path_buf(),
                line: line.to_string(),
                reason: "size is not an integer".into(),
            })?;
        let time = parts
            .next()
            .ok_or_else(|| Error::CatalogParse {
                path: path.to_path_buf(),
                line: line.to_string(),
                reason: "missing time field".into(),
            })?
            .parse::<f64>()
            .map_err(|_| Error::CatalogParse {
                path: path.to_path_buf(),
                line: line.to_string(),
                reason: "time is not a float".into(),
            })?;
        let compression = match parts.next() {
            None | Some("None") | Some("") => None,
            Some(tag) => Some(tag.to_string()),
        };
        Ok(WalRecord {
            name: name.to_string(),
            size,
            time,
            compression,
        })
    }
}

/// The append-only journal of archived WAL segments for one server.
pub struct WalCatalog {
    path: PathBuf,
}

impl WalCatalog {
    /// `path` is the `xlog.db` file itself (conventionally
    /// `<server>/wals/xlog.db`).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record under an exclusive lock on the journal file,
    /// fsyncing both the file and its containing directory before
    /// returning.
    pub fn append(&self, record: &WalRecord) -> Result<()> {
        use fs2::FileExt;
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let result = (|| -> Result<()> {
            writeln!(file, "{}", record.to_line())?;
            file.sync_all()?;
            Ok(())
        })();
        FileExt::unlock(&file)?;
        result?;
        if let Some(dir) = self.path.parent() {
            fsync_dir(dir)?;
        }
        Ok(())
    }

    /// Iterates every record currently in the journal, in file order
    /// (archive arrival order).
    pub fn scan(&self) -> Result<Vec<WalRecord>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(WalRecord::from_line(&line, &self.path)?);
        }
        Ok(out)
    }

    /// The reclamation primitive: writes a new journal containing every
    /// record for which `keep(record)` is true, invoking `on_drop` for
    /// each dropped record *before* the new file replaces the old one.
    /// `on_drop`'s own failure does not abort the rewrite — the record is
    /// still dropped from the journal and a warning is logged, since by
    /// the time we're here the underlying file is typically already gone
    /// or unreachable and retrying the journal write buys nothing.
    pub fn rewrite(
        &self,
        mut keep: impl FnMut(&WalRecord) -> bool,
        mut on_drop: impl FnMut(&WalRecord) -> Result<()>,
    ) -> Result<()> {
        let records = self.scan()?;
        let mut kept_text = String::new();
        for record in &records {
            if keep(record) {
                kept_text.push_str(&record.to_line());
                kept_text.push('\n');
            } else if let Err(e) = on_drop(record) {
                tracing::warn!(
                    wal = %record.name,
                    error = %e,
                    "failed to remove reclaimed WAL segment; dropping it from the journal anyway"
                );
            }
        }
        crate::atomic::write_atomic(&self.path, kept_text.as_bytes())
    }

    /// Regenerates the journal from scratch by walking the WAL storage
    /// tree (segments hashed into subdirectories by the first 16 chars of
    /// their name). `.tmp` files are skipped; unrecognised files are
    /// logged and otherwise ignored; history files are indexed alongside
    /// plain segments.
    pub fn rebuild(&self, wals_directory: &Path) -> Result<()> {
        let mut records = Vec::new();
        if wals_directory.is_dir() {
            for entry in walkdir::WalkDir::new(wals_directory)
                .min_depth(1)
                .max_depth(2)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy().to_string();
                if file_name.ends_with(".tmp") {
                    continue;
                }
                let (base_name, compression) = split_compression_ext(&file_name);
                if !is_any_xlog_file(&base_name) {
                    tracing::warn!(file = %entry.path().display(), "unknown file in WAL archive, ignoring");
                    continue;
                }
                let metadata = entry.metadata().map_err(|e| {
                    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
                })?;
                let modified = metadata.modified()?;
                let time = modified
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs_f64();
                records.push(WalRecord::new(base_name, metadata.len(), time, compression));
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        let mut text = String::new();
        for record in &records {
            text.push_str(&record.to_line());
            text.push('\n');
        }
        crate::atomic::write_atomic(&self.path, text.as_bytes())
    }
}

/// Splits a known compression extension (`.gz`, `.bz2`, `.xz`,
/// `.zstd`/`.zst`) off an archive file name, returning the bare segment
/// name and the compression tag it implies.
fn split_compression_ext(file_name: &str) -> (String, Option<String>) {
    const EXTS: &[(&str, &str)] = &[
        (".gz", "gzip"),
        (".bz2", "bzip2"),
        (".xz", "xz"),
        (".zstd", "zstd"),
        (".zst", "zstd"),
    ];
    for (ext, tag) in EXTS {
        if let Some(stripped) = file_name.strip_suffix(ext) {
            return (stripped.to_string(), Some(tag.to_string()));
        }
    }
    (file_name.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn line_round_trip() {
        let record = WalRecord::new("000000010000000000000001", 16777216, 1700000000.5, None);
        let line = record.to_line();
        let parsed = WalRecord::from_line(&line, Path::new("xlog.db")).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn missing_compression_field_parses_as_none() {
        let parsed =
            WalRecord::from_line("000000010000000000000001\t16777216\t1700000000.5", Path::new("x")).unwrap();
        assert_eq!(parsed.compression, None);
    }

    #[test]
    fn append_then_scan_round_trips() {
        let dir = tempdir().unwrap();
        let catalog = WalCatalog::new(dir.path().join("xlog.db"));
        let r1 = WalRecord::new("000000010000000000000001", 100, 1.0, None);
        let r2 = WalRecord::new("000000010000000000000002", 200, 2.0, Some("gzip".into()));
        catalog.append(&r1).unwrap();
        catalog.append(&r2).unwrap();
        assert_eq!(catalog.scan().unwrap(), vec![r1, r2]);
    }

    #[test]
    fn rewrite_drops_records_and_invokes_on_drop() {
        let dir = tempdir().unwrap();
        let catalog = WalCatalog::new(dir.path().join("xlog.db"));
        for i in 1..=4u32 {
            catalog
                .append(&WalRecord::new(
                    format!("{:08X}0000000000000{:03X}", 1, i),
                    10,
                    i as f64,
                    None,
                ))
                .unwrap();
        }
        let mut dropped = Vec::new();
        catalog
            .rewrite(
                |r| r.name.ends_with("003") || r.name.ends_with("004"),
                |r| {
                    dropped.push(r.name.clone());
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(dropped.len(), 2);
        assert_eq!(catalog.scan().unwrap().len(), 2);
    }

    #[test]
    fn rebuild_indexes_segments_and_history_files_and_skips_tmp() {
        let dir = tempdir().unwrap();
        let wals_dir = dir.path().join("wals");
        let hash_dir = wals_dir.join("0000000100000000");
        std::fs::create_dir_all(&hash_dir).unwrap();
        std::fs::write(hash_dir.join("000000010000000000000001"), b"0123456789").unwrap();
        std::fs::write(hash_dir.join("000000010000000000000002.gz"), b"01234").unwrap();
        std::fs::write(hash_dir.join("00000001.history"), b"x").unwrap();
        std::fs::write(hash_dir.join("in-progress.tmp"), b"junk").unwrap();
        let catalog = WalCatalog::new(wals_dir.join("xlog.db"));
        catalog.rebuild(&wals_dir).unwrap();
        let records = catalog.scan().unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().any(|r| r.is_history()));
        assert!(records
            .iter()
            .any(|r| r.name == "000000010000000000000002" && r.compression.as_deref() == Some("gzip")));
    }
}
