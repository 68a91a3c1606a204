//! The `Backup` entity and the `backup.info` metadata file format.
//!
//! The on-disk format is a flat `key=value` text file, one field per line,
//! sorted by key, with the literal text `None` standing in for an absent
//! value. It predates this workspace and is kept byte-compatible so that
//! other tools in a barman deployment (and a passive node receiving a
//! `sync-info` snapshot) can still read it. Tablespace lists are encoded as
//! a Python-tuple-literal-shaped string for the same cross-tool reason.

use barman_core::{BackupCoordination, BackupStatus, BackupTransport, Tablespace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use barman_core::{Error, Result};

/// One backup attempt, as recorded in `base/<id>/backup.info`.
///
/// Mutated only by the attempt that owns it (see the executor crate) until
/// it reaches a terminal status; after that it is immutable except for
/// deletion. `id` doubles as the directory name under `base/` and as the
/// name of the `barman_<id>` restore point requested at the end of a
/// successful backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub backup_id: String,
    pub server_name: Option<String>,
    pub status: BackupStatus,

    pub transport: Option<BackupTransport>,
    pub coordination: Option<BackupCoordination>,

    pub version: Option<u32>,
    pub systemid: Option<String>,
    pub pgdata: Option<PathBuf>,
    pub tablespaces: Option<Vec<Tablespace>>,

    pub config_file: Option<PathBuf>,
    pub hba_file: Option<PathBuf>,
    pub ident_file: Option<PathBuf>,
    pub included_files: Option<Vec<PathBuf>>,

    pub timeline: Option<u32>,
    pub xlog_segment_size: Option<u64>,

    pub begin_time: Option<DateTime<Utc>>,
    pub begin_xlog: Option<String>,
    pub begin_wal: Option<String>,
    pub begin_offset: Option<u64>,

    pub end_time: Option<DateTime<Utc>>,
    pub end_xlog: Option<String>,
    pub end_wal: Option<String>,
    pub end_offset: Option<u64>,

    pub size: Option<u64>,
    pub deduplicated_size: Option<u64>,

    pub error: Option<String>,
    pub backup_label: Option<String>,
}

impl Backup {
    /// A freshly registered backup: `EMPTY` status, nothing else known yet.
    /// This is what gets persisted the instant a backup id is reserved, so
    /// a crash before the transport even starts still leaves a trace.
    pub fn new_empty(backup_id: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            backup_id: backup_id.into(),
            server_name: Some(server_name.into()),
            status: BackupStatus::Empty,
            transport: None,
            coordination: None,
            version: None,
            systemid: None,
            pgdata: None,
            tablespaces: None,
            config_file: None,
            hba_file: None,
            ident_file: None,
            included_files: None,
            timeline: None,
            xlog_segment_size: None,
            begin_time: None,
            begin_xlog: None,
            begin_wal: None,
            begin_offset: None,
            end_time: None,
            end_xlog: None,
            end_wal: None,
            end_offset: None,
            size: None,
            deduplicated_size: None,
            error: None,
            backup_label: None,
        }
    }

    /// Path of the per-backup metadata file, given the server's base
    /// backups directory.
    pub fn info_path(basebackups_directory: &Path, backup_id: &str) -> PathBuf {
        basebackups_directory.join(backup_id).join("backup.info")
    }

    /// Directory containing this backup's data, given the server's base
    /// backups directory.
    pub fn directory(&self, basebackups_directory: &Path) -> PathBuf {
        basebackups_directory.join(&self.backup_id)
    }

    /// Writes `backup.info` atomically: temp sibling, fsync, rename, fsync
    /// the containing directory. Safe to call repeatedly as the backup
    /// progresses through its state machine.
    pub fn save(&self, basebackups_directory: &Path) -> Result<()> {
        let dir = self.directory(basebackups_directory);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("backup.info");
        let text = self.to_info_text();
        crate::atomic::write_atomic(&path, text.as_bytes())?;
        Ok(())
    }

    /// Loads a `backup.info` file. The backup id is taken from the
    /// containing directory name, not from any `backup_id` line the file
    /// might happen to carry: the directory name is the source of truth
    /// barman itself uses to key the catalog.
    pub fn load(path: &Path) -> Result<Self> {
        let backup_id = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::CatalogParse {
                path: path.to_path_buf(),
                line: String::new(),
                reason: "backup.info is not inside a named backup directory".into(),
            })?
            .to_string();
        let text = std::fs::read_to_string(path)?;
        Self::from_info_text(&text, backup_id, path)
    }

    fn to_info_text(&self) -> String {
        let mut fields: BTreeMap<&'static str, String> = BTreeMap::new();
        fields.insert("backup_id", self.backup_id.clone());
        put_opt(&mut fields, "server_name", &self.server_name);
        fields.insert("status", self.status.to_string());
        put_opt_display(&mut fields, "mode", &self.transport.map(transport_tag));
        put_opt_display(
            &mut fields,
            "coordination",
            &self.coordination.map(coordination_tag),
        );
        put_opt_display(&mut fields, "version", &self.version);
        put_opt(&mut fields, "systemid", &self.systemid);
        put_opt_path(&mut fields, "pgdata", &self.pgdata);
        fields.insert("tablespaces", dump_tablespaces(&self.tablespaces));
        put_opt_path(&mut fields, "config_file", &self.config_file);
        put_opt_path(&mut fields, "hba_file", &self.hba_file);
        put_opt_path(&mut fields, "ident_file", &self.ident_file);
        fields.insert("included_files", dump_path_list(&self.included_files));
        put_opt_display(&mut fields, "timeline", &self.timeline);
        put_opt_display(&mut fields, "xlog_segment_size", &self.xlog_segment_size);
        put_opt(&mut fields, "begin_time", &self.begin_time.map(|t| t.to_rfc3339()));
        put_opt(&mut fields, "begin_xlog", &self.begin_xlog);
        put_opt(&mut fields, "begin_wal", &self.begin_wal);
        put_opt_display(&mut fields, "begin_offset", &self.begin_offset);
        put_opt(&mut fields, "end_time", &self.end_time.map(|t| t.to_rfc3339()));
        put_opt(&mut fields, "end_xlog", &self.end_xlog);
        put_opt(&mut fields, "end_wal", &self.end_wal);
        put_opt_display(&mut fields, "end_offset", &self.end_offset);
        put_opt_display(&mut fields, "size", &self.size);
        put_opt_display(&mut fields, "deduplicated_size", &self.deduplicated_size);
        put_opt(&mut fields, "error", &self.error);
        put_opt(&mut fields, "backup_label", &self.backup_label);

        let mut out = String::new();
        for (key, value) in fields {
            out.push_str(key);
            out.push('=');
            out.push_str(&value);
            out.push('\n');
        }
        out
    }

    fn from_info_text(text: &str, backup_id: String, path: &Path) -> Result<Self> {
        let mut backup = Backup::new_empty(backup_id, "");
        backup.server_name = None;
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| Error::CatalogParse {
                path: path.to_path_buf(),
                line: raw_line.to_string(),
                reason: format!("line {} has no '=' separator", lineno + 1),
            })?;
            let key = key.trim();
            let value = value.trim();
            let value_opt = if value == "None" { None } else { Some(value) };
            apply_field(&mut backup, key, value_opt, path, raw_line)?;
        }
        Ok(backup)
    }
}

fn apply_field(
    backup: &mut Backup,
    key: &str,
    value: Option<&str>,
    path: &Path,
    raw_line: &str,
) -> Result<()> {
    macro_rules! parse_or_err {
        ($v:expr, $t:ty) => {
            $v.parse::<$t>().map_err(|_| Error::CatalogParse {
                path: path.to_path_buf(),
                line: raw_line.to_string(),
                reason: format!("'{}' is not a valid {}", $v, stringify!($t)),
            })?
        };
    }
    match key {
        "backup_id" => { /* directory name wins; see Backup::load */ }
        "server_name" => backup.server_name = value.map(str::to_string),
        "status" => {
            if let Some(v) = value {
                backup.status = v.parse().map_err(|_| Error::CatalogParse {
                    path: path.to_path_buf(),
                    line: raw_line.to_string(),
                    reason: format!("unknown status '{}'", v),
                })?;
            }
        }
        "mode" => backup.transport = value.and_then(parse_transport_tag),
        "coordination" => backup.coordination = value.and_then(parse_coordination_tag),
        "version" => backup.version = value.map(|v| parse_or_err!(v, u32)),
        "systemid" => backup.systemid = value.map(str::to_string),
        "pgdata" => backup.pgdata = value.map(PathBuf::from),
        "tablespaces" => backup.tablespaces = load_tablespaces(value, path, raw_line)?,
        "config_file" => backup.config_file = value.map(PathBuf::from),
        "hba_file" => backup.hba_file = value.map(PathBuf::from),
        "ident_file" => backup.ident_file = value.map(PathBuf::from),
        "included_files" => backup.included_files = load_path_list(value),
        "timeline" => backup.timeline = value.map(|v| parse_or_err!(v, u32)),
        "xlog_segment_size" => backup.xlog_segment_size = value.map(|v| parse_or_err!(v, u64)),
        "begin_time" => backup.begin_time = value.map(|v| parse_or_err!(v, DateTime<Utc>)),
        "begin_xlog" => backup.begin_xlog = value.map(str::to_string),
        "begin_wal" => backup.begin_wal = value.map(str::to_string),
        "begin_offset" => backup.begin_offset = value.map(|v| parse_or_err!(v, u64)),
        "end_time" => backup.end_time = value.map(|v| parse_or_err!(v, DateTime<Utc>)),
        "end_xlog" => backup.end_xlog = value.map(str::to_string),
        "end_wal" => backup.end_wal = value.map(str::to_string),
        "end_offset" => backup.end_offset = value.map(|v| parse_or_err!(v, u64)),
        "size" => backup.size = value.map(|v| parse_or_err!(v, u64)),
        "deduplicated_size" => backup.deduplicated_size = value.map(|v| parse_or_err!(v, u64)),
        "error" => backup.error = value.map(str::to_string),
        "backup_label" => backup.backup_label = value.map(str::to_string),
        unknown => {
            tracing::warn!(
                file = %path.display(),
                key = unknown,
                "ignoring unknown key in backup.info"
            );
        }
    }
    Ok(())
}

fn transport_tag(t: BackupTransport) -> &'static str {
    match t {
        BackupTransport::FileCopyRemote => "rsync",
        BackupTransport::DatabaseStreaming => "postgres",
        BackupTransport::PassiveMirror => "passive",
    }
}

fn parse_transport_tag(s: &str) -> Option<BackupTransport> {
    match s {
        "rsync" => Some(BackupTransport::FileCopyRemote),
        "postgres" => Some(BackupTransport::DatabaseStreaming),
        "passive" => Some(BackupTransport::PassiveMirror),
        _ => None,
    }
}

fn coordination_tag(c: BackupCoordination) -> &'static str {
    match c {
        BackupCoordination::Exclusive => "exclusive",
        BackupCoordination::Concurrent => "concurrent",
    }
}

fn parse_coordination_tag(s: &str) -> Option<BackupCoordination> {
    match s {
        "exclusive" => Some(BackupCoordination::Exclusive),
        "concurrent" => Some(BackupCoordination::Concurrent),
        _ => None,
    }
}

fn put_opt(fields: &mut BTreeMap<&'static str, String>, key: &'static str, v: &Option<String>) {
    fields.insert(key, v.clone().unwrap_or_else(|| "None".to_string()));
}

fn put_opt_path(fields: &mut BTreeMap<&'static str, String>, key: &'static str, v: &Option<PathBuf>) {
    fields.insert(
        key,
        v.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "None".to_string()),
    );
}

fn put_opt_display<T: std::fmt::Display>(
    fields: &mut BTreeMap<&'static str, String>,
    key: &'static str,
    v: &Option<T>,
) {
    fields.insert(
        key,
        v.as_ref()
            .map(|x| x.to_string())
            .unwrap_or_else(|| "None".to_string()),
    );
}

/// Serializes tablespaces as a parenthesized-tuple literal list, e.g.
/// `[('data', 16401, '/srv/pg/ts1'), ('idx', 16402, '/srv/pg/ts2')]`, matching
/// the format other barman tools already expect on disk.
fn dump_tablespaces(tablespaces: &Option<Vec<Tablespace>>) -> String {
    match tablespaces {
        None => "None".to_string(),
        Some(list) if list.is_empty() => "[]".to_string(),
        Some(list) => {
            let items: Vec<String> = list
                .iter()
                .map(|t| format!("('{}', {}, '{}')", escape_tuple_str(&t.name), t.oid, escape_tuple_str(&t.location)))
                .collect();
            format!("[{}]", items.join(", "))
        }
    }
}

fn escape_tuple_str(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn load_tablespaces(value: Option<&str>, path: &Path, raw_line: &str) -> Result<Option<Vec<Tablespace>>> {
    let value = match value {
        None => return Ok(None),
        Some(v) => v.trim(),
    };
    if value == "[]" || value.is_empty() {
        return Ok(Some(Vec::new()));
    }
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .ok_or_else(|| Error::CatalogParse {
            path: path.to_path_buf(),
            line: raw_line.to_string(),
            reason: "tablespaces value is not a bracketed list".to_string(),
        })?;
    let mut out = Vec::new();
    for item in split_top_level_tuples(inner) {
        let t = parse_tablespace_tuple(&item).ok_or_else(|| Error::CatalogParse {
            path: path.to_path_buf(),
            line: raw_line.to_string(),
            reason: format!("'{}' is not a valid tablespace tuple", item),
        })?;
        out.push(t);
    }
    Ok(Some(out))
}

fn split_top_level_tuples(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                if !current.trim().is_empty() {
                    out.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

fn parse_tablespace_tuple(item: &str) -> Option<Tablespace> {
    let inner = item.trim().strip_prefix('(')?.strip_suffix(')')?;
    let parts = split_top_level_tuples(inner);
    if parts.len() != 3 {
        return None;
    }
    let name = unquote(&parts[0])?;
    let oid: u32 = parts[1].trim().parse().ok()?;
    let location = unquote(&parts[2])?;
    Some(Tablespace::new(name, oid, location))
}

fn unquote(s: &str) -> Option<String> {
    let s = s.trim();
    let s = s.strip_prefix('\'').and_then(|v| v.strip_suffix('\''))?;
    Some(s.replace("\\'", "'").replace("\\\\", "\\"))
}

fn dump_path_list(list: &Option<Vec<PathBuf>>) -> String {
    match list {
        None => "None".to_string(),
        Some(l) => {
            let items: Vec<String> = l.iter().map(|p| format!("'{}'", p.display())).collect();
            format!("[{}]", items.join(", "))
        }
    }
}

fn load_path_list(value: Option<&str>) -> Option<Vec<PathBuf>> {
    let value = value?.trim();
    let inner = value.strip_prefix('[')?.strip_suffix(']')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    Some(
        inner
            .split(',')
            .filter_map(|s| unquote(s))
            .map(PathBuf::from)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_backup(id: &str) -> Backup {
        let mut b = Backup::new_empty(id, "main");
        b.status = BackupStatus::Done;
        b.transport = Some(BackupTransport::FileCopyRemote);
        b.coordination = Some(BackupCoordination::Concurrent);
        b.version = Some(150000);
        b.pgdata = Some(PathBuf::from("/var/lib/postgresql/15/main"));
        b.tablespaces = Some(vec![
            Tablespace::new("data", 16401, "/srv/pg/ts1"),
            Tablespace::new("weird's", 16402, "/srv/pg/ts\\2"),
        ]);
        b.timeline = Some(1);
        b.xlog_segment_size = Some(16 * 1024 * 1024);
        b.begin_wal = Some("000000010000000000000001".to_string());
        b.end_wal = Some("000000010000000000000002".to_string());
        b.begin_offset = Some(0);
        b.end_offset = Some(512);
        b.size = Some(12345);
        b.deduplicated_size = Some(6000);
        b
    }

    #[test]
    fn round_trips_through_text() {
        let dir = tempdir().unwrap();
        let backup = sample_backup("20240102T030405");
        backup.save(dir.path()).unwrap();
        let loaded = Backup::load(&Backup::info_path(dir.path(), "20240102T030405")).unwrap();
        assert_eq!(loaded, backup);
    }

    #[test]
    fn backup_id_comes_from_directory_name_not_file_contents() {
        let dir = tempdir().unwrap();
        let mut backup = sample_backup("real-id");
        backup.save(dir.path()).unwrap();
        // Corrupt an imaginary "backup_id" concept by renaming the directory;
        // the file's own lines never encode a conflicting id in practice
        // since `backup_id` is not re-read, but we still exercise the rule.
        let moved = dir.path().join("moved-id");
        std::fs::rename(dir.path().join("real-id"), &moved).unwrap();
        let loaded = Backup::load(&moved.join("backup.info")).unwrap();
        assert_eq!(loaded.backup_id, "moved-id");
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("20240102T030405");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(
            path.join("backup.info"),
            "status=DONE\ntotally_unknown_future_field=42\n",
        )
        .unwrap();
        let loaded = Backup::load(&path.join("backup.info")).unwrap();
        assert_eq!(loaded.status, BackupStatus::Done);
    }

    #[test]
    fn malformed_line_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("20240102T030405");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("backup.info"), "not-a-key-value-line\n").unwrap();
        assert!(Backup::load(&path.join("backup.info")).is_err());
    }
}
