//! In-memory index over `base/<id>/backup.info` files.
//!
//! The catalog is a thin cache over on-disk truth: [`BackupCatalog::load`]
//! rebuilds it by scanning the base backups directory, and every mutation
//! ([`BackupCatalog::add`]/[`BackupCatalog::remove`]) requires the caller
//! to have already written or deleted the corresponding `backup.info`
//! itself, so the catalog never disagrees with the filesystem for longer
//! than a single call.

use barman_core::{BackupStatus, Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

use crate::backup::Backup;

/// An in-memory index of one server's backups, keyed by backup id.
///
/// Backed by a `BTreeMap` rather than a hash map: iteration order is
/// already chronological because ids are zero-padded timestamps, which is
/// exactly what [`BackupCatalog::previous`]/[`BackupCatalog::next`] need.
#[derive(Debug, Default)]
pub struct BackupCatalog {
    backups: BTreeMap<String, Backup>,
}

impl BackupCatalog {
    pub fn new() -> Self {
        Self {
            backups: BTreeMap::new(),
        }
    }

    /// Scans `basebackups_directory` for child directories containing a
    /// `backup.info` file and loads each one. Children without the file
    /// are silently ignored: they may be scratch directories left by an
    /// interrupted transport that never got far enough to register.
    pub fn load(basebackups_directory: &Path) -> Result<Self> {
        let mut catalog = Self::new();
        if !basebackups_directory.is_dir() {
            return Ok(catalog);
        }
        let mut entries: Vec<_> = std::fs::read_dir(basebackups_directory)?
            .filter_map(|e| e.ok())
            .collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            if !entry.path().is_dir() {
                continue;
            }
            let info_path = entry.path().join("backup.info");
            if !info_path.is_file() {
                continue;
            }
            let backup = Backup::load(&info_path)?;
            catalog.backups.insert(backup.backup_id.clone(), backup);
        }
        Ok(catalog)
    }

    pub fn get(&self, id: &str) -> Option<&Backup> {
        self.backups.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.backups.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.backups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backups.is_empty()
    }

    /// Every entry whose status is in `filter`, oldest first. Callers
    /// always name the filter explicitly (there is no "all statuses"
    /// default) so a forgotten filter can't silently include `FAILED` or
    /// `EMPTY` backups in, say, a retention sweep.
    pub fn available(&self, filter: &[BackupStatus]) -> Vec<&Backup> {
        self.backups
            .values()
            .filter(|b| filter.contains(&b.status))
            .collect()
    }

    /// The chronologically preceding entry whose status is in `filter`,
    /// or `None` if `id` is the earliest matching entry. Fails with
    /// `UnknownBackup` if `id` itself is not catalogued, matching/next.
    pub fn previous(&self, id: &str, filter: &[BackupStatus]) -> Result<Option<&Backup>> {
        if !self.backups.contains_key(id) {
            return Err(Error::UnknownBackup(id.to_string()));
        }
        Ok(self
            .backups
            .range(..id.to_string())
            .rev()
            .map(|(_, b)| b)
            .find(|b| filter.contains(&b.status)))
    }

    /// The chronologically following entry whose status is in `filter`.
    pub fn next(&self, id: &str, filter: &[BackupStatus]) -> Result<Option<&Backup>> {
        if !self.backups.contains_key(id) {
            return Err(Error::UnknownBackup(id.to_string()));
        }
        let mut range = self.backups.range(id.to_string()..);
        range.next(); // skip id itself
        Ok(range.map(|(_, b)| b).find(|b| filter.contains(&b.status)))
    }

    /// The smallest id whose entry matches `filter`.
    pub fn first(&self, filter: &[BackupStatus]) -> Option<&Backup> {
        self.backups
            .values()
            .find(|b| filter.contains(&b.status))
    }

    /// The largest id whose entry matches `filter`.
    pub fn last(&self, filter: &[BackupStatus]) -> Option<&Backup> {
        self.backups
            .values()
            .rev()
            .find(|b| filter.contains(&b.status))
    }

    /// Adds (or replaces) a catalog entry. Callers must have already
    /// written `backup.info` to disk — this does not persist anything.
    pub fn add(&mut self, backup: Backup) {
        self.backups.insert(backup.backup_id.clone(), backup);
    }

    /// Removes a catalog entry by id. Callers must delete the on-disk
    /// tree themselves, and are expected to do so *before* calling this
    /// (so a crash mid-delete leaves an orphaned directory, not a
    /// catalog entry pointing at nothing).
    pub fn remove(&mut self, id: &str) -> Option<Backup> {
        self.backups.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Backup> {
        self.backups.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barman_core::BackupStatus::*;
    use tempfile::tempdir;

    fn backup_with_status(id: &str, status: barman_core::BackupStatus) -> Backup {
        let mut b = Backup::new_empty(id, "main");
        b.status = status;
        b
    }

    #[test]
    fn load_ignores_directories_without_backup_info() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("20240101T000000")).unwrap();
        backup_with_status("20240102T000000", Done)
            .save(dir.path())
            .unwrap();
        let catalog = BackupCatalog::load(dir.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains("20240102T000000"));
    }

    #[test]
    fn previous_and_next_honor_filter_and_chronology() {
        let mut catalog = BackupCatalog::new();
        catalog.add(backup_with_status("20240101T000000", Done));
        catalog.add(backup_with_status("20240102T000000", Failed));
        catalog.add(backup_with_status("20240103T000000", Done));

        let filter = [Done];
        assert_eq!(
            catalog.next("20240101T000000", &filter).unwrap().unwrap().backup_id,
            "20240103T000000"
        );
        assert!(catalog.previous("20240101T000000", &filter).unwrap().is_none());
        assert_eq!(
            catalog.previous("20240103T000000", &filter).unwrap().unwrap().backup_id,
            "20240101T000000"
        );
    }

    #[test]
    fn previous_next_on_unknown_id_is_an_error() {
        let catalog = BackupCatalog::new();
        assert!(catalog.previous("nope", &[Done]).is_err());
        assert!(catalog.next("nope", &[Done]).is_err());
    }

    #[test]
    fn first_and_last_bound_every_id() {
        let mut catalog = BackupCatalog::new();
        catalog.add(backup_with_status("20240101T000000", Done));
        catalog.add(backup_with_status("20240103T000000", Done));
        catalog.add(backup_with_status("20240102T000000", Done));
        let first = catalog.first(&[Done]).unwrap();
        let last = catalog.last(&[Done]).unwrap();
        for backup in catalog.iter() {
            assert!(first.backup_id <= backup.backup_id);
            assert!(backup.backup_id <= last.backup_id);
        }
    }
}
