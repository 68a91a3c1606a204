//! `checkBackup`: re-evaluates a backup's consistency against whatever
//! WAL has actually arrived in the archive so far.
//!
//! This is the only place a backup's status moves after the executor
//! itself finishes the attempt: from `WAITING_FOR_WALS` onward to either
//! `DONE` or `FAILED`, never back. It runs once at the end of every
//! backup attempt and again on every `cron` tick while a backup is still
//! waiting.

use std::collections::HashMap;
use std::path::Path;

use barman_catalog::{Backup, WalCatalog};
use barman_core::{BackupStatus, Error, Result, SegmentName};

/// Re-evaluates `backup` against the WAL catalog and persists any status
/// change. A backup still being written (`end_wal` unset) is left alone.
///
/// Works through the consistency staircase in order:
/// - no WAL archived yet on the backup's timeline -> `WAITING_FOR_WALS`
/// - the latest archived WAL on that timeline predates `begin_wal` ->
///   `WAITING_FOR_WALS`
/// - a required segment up to the latest archived one is missing ->
///   `FAILED`, naming the first missing segment
/// - the latest archived WAL covers `end_wal` and everything required is
///   present -> `DONE`
/// - everything required up to the latest archived WAL is present, but
///   the latest hasn't reached `end_wal` yet -> `WAITING_FOR_WALS`
pub fn check_backup(
    backup: &mut Backup,
    wal_catalog: &WalCatalog,
    basebackups_directory: &Path,
) -> Result<()> {
    let Some(end_wal) = backup.end_wal.clone() else {
        return Ok(());
    };
    let Some(begin_wal) = backup.begin_wal.clone() else {
        return Ok(());
    };
    let timeline = &begin_wal[0..8];

    let latest_per_timeline = latest_archived_wal_per_timeline(wal_catalog)?;

    let Some(last_archived) = latest_per_timeline.get(timeline) else {
        backup.status = BackupStatus::WaitingForWals;
        backup.save(basebackups_directory)?;
        return Ok(());
    };

    if last_archived.as_str() < begin_wal.as_str() {
        backup.status = BackupStatus::WaitingForWals;
        backup.save(basebackups_directory)?;
        return Ok(());
    }

    let check_up_to = std::cmp::min(last_archived.as_str(), end_wal.as_str()).to_string();
    let segment_size = backup
        .xlog_segment_size
        .unwrap_or(barman_core::DEFAULT_XLOG_SEG_SIZE);
    let begin_segment = SegmentName::parse(&begin_wal)?;
    let check_up_to_segment = SegmentName::parse(&check_up_to)?;
    let required = barman_core::generate_range(begin_segment, check_up_to_segment, segment_size);

    let archived: std::collections::HashSet<String> = wal_catalog
        .scan()?
        .into_iter()
        .map(|r| r.name)
        .collect();

    let missing = required
        .iter()
        .map(|s| s.to_file_name())
        .find(|name| !archived.contains(name));

    if let Some(missing_wal) = missing {
        backup.status = BackupStatus::Failed;
        backup.error = Some(format!(
            "At least one WAL file is missing. The first missing WAL file is {}",
            missing_wal
        ));
        backup.save(basebackups_directory)?;
        return Ok(());
    }

    if last_archived.as_str() >= end_wal.as_str() {
        backup.status = BackupStatus::Done;
    } else {
        backup.status = BackupStatus::WaitingForWals;
    }
    backup.save(basebackups_directory)?;
    Ok(())
}

/// For every timeline with at least one archived segment, the name of
/// its most recently archived segment (plain segments only — history
/// files carry no timeline-of-origin in their own name and are not
/// candidates here).
fn latest_archived_wal_per_timeline(wal_catalog: &WalCatalog) -> Result<HashMap<String, String>> {
    let mut latest: HashMap<String, String> = HashMap::new();
    for record in wal_catalog.scan()? {
        if record.is_history() || record.name.len() != 24 {
            continue;
        }
        let timeline = record.name[0..8].to_string();
        latest
            .entry(timeline)
            .and_modify(|current| {
                if record.name.as_str() > current.as_str() {
                    *current = record.name.clone();
                }
            })
            .or_insert(record.name.clone());
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use barman_catalog::WalRecord;
    use tempfile::tempdir;

    fn wal_catalog(dir: &Path) -> WalCatalog {
        WalCatalog::new(dir.join("wals/xlog.db"))
    }

    fn backup_waiting(begin: &str, end: &str) -> Backup {
        let mut b = Backup::new_empty("20240101T000000", "main");
        b.status = BackupStatus::WaitingForWals;
        b.begin_wal = Some(begin.to_string());
        b.end_wal = Some(end.to_string());
        b.xlog_segment_size = Some(barman_core::DEFAULT_XLOG_SEG_SIZE);
        b
    }

    #[test]
    fn in_progress_backup_with_no_end_wal_is_untouched() {
        let dir = tempdir().unwrap();
        let catalog = wal_catalog(dir.path());
        let mut backup = Backup::new_empty("id", "main");
        backup.status = BackupStatus::Started;
        check_backup(&mut backup, &catalog, dir.path()).unwrap();
        assert_eq!(backup.status, BackupStatus::Started);
    }

    #[test]
    fn no_wal_archived_yet_on_timeline_waits() {
        let dir = tempdir().unwrap();
        let catalog = wal_catalog(dir.path());
        let mut backup = backup_waiting(
            "000000010000000000000005",
            "000000010000000000000010",
        );
        check_backup(&mut backup, &catalog, dir.path()).unwrap();
        assert_eq!(backup.status, BackupStatus::WaitingForWals);
    }

    #[test]
    fn consistency_staircase_reaches_done_then_would_fail_on_gap() {
        let dir = tempdir().unwrap();
        let catalog = wal_catalog(dir.path());
        for n in 5..=8u32 {
            catalog
                .append(&WalRecord::new(
                    format!("00000001000000000000{:04X}", n),
                    16 * 1024 * 1024,
                    1.0,
                    None,
                ))
                .unwrap();
        }
        let mut backup = backup_waiting(
            "000000010000000000000005",
            "000000010000000000000010",
        );
        check_backup(&mut backup, &catalog, dir.path()).unwrap();
        assert_eq!(backup.status, BackupStatus::WaitingForWals);

        for n in 9..=10u32 {
            catalog
                .append(&WalRecord::new(
                    format!("00000001000000000000{:04X}", n),
                    16 * 1024 * 1024,
                    1.0,
                    None,
                ))
                .unwrap();
        }
        check_backup(&mut backup, &catalog, dir.path()).unwrap();
        assert_eq!(backup.status, BackupStatus::Done);
    }

    #[test]
    fn missing_segment_fails_with_its_name_in_the_error() {
        let dir = tempdir().unwrap();
        let catalog = wal_catalog(dir.path());
        for n in [5u32, 6, 8, 9, 10] {
            catalog
                .append(&WalRecord::new(
                    format!("00000001000000000000{:04X}", n),
                    16 * 1024 * 1024,
                    1.0,
                    None,
                ))
                .unwrap();
        }
        let mut backup = backup_waiting(
            "000000010000000000000005",
            "000000010000000000000010",
        );
        check_backup(&mut backup, &catalog, dir.path()).unwrap();
        assert_eq!(backup.status, BackupStatus::Failed);
        assert!(backup
            .error
            .unwrap()
            .contains("000000010000000000000007"));
    }

    #[test]
    fn done_backup_recheck_is_a_no_op() {
        let dir = tempdir().unwrap();
        let catalog = wal_catalog(dir.path());
        for n in 5..=10u32 {
            catalog
                .append(&WalRecord::new(
                    format!("00000001000000000000{:04X}", n),
                    16 * 1024 * 1024,
                    1.0,
                    None,
                ))
                .unwrap();
        }
        let mut backup = backup_waiting(
            "000000010000000000000005",
            "000000010000000000000010",
        );
        check_backup(&mut backup, &catalog, dir.path()).unwrap();
        assert_eq!(backup.status, BackupStatus::Done);
        check_backup(&mut backup, &catalog, dir.path()).unwrap();
        assert_eq!(backup.status, BackupStatus::Done);
    }
}
