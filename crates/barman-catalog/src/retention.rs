//! Retention policy evaluation: a pure function over a catalog snapshot,
//! a policy, and a clock. Nothing here touches the filesystem or decides
//! to delete anything — `cronRetention` in the manager crate consumes the
//! classification and acts on it.

use barman_core::{BackupStatus, RetentionStatus};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::backup::Backup;
use crate::catalog::BackupCatalog;

/// How long to keep backups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep the N most recent `DONE` backups.
    Redundancy(u32),
    /// Keep every `DONE` backup whose `end_time` is within `days` of now.
    RecoveryWindow { days: i64 },
}

static REDUNDANCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*redundancy\s+(\d+)\s*$").unwrap());
static RECOVERY_WINDOW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*recovery\s+window\s+of\s+(\d+)\s+(day|week|month)s?\s*$").unwrap()
});

impl RetentionPolicy {
    /// Parses the `retention_policy`/`wal_retention_policy` configuration
    /// value: either `"REDUNDANCY n"` or `"RECOVERY WINDOW OF n {DAYS,WEEKS,MONTHS}"`,
    /// case-insensitively. A month is treated as 31 days, matching the
    /// convention that a recovery window must never be shorter than it
    /// looks.
    pub fn parse(value: &str) -> Option<Self> {
        if let Some(caps) = REDUNDANCY_RE.captures(value) {
            let n: u32 = caps[1].parse().ok()?;
            return Some(RetentionPolicy::Redundancy(n));
        }
        if let Some(caps) = RECOVERY_WINDOW_RE.captures(value) {
            let n: i64 = caps[1].parse().ok()?;
            let days = match caps[2].to_ascii_lowercase().as_str() {
                "day" => n,
                "week" => n * 7,
                "month" => n * 31,
                _ => return None,
            };
            return Some(RetentionPolicy::RecoveryWindow { days });
        }
        None
    }
}

/// The result of classifying one server's backups against its retention
/// policy: a per-backup verdict plus the id of the oldest backup that is
/// still required (used to compute which WALs remain protected).
#[derive(Debug, Clone, Default)]
pub struct RetentionReport {
    pub classification: HashMap<String, RetentionStatus>,
    pub first_valid: Option<String>,
}

impl RetentionReport {
    pub fn status_of(&self, backup_id: &str) -> RetentionStatus {
        self.classification
            .get(backup_id)
            .copied()
            .unwrap_or(RetentionStatus::None)
    }
}

/// Evaluates `policy` against every catalogued backup. Only `DONE`
/// backups can ever be classified `VALID`/`OBSOLETE`/`POTENTIALLY_OBSOLETE`;
/// everything else reports `NONE`.
///
/// `minimum_redundancy` is a floor applied independently of how the
/// window/redundancy rule itself classified things: walking the backups
/// that the rule marked `OBSOLETE`, newest first, the floor promotes them
/// to `POTENTIALLY_OBSOLETE` until `minimum_redundancy` of them have been
/// kept — on top of whatever the rule already considered `VALID`. This is
/// deliberately a floor on *extra* safety margin, not merely a floor on
/// the total retained count: a recovery window that is working exactly as
/// configured still keeps `minimum_redundancy` backups past its edge, so
/// shrinking the window can never strand a restore that was previously
/// possible.
pub fn evaluate(
    catalog: &BackupCatalog,
    policy: RetentionPolicy,
    minimum_redundancy: u32,
    now: DateTime<Utc>,
) -> RetentionReport {
    let mut done: Vec<&Backup> = catalog.available(&[BackupStatus::Done]);
    done.sort_by(|a, b| b.backup_id.cmp(&a.backup_id)); // newest first

    let mut classification = HashMap::new();
    for backup in catalog.iter() {
        if backup.status != BackupStatus::Done {
            classification.insert(backup.backup_id.clone(), RetentionStatus::None);
        }
    }

    let naturally_valid = match policy {
        RetentionPolicy::Redundancy(n) => {
            let n = if n < minimum_redundancy {
                tracing::warn!(
                    configured = n,
                    floor = minimum_redundancy,
                    "retention redundancy below minimum_redundancy, raising it"
                );
                minimum_redundancy
            } else {
                n
            };
            n as usize
        }
        RetentionPolicy::RecoveryWindow { days } => {
            let point_of_recoverability = now - Duration::days(days);
            done.iter()
                .take_while(|b| b.end_time.unwrap_or(now) >= point_of_recoverability)
                .count()
        }
    };

    let mut first_valid = None;
    let mut promoted = 0u32;
    for (idx, backup) in done.iter().enumerate() {
        let status = if idx < naturally_valid {
            RetentionStatus::Valid
        } else if promoted < minimum_redundancy {
            promoted += 1;
            RetentionStatus::PotentiallyObsolete
        } else {
            RetentionStatus::Obsolete
        };
        if status != RetentionStatus::Obsolete {
            first_valid = Some(backup.backup_id.clone());
        }
        classification.insert(backup.backup_id.clone(), status);
    }

    RetentionReport {
        classification,
        first_valid,
    }
}
