//! Backup lifecycle and retention classification enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a backup sits in its lifecycle.
///
/// Transitions: `Empty -> Started -> {WaitingForWals | Failed}`,
/// `WaitingForWals -> {Done | Failed}`. `Failed` and `Done` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupStatus {
    Empty,
    Started,
    WaitingForWals,
    Done,
    Failed,
}

impl BackupStatus {
    /// All statuses other than `Empty`: a backup directory that exists on
    /// disk with some metadata recorded.
    pub const NOT_EMPTY: &'static [BackupStatus] = &[
        BackupStatus::Started,
        BackupStatus::WaitingForWals,
        BackupStatus::Done,
        BackupStatus::Failed,
    ];

    /// Statuses a backup can be in while still archiving WALs for it, i.e.
    /// not yet finalised and not failed.
    pub const ARCHIVING: &'static [BackupStatus] =
        &[BackupStatus::Started, BackupStatus::WaitingForWals];

    pub fn is_terminal(self) -> bool {
        matches!(self, BackupStatus::Done | BackupStatus::Failed)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupStatus::Empty => "EMPTY",
            BackupStatus::Started => "STARTED",
            BackupStatus::WaitingForWals => "WAITING_FOR_WALS",
            BackupStatus::Done => "DONE",
            BackupStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for BackupStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Ok(match s {
            "EMPTY" => BackupStatus::Empty,
            "STARTED" => BackupStatus::Started,
            "WAITING_FOR_WALS" => BackupStatus::WaitingForWals,
            "DONE" => BackupStatus::Done,
            "FAILED" => BackupStatus::Failed,
            other => {
                return Err(crate::Error::ConfigError(format!(
                    "unknown backup status '{}'",
                    other
                )))
            }
        })
    }
}

/// The outcome of classifying a backup (or WAL segment) against the
/// server's retention policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionStatus {
    /// Required to satisfy the current retention policy.
    Valid,
    /// No longer required and free to be removed.
    Obsolete,
    /// Would be obsolete, but is being kept to satisfy a minimum
    /// redundancy floor.
    PotentiallyObsolete,
    /// The policy does not apply to this backup (e.g. it never completed).
    None,
}

impl fmt::Display for RetentionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RetentionStatus::Valid => "VALID",
            RetentionStatus::Obsolete => "OBSOLETE",
            RetentionStatus::PotentiallyObsolete => "POTENTIALLY_OBSOLETE",
            RetentionStatus::None => "NONE",
        };
        f.write_str(s)
    }
}
