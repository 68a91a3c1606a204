//! Maps a `barman_core::Error` to the stderr/exit-code convention spec.md
//! §7 names: `ERROR:` lines, an optional `HINT:` line naming a concrete
//! remediation, and a nonzero exit code. One shared path so every
//! subcommand formats failures identically.

use barman_core::Error;

/// Prints `err` the way every subcommand's failure path should, and
/// returns the process exit code to use.
pub fn report_error(err: &Error) -> i32 {
    eprintln!("ERROR: {}", err);
    if let Some(hint) = hint_for(err) {
        eprintln!("HINT: {}", hint);
    }
    if matches!(err, Error::Fatal(_)) {
        tracing::error!(error = ?err, "fatal error");
    }
    exit_code_for(err)
}

fn hint_for(err: &Error) -> Option<&'static str> {
    match err {
        Error::BadSegmentName(_) => Some("the WAL catalog may be out of date; run `rebuild-xlogdb`"),
        Error::LockBusy { .. } => {
            Some("another invocation against this server is already running; wait for it to finish")
        }
        Error::CompressionIncompatibility { .. } => {
            Some("the primary and passive nodes must agree on a WAL compression setting before syncing")
        }
        Error::DatabaseInRecovery => {
            Some("exclusive-coordination backups require a primary; use concurrent coordination against a standby")
        }
        _ => None,
    }
}

fn exit_code_for(err: &Error) -> i32 {
    match err {
        Error::LockBusy { .. } => 2,
        Error::ConfigError(_) => 3,
        Error::UnknownBackup(_) => 4,
        _ => 1,
    }
}
