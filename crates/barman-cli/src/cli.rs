//! Command-line surface: one subcommand per operation named in the CLI
//! surface this crate stabilizes (backup, catalog, WAL, sync, diagnostic).
//! Every subcommand takes `--barman-home` and the server name; defaults
//! come from `$BARMAN_HOME` the way the rest of this crate resolves it.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

fn parse_duration(text: &str) -> Result<Duration, String> {
    humantime::parse_duration(text).map_err(|e| e.to_string())
}

#[derive(Debug, Parser)]
#[command(name = "barman", about = "WAL-based backup and catalog manager for PostgreSQL")]
pub struct Cli {
    /// Root directory holding every managed server's catalog. Defaults to
    /// `$BARMAN_HOME`, or `/var/lib/barman` if that is unset.
    #[arg(long, global = true)]
    pub barman_home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Takes a new backup of `server`.
    Backup { server: String },
    /// Deletes `backup_id` from `server`'s catalog.
    Delete { server: String, backup_id: String },
    /// Runs scheduled maintenance (retention enforcement, re-checking
    /// in-progress backups) for `server`.
    Cron { server: String },
    /// Re-evaluates the consistency of one backup already on disk.
    CheckBackup { server: String, backup_id: String },
    /// Connection-free health check: directories, retention policy,
    /// backup freshness.
    Check {
        server: String,
        /// Print a single Nagios-plugin-style status line instead of an
        /// itemized report.
        #[arg(long)]
        nagios: bool,
    },
    /// Restores `backup_id` into `destination`.
    Recover {
        server: String,
        backup_id: String,
        destination: PathBuf,
    },

    /// Lists every backup known for `server`.
    ListBackup { server: String },
    /// Prints full detail for one backup.
    ShowBackup { server: String, backup_id: String },
    /// Prints `server`'s resolved configuration.
    ShowServer { server: String },
    /// Prints a one-line summary of `server`'s catalog state.
    Status { server: String },
    /// Rebuilds the WAL journal from the files actually on disk.
    RebuildXlogdb { server: String },
    /// Picks up new WAL from the incoming spool and streaming directory.
    ArchiveWal { server: String },
    /// Lists the files that make up one backup.
    ListFiles {
        server: String,
        backup_id: String,
        /// standalone, data, wal, or full.
        #[arg(long, default_value = "standalone")]
        target: String,
    },

    /// Fetches one archived WAL segment.
    GetWal {
        server: String,
        segment: String,
        /// Write into this directory instead of stdout.
        #[arg(short = 'o', long)]
        output_directory: Option<PathBuf>,
        /// List the next N segment names instead of transferring data.
        #[arg(long)]
        peek: Option<usize>,
    },
    /// Reads one WAL segment from stdin into the incoming spool.
    PutWal { server: String, segment: String },
    /// Requests an immediate WAL segment switch.
    SwitchWal {
        server: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        archive: bool,
        /// e.g. `30s`, `2min`.
        #[arg(long, value_parser = parse_duration)]
        archive_timeout: Option<Duration>,
    },
    /// Starts (or stops) continuous streaming WAL replication.
    ReceiveWal {
        server: String,
        #[arg(long)]
        stop: bool,
        #[arg(long)]
        reset: bool,
        #[arg(long)]
        create_slot: bool,
        #[arg(long)]
        drop_slot: bool,
    },

    /// Prints this node's sync-info snapshot (primary side).
    SyncInfo {
        server: String,
        /// Resume from this journal position: `<last_wal> <last_position>`.
        /// Both must be given together, or neither.
        last_wal: Option<String>,
        last_position: Option<u64>,
        #[arg(long)]
        primary: bool,
    },
    /// Mirrors one backup from a primary's sync-info snapshot (read from
    /// stdin) onto this passive node.
    SyncBackup {
        server: String,
        backup_id: String,
        #[arg(long)]
        primary_basebackups_directory: PathBuf,
    },
    /// Mirrors new WAL from a primary's sync-info snapshot (read from
    /// stdin) onto this passive node.
    SyncWals {
        server: String,
        #[arg(long)]
        primary_wals_directory: PathBuf,
        #[arg(long)]
        primary_compression: Option<String>,
    },

    /// Dumps configuration and catalog state as JSON, for bug reports.
    Diagnose { server: String },
    /// Reports the state of connected streaming replication clients.
    ReplicationStatus { server: String },
}
