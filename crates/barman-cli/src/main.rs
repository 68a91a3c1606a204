//! `barman`: the command-line front end over the backup/catalog engine.
//!
//! This binary owns everything the engine crates deliberately don't:
//! argument parsing, configuration loading, process exit codes, and log
//! initialization. Every subcommand below is a thin dispatch into
//! `barman_manager`/`barman_catalog`/`barman_copy`/`barman_sync`; the
//! actual logic lives there.

mod cli;
mod client;
mod commands;
mod config;
mod error;

use clap::Parser;
use cli::{Cli, Command};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn server_name(command: &Command) -> &str {
    match command {
        Command::Backup { server }
        | Command::Cron { server }
        | Command::ShowServer { server }
        | Command::Status { server }
        | Command::RebuildXlogdb { server }
        | Command::ArchiveWal { server }
        | Command::ListBackup { server }
        | Command::Diagnose { server }
        | Command::ReplicationStatus { server } => server,
        Command::Delete { server, .. }
        | Command::CheckBackup { server, .. }
        | Command::Check { server, .. }
        | Command::Recover { server, .. }
        | Command::ShowBackup { server, .. }
        | Command::ListFiles { server, .. }
        | Command::GetWal { server, .. }
        | Command::PutWal { server, .. }
        | Command::SwitchWal { server, .. }
        | Command::ReceiveWal { server, .. }
        | Command::SyncInfo { server, .. }
        | Command::SyncBackup { server, .. }
        | Command::SyncWals { server, .. } => server,
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let barman_home = cli.barman_home.clone().unwrap_or_else(config::default_barman_home);

    let result = run(&cli, &barman_home).await;
    if let Err(err) = result {
        std::process::exit(error::report_error(&err));
    }
}

async fn run(cli: &Cli, barman_home: &std::path::Path) -> barman_core::Result<()> {
    let server = server_name(&cli.command);
    let config = config::load_server_config(barman_home, server)?;

    match &cli.command {
        Command::Backup { .. } => commands::backup_cmds::backup(&config).await,
        Command::Delete { backup_id, .. } => commands::backup_cmds::delete(&config, backup_id).await,
        Command::Cron { .. } => commands::backup_cmds::cron(&config).await,
        Command::CheckBackup { backup_id, .. } => commands::backup_cmds::check_backup(&config, backup_id),
        Command::Check { nagios, .. } => commands::backup_cmds::check(&config, *nagios),
        Command::Recover { backup_id, destination, .. } => {
            commands::backup_cmds::recover(&config, backup_id, destination).await
        }

        Command::ListBackup { .. } => commands::catalog_cmds::list_backup(&config),
        Command::ShowBackup { backup_id, .. } => commands::catalog_cmds::show_backup(&config, backup_id),
        Command::ShowServer { .. } => commands::catalog_cmds::show_server(&config),
        Command::Status { .. } => commands::catalog_cmds::status(&config),
        Command::RebuildXlogdb { .. } => commands::catalog_cmds::rebuild_xlogdb(&config),
        Command::ArchiveWal { .. } => commands::catalog_cmds::archive_wal(&config).await,
        Command::ListFiles { backup_id, target, .. } => {
            commands::catalog_cmds::list_files(&config, backup_id, target)
        }

        Command::GetWal { segment, output_directory, peek, .. } => {
            commands::wal_cmds::get_wal(&config, segment, output_directory.as_deref(), *peek)
        }
        Command::PutWal { segment, .. } => commands::wal_cmds::put_wal(&config, segment),
        Command::SwitchWal { force, archive, archive_timeout, .. } => {
            commands::wal_cmds::switch_wal(*force, *archive, *archive_timeout).await
        }
        Command::ReceiveWal { stop, reset, create_slot, drop_slot, .. } => {
            commands::wal_cmds::receive_wal(*stop, *reset, *create_slot, *drop_slot)
        }

        Command::SyncInfo { last_wal, last_position, .. } => {
            let since = match (last_wal, last_position) {
                (Some(name), Some(pos)) => Some((name.as_str(), *pos)),
                _ => None,
            };
            commands::sync_cmds::sync_info(&config, since)
        }
        Command::SyncBackup { backup_id, primary_basebackups_directory, .. } => {
            commands::sync_cmds::sync_backup(&config, backup_id, primary_basebackups_directory).await
        }
        Command::SyncWals { primary_wals_directory, primary_compression, .. } => {
            commands::sync_cmds::sync_wals(
                &config,
                primary_wals_directory,
                primary_compression.as_deref(),
            )
            .await
        }

        Command::Diagnose { .. } => commands::diagnose::diagnose(&config),
        Command::ReplicationStatus { .. } => commands::diagnose::replication_status(&config),
    }
}
