//! The passive-node half of the sync protocol: given a primary's
//! `sync-info` snapshot, reconcile the local catalog and WAL journal with
//! it. The primary-node half (building the snapshot in the first place)
//! lives in [`snapshot`].

mod backup_sync;
mod snapshot;
mod wal_sync;

pub use backup_sync::{check_sync_required, sync_backup, SyncOutcome};
pub use snapshot::{build_sync_info, SyncSnapshot};
pub use wal_sync::{sync_wals, SyncWalsOutcome};
