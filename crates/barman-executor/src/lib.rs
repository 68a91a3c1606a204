//! Runs one backup attempt against a managed server: probes the
//! database, brackets the data transfer with the right start/stop
//! protocol for the configured coordination mode, and hands the bulk
//! copy to whichever transport the server is configured for.

mod client;
mod coordination;
mod executor;
mod transport;

pub use client::{BackupEndpointResponse, ConcurrentStopResponse, DatabaseClient, DatabaseProbe};
pub use coordination::{
    ConcurrentCoordinator, Coordinator, DatabaseStreamingCoordinator, ExclusiveCoordinator,
    PassiveMirrorCoordinator,
};
pub use executor::{execute, validate_combination};
pub use transport::{DatabaseStreamingOptions, FileCopyRemoteOptions, Transport, TransportOutcome};
