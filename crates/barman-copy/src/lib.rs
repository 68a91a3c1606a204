//! The bulk data mover used by backup and recovery: given a list of
//! directories and files to transfer, copies them in the fixed class
//! order the rest of the system depends on, with bounded parallelism,
//! per-item retry, and optional reuse of a previous backup's files.

mod job;
mod pattern;
mod treecopy;

pub use job::{
    copy, CopyItem, CopyJob, CopyStats, DirectoryItem, FileItem, ItemClass, NoopRetryCallback,
    ReuseMode, RetryCallback,
};
