//! MaxIOFS metadata store
//!
//! An ordered key-value layer over redb providing prefix scans for S3
//! listings and atomic multi-key batches for compound updates (object
//! record + tenant usage + event + replication task commit together or
//! not at all).

pub mod keys;
pub mod store;

pub use store::{BatchOp, MetaError, MetaStore, ScanEntry};
