//! Durable per-tablet consensus metadata for TabletDB.
//!
//! Each tablet replica keeps a small durable record of its Raft state: the
//! current term, who it voted for in that term, and the committed peer
//! configuration. This crate owns that record end to end:
//!
//! - [`Env`]/[`DiskEnv`] - the filesystem collaborator (existence checks,
//!   directory creation, fsync, deletion)
//! - [`FsManager`] - path layout for the consensus metadata directory
//! - [`ConsensusMetadata`] - the in-memory object with its load/create/flush
//!   lifecycle, volatile leader/pending-config state, and a lock-free packed
//!   (role, term) cache for hot-path readers
//!
//! The record file is a checksummed container (magic, version, XXH3-64,
//! postcard payload) written atomically via temp-file + rename.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cmeta;
pub mod container;
pub mod env;
mod fault;
pub mod fs_manager;

pub use cmeta::{
    ConfigKind, ConsensusMetadata, ConsensusMetadataRecord, CreateMode, FlushMode, MINIMUM_TERM,
};
pub use env::{DiskEnv, Env, OverwritePolicy, SyncPolicy};
pub use fs_manager::FsManager;

use snafu::Snafu;

/// Result type alias for consensus metadata operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur in consensus metadata operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// A file that must not be clobbered already exists.
    #[snafu(display("File {path} already exists"))]
    AlreadyPresent {
        /// The conflicting path.
        path: String,
    },

    /// A mutator was called with a value violating its precondition.
    #[snafu(display("Invalid argument: {message}"))]
    InvalidArgument {
        /// Description of the violated precondition.
        message: String,
    },

    /// The committed configuration failed verification before a flush.
    #[snafu(display("Invalid config in ConsensusMetadata, cannot flush to disk: {source}"))]
    InvalidConfig {
        /// The underlying verification failure.
        source: tabletdb_types::RaftConfigError,
    },

    /// An on-disk record is malformed.
    #[snafu(display("Corrupted consensus metadata in {path}: {reason}"))]
    Corrupted {
        /// Path of the malformed file.
        path: String,
        /// What was malformed.
        reason: String,
    },

    /// A filesystem operation failed.
    #[snafu(display("{context}: {source}"))]
    Io {
        /// Operation context, naming the tablet and path where relevant.
        context: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Serialization of the durable record failed.
    #[snafu(display("Unable to serialize consensus metadata: {source}"))]
    Codec {
        /// The underlying codec error.
        source: tabletdb_types::CodecError,
    },
}
