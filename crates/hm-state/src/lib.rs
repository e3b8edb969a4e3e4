//! ---
//! hm_section: "03-persistence-logging"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Host state persistence and mutation primitives."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! The single authoritative record of what has been provisioned on the host.
//!
//! [`StateStore`] owns the on-disk representation. Every mutation goes through
//! a load, mutate, save cycle serialised by a lock scoped to the state-file
//! path, and every save replaces the file atomically.

use std::path::PathBuf;

pub mod backend;
pub mod model;
pub mod store;

pub use backend::{FileBackend, MemoryBackend, StateBackend};
pub use model::{
    ClusterInfo, ClusterStatus, ClusterType, HostState, StorageDescriptor, StorageType,
};
pub use store::StateStore;

/// Result alias used throughout the state crate.
pub type Result<T> = std::result::Result<T, StateError>;

/// Error type for the state store.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The persisted record exists but cannot be parsed.
    #[error("state record {} is corrupt: {source}", path.display())]
    Corrupt {
        /// Location of the unreadable record.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: serde_json::Error,
    },
    /// Reading or writing the record failed.
    #[error("state io error on {}: {source}", path.display())]
    Io {
        /// Location being accessed.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },
    /// The in-memory state could not be serialised.
    #[error("failed to encode host state: {0}")]
    Encode(#[source] serde_json::Error),
}
