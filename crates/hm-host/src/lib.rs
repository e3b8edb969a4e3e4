//! ---
//! hm_section: "05-host-bootstrap"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Host initializer and bootstrap collaborators."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Turns a bare VM into a Kubernetes development host exactly once.
//!
//! [`HostInitializer`] sequences the bootstrap and commits the result to the
//! state store. Storage detection, package installation, and storage setup sit
//! behind traits; [`Ec2StorageDetector`], [`DnfPackageInstaller`], and
//! [`SystemStorageConfigurator`] are the production implementations.

use std::path::PathBuf;

use async_trait::async_trait;
use hm_kind::ToolError;
use hm_state::StorageDescriptor;

pub mod init;
pub mod metadata;
pub mod packages;
pub mod storage;

pub use init::{HostInitializer, InitCause, InitError, InitOutcome, InitPhase};
pub use metadata::Ec2StorageDetector;
pub use packages::DnfPackageInstaller;
pub use storage::SystemStorageConfigurator;

/// Result alias for host collaborators.
pub type Result<T> = std::result::Result<T, HostError>;

/// Failure raised by a bootstrap collaborator.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The instance metadata service could not be used.
    #[error("instance metadata unavailable: {0}")]
    Metadata(String),
    /// HTTP transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// A download answered with a non-success status.
    #[error("download of {url} failed with status {status}")]
    Download {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// An external command failed.
    #[error(transparent)]
    Tool(#[from] ToolError),
    /// Filesystem access failed.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },
    /// The host architecture has no published binaries.
    #[error("unsupported architecture: {0}")]
    UnsupportedArch(String),
    /// The storage descriptor cannot be acted upon.
    #[error("invalid storage descriptor: {0}")]
    InvalidStorage(String),
    /// Failure reported by a collaborator without a more specific category.
    #[error("{0}")]
    Other(String),
}

impl HostError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HostError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Discovers the storage layout and instance type of the host.
#[async_trait]
pub trait StorageDetector: Send + Sync {
    /// Classify the host's storage.
    async fn detect(&self) -> Result<StorageDescriptor>;

    /// Cloud instance type. Callers fall back to `unknown` on error.
    async fn instance_type(&self) -> Result<String>;
}

/// Installs system packages and cluster tooling. All-or-nothing per call.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install everything the host needs. Safe to repeat.
    async fn install(&self) -> Result<()>;
}

/// Prepares container storage for the detected layout.
#[async_trait]
pub trait StorageConfigurator: Send + Sync {
    /// Format, mount, and configure storage as `storage` dictates. Safe to repeat.
    async fn configure(&self, storage: &StorageDescriptor) -> Result<()>;
}

/// Write `payload` next to `path`, set `mode`, then rename over `path`.
pub(crate) async fn write_atomic(
    path: &std::path::Path,
    payload: &[u8],
    mode: u32,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| HostError::io(parent, err))?;
    }
    let tmp_path = path.with_extension("partial");
    tokio::fs::write(&tmp_path, payload)
        .await
        .map_err(|err| HostError::io(&tmp_path, err))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|err| HostError::io(&tmp_path, err))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|err| HostError::io(path, err))?;
    Ok(())
}
