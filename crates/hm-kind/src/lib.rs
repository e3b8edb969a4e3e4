//! ---
//! hm_section: "04-cluster-tooling"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Cluster tool adapter over kind and the container runtime."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Every interaction with `kind` and the container runtime goes through
//! [`ClusterTool`]. The production implementation, [`KindCli`], shells out via
//! a [`CommandRunner`] so that each call is bounded by a timeout.

use std::time::Duration;

use async_trait::async_trait;

pub mod exec;
pub mod kind;
pub mod templates;

pub use exec::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use kind::KindCli;
pub use templates::ClusterTemplate;

/// Result alias for cluster tool operations.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Failure of an external tool invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The binary could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// Command line that was attempted.
        command: String,
        /// Underlying spawn failure.
        #[source]
        source: std::io::Error,
    },
    /// The command ran and exited unsuccessfully.
    #[error("`{command}` failed (exit code {code:?}): {output}")]
    Failed {
        /// Command line that failed.
        command: String,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Combined stdout and stderr.
        output: String,
    },
    /// The command did not finish within its bound and was killed.
    #[error("`{command}` timed out after {after:?}")]
    Timeout {
        /// Command line that timed out.
        command: String,
        /// Configured bound.
        after: Duration,
    },
    /// Pipe or wait failure while the command was running.
    #[error("io error while running `{command}`: {source}")]
    Io {
        /// Command line being run.
        command: String,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    /// Whether the failure is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ToolError::Timeout { .. })
    }
}

/// Live state of the shared registry container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    /// No container with the registry name exists.
    Absent,
    /// The container exists but is not running.
    Stopped,
    /// The container is running.
    Running,
}

/// Operations the host manager needs from the cluster tooling.
#[async_trait]
pub trait ClusterTool: Send + Sync {
    /// Create cluster `name`. An existing cluster of that name counts as success.
    /// With `attach_registry` every node is pointed at the shared registry and the
    /// registry joins the cluster network.
    async fn create_cluster(&self, name: &str, attach_registry: bool) -> Result<()>;

    /// Delete cluster `name`.
    async fn delete_cluster(&self, name: &str) -> Result<()>;

    /// Names of clusters known to the tool.
    async fn list_clusters(&self) -> Result<Vec<String>>;

    /// Kubeconfig document for cluster `name`.
    async fn get_kubeconfig(&self, name: &str) -> Result<String>;

    /// Load a locally available image into cluster `name`.
    async fn load_image(&self, name: &str, image: &str) -> Result<()>;

    /// Probe the registry container.
    async fn registry_state(&self) -> Result<RegistryState>;

    /// Create or start the registry container as needed.
    async fn ensure_registry(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_error_reports_command_and_bound() {
        let err = ToolError::Timeout {
            command: "kind get clusters".into(),
            after: Duration::from_secs(5),
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "`kind get clusters` timed out after 5s");
    }
}
