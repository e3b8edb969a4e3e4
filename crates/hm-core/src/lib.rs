//! ---
//! hm_section: "01-core-functionality"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Cluster orchestration and lifecycle management."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
//! Request-facing cluster lifecycle for the host manager: validation against
//! host state, delegation to the cluster tool, and reconciliation afterwards.

pub mod error;
pub mod orchestrator;
pub mod view;

pub use error::{CoreError, ErrorKind, Result};
pub use orchestrator::{validate_cluster_name, ClusterOrchestrator, MAX_CLUSTER_NAME_LEN};
pub use view::{ClusterView, Health, RegistryStatus};
