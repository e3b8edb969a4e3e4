//! ---
//! hm_section: "03-persistence-logging"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Host state persistence and mutation primitives."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Aggregate persisted as the host state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostState {
    /// Set once at the end of a successful initialization run.
    #[serde(default)]
    pub initialized: bool,
    /// When initialization completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialized_at: Option<DateTime<Utc>>,
    /// EC2 instance type, or `unknown`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_type: String,
    /// Derived from [`StorageDescriptor::storage_type`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage_type: String,
    /// Block device backing container storage, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage_device: String,
    /// Progress flag for the package installation step.
    #[serde(default)]
    pub packages_installed: bool,
    /// Progress flag for the reserved infrastructure cluster.
    #[serde(default)]
    pub base_cluster_ready: bool,
    /// Progress flag for the shared registry container.
    #[serde(default)]
    pub registry_running: bool,
    /// Managed clusters keyed by name.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub clusters: BTreeMap<String, ClusterInfo>,
}

impl HostState {
    /// Look up a managed cluster by name.
    pub fn cluster(&self, name: &str) -> Option<&ClusterInfo> {
        self.clusters.get(name)
    }

    /// Whether a cluster with `name` is tracked.
    pub fn has_cluster(&self, name: &str) -> bool {
        self.clusters.contains_key(name)
    }

    /// Name and entry of the infrastructure cluster, if one is tracked.
    pub fn infrastructure_cluster(&self) -> Option<(&str, &ClusterInfo)> {
        self.clusters
            .iter()
            .find(|(_, info)| info.cluster_type == ClusterType::Infrastructure)
            .map(|(name, info)| (name.as_str(), info))
    }
}

// Older records may carry `"clusters": null`.
fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, ClusterInfo>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, ClusterInfo>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One entry per managed cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Last known status.
    pub status: ClusterStatus,
    /// When the entry was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// Infrastructure or development.
    #[serde(rename = "type")]
    pub cluster_type: ClusterType,
    /// Whether KubeVirt was requested for the cluster.
    #[serde(default)]
    pub kubevirt: bool,
}

/// Cluster status as tracked in state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    /// Created and expected to be serving.
    Running,
    /// Present but not serving.
    Stopped,
    /// Last operation on the cluster failed.
    Error,
}

impl ClusterStatus {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Running => "running",
            ClusterStatus::Stopped => "stopped",
            ClusterStatus::Error => "error",
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a cluster on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    /// The reserved base cluster created during initialization.
    Infrastructure,
    /// Any cluster created through the API.
    Development,
}

impl ClusterType {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterType::Infrastructure => "infrastructure",
            ClusterType::Development => "development",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage layout reported by a storage detector. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDescriptor {
    /// Whether a local NVMe instance store is available.
    pub has_nvme: bool,
    /// Device path of the instance store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Storage classification.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
}

impl StorageDescriptor {
    /// Descriptor for an NVMe instance store at `device`.
    pub fn instance_store(device: impl Into<String>) -> Self {
        Self {
            has_nvme: true,
            device: Some(device.into()),
            storage_type: StorageType::InstanceStore,
        }
    }

    /// Descriptor for a host with network-backed storage only.
    pub fn ebs_only() -> Self {
        Self {
            has_nvme: false,
            device: None,
            storage_type: StorageType::EbsOnly,
        }
    }

    /// Device path, or an empty string when none applies.
    pub fn device_or_empty(&self) -> &str {
        self.device.as_deref().unwrap_or_default()
    }
}

/// Storage classification for the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageType {
    /// Locally attached NVMe instance store.
    InstanceStore,
    /// Network-backed block storage only.
    EbsOnly,
}

impl StorageType {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::InstanceStore => "instance-store",
            StorageType::EbsOnly => "ebs-only",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
