//! ---
//! hm_section: "01-core-functionality"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Response projections of host and cluster state."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use hm_state::{ClusterInfo, ClusterStatus, ClusterType};
use serde::{Deserialize, Serialize};

/// Public shape of one tracked cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterView {
    pub name: String,
    pub status: ClusterStatus,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub cluster_type: ClusterType,
    #[serde(default)]
    pub kubevirt: bool,
}

impl ClusterView {
    /// Project a state entry.
    pub fn new(name: &str, info: &ClusterInfo) -> Self {
        Self {
            name: name.to_owned(),
            status: info.status,
            created: info.created,
            cluster_type: info.cluster_type,
            kubevirt: info.kubevirt,
        }
    }
}

/// Shared registry descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStatus {
    pub running: bool,
    pub port: u16,
    pub url: String,
}

/// Liveness summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub initialized: bool,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_uses_wire_field_names() {
        let info = ClusterInfo {
            status: ClusterStatus::Running,
            created: None,
            cluster_type: ClusterType::Development,
            kubevirt: true,
        };
        let value = serde_json::to_value(ClusterView::new("dev1", &info)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "name": "dev1",
                "status": "running",
                "created": null,
                "type": "development",
                "kubevirt": true,
            })
        );
    }
}
