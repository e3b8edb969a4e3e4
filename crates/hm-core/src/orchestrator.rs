//! ---
//! hm_section: "01-core-functionality"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Cluster lifecycle operations reconciled against host state."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use hm_common::{ClusterConfig, RegistryConfig, VersionInfo};
use hm_kind::{ClusterTool, RegistryState};
use hm_metrics::{HostMetrics, Outcome};
use hm_state::{ClusterStatus, ClusterType, HostState, StateStore};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{CoreError, Result};
use crate::view::{ClusterView, Health, RegistryStatus};

/// Longest accepted cluster name; kind derives DNS labels from it.
pub const MAX_CLUSTER_NAME_LEN: usize = 63;

/// Check a cluster name: lowercase alphanumerics and `-`, not leading with `-`.
pub fn validate_cluster_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name must not be empty")
    } else if name.len() > MAX_CLUSTER_NAME_LEN {
        Some("name must be at most 63 characters")
    } else if name.starts_with('-') {
        Some("name must not start with '-'")
    } else if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        Some("name may only contain lowercase letters, digits and '-'")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(CoreError::InvalidRequest(format!("{reason}: {name:?}"))),
        None => Ok(()),
    }
}

/// Removes a name from the in-flight set when the create finishes or is dropped.
struct InFlight<'a> {
    creating: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.creating.lock().remove(&self.name);
    }
}

/// Request-facing cluster operations.
///
/// Every mutation validates against a fresh snapshot of host state, calls the
/// cluster tool, then commits through the [`StateStore`]. Tool calls run
/// concurrently; only the commit is serialised, inside the store.
pub struct ClusterOrchestrator {
    store: Arc<StateStore>,
    tool: Arc<dyn ClusterTool>,
    base_name: String,
    registry: RegistryConfig,
    version: String,
    metrics: Option<HostMetrics>,
    creating: Mutex<HashSet<String>>,
}

impl ClusterOrchestrator {
    pub fn new(
        store: Arc<StateStore>,
        tool: Arc<dyn ClusterTool>,
        cluster: &ClusterConfig,
        registry: &RegistryConfig,
    ) -> Self {
        Self {
            store,
            tool,
            base_name: cluster.base_name.clone(),
            registry: registry.clone(),
            version: VersionInfo::current().semver,
            metrics: None,
            creating: Mutex::new(HashSet::new()),
        }
    }

    /// Record operation counts and tool timings into `metrics`.
    pub fn with_metrics(mut self, metrics: HostMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Name of the reserved infrastructure cluster.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn health(&self) -> Result<Health> {
        let state = self.store.load()?;
        Ok(Health {
            status: "healthy".to_owned(),
            initialized: state.initialized,
            version: self.version.clone(),
        })
    }

    pub fn host_status(&self) -> Result<HostState> {
        Ok(self.store.load()?)
    }

    pub fn list_clusters(&self) -> Result<Vec<ClusterView>> {
        let state = self.store.load()?;
        self.set_cluster_gauge(&state);
        Ok(state
            .clusters
            .iter()
            .map(|(name, info)| ClusterView::new(name, info))
            .collect())
    }

    pub fn get_cluster(&self, name: &str) -> Result<ClusterView> {
        let state = self.store.load()?;
        state
            .cluster(name)
            .map(|info| ClusterView::new(name, info))
            .ok_or_else(|| CoreError::NotFound(name.to_owned()))
    }

    /// Create and track a cluster attached to the shared registry.
    #[instrument(skip_all, fields(cluster = %name))]
    pub async fn create_cluster(&self, name: &str, kubevirt: bool) -> Result<ClusterView> {
        let result = self.try_create(name, kubevirt).await;
        self.record("create", &result);
        result
    }

    async fn try_create(&self, name: &str, kubevirt: bool) -> Result<ClusterView> {
        validate_cluster_name(name)?;
        let _in_flight = self.claim(name)?;
        if self.store.load()?.has_cluster(name) {
            return Err(CoreError::AlreadyExists(name.to_owned()));
        }

        self.timed("create_cluster", self.tool.create_cluster(name, true))
            .await?;

        let cluster_type = if name == self.base_name {
            ClusterType::Infrastructure
        } else {
            ClusterType::Development
        };
        if let Err(err) =
            self.store
                .upsert_cluster(name, ClusterStatus::Running, cluster_type, kubevirt)
        {
            warn!(error = %err, "cluster created but could not be recorded; retrying the create is safe");
            return Err(err.into());
        }

        let state = self.store.load()?;
        self.set_cluster_gauge(&state);
        info!(cluster_type = %cluster_type, kubevirt, "cluster created");
        state
            .cluster(name)
            .map(|info| ClusterView::new(name, info))
            .ok_or_else(|| CoreError::NotFound(name.to_owned()))
    }

    /// Delete a cluster. State removal after a successful tool delete is best effort.
    #[instrument(skip_all, fields(cluster = %name))]
    pub async fn delete_cluster(&self, name: &str) -> Result<()> {
        let result = self.try_delete(name).await;
        self.record("delete", &result);
        result
    }

    async fn try_delete(&self, name: &str) -> Result<()> {
        if name == self.base_name {
            return Err(CoreError::Protected(name.to_owned()));
        }
        validate_cluster_name(name)?;
        // A base cluster recorded under an earlier configured name stays protected.
        if let Some((infra, _)) = self.store.load()?.infrastructure_cluster() {
            if infra == name {
                return Err(CoreError::Protected(name.to_owned()));
            }
        }
        self.timed("delete_cluster", self.tool.delete_cluster(name))
            .await?;

        match self.store.remove_cluster(name) {
            Ok(()) => {
                if let Ok(state) = self.store.load() {
                    self.set_cluster_gauge(&state);
                }
                info!("cluster deleted");
            }
            Err(err) => {
                warn!(error = %err, "cluster deleted but state entry could not be removed");
            }
        }
        Ok(())
    }

    /// Kubeconfig of a tracked cluster.
    pub async fn kubeconfig(&self, name: &str) -> Result<String> {
        if !self.store.load()?.has_cluster(name) {
            return Err(CoreError::NotFound(name.to_owned()));
        }
        Ok(self
            .timed("get_kubeconfig", self.tool.get_kubeconfig(name))
            .await?)
    }

    /// Load a local image into a cluster's nodes. Image residency is not tracked.
    #[instrument(skip_all, fields(cluster = %name))]
    pub async fn load_image(&self, name: &str, image: &str) -> Result<()> {
        let result = self.try_load_image(name, image).await;
        self.record("load_image", &result);
        result
    }

    async fn try_load_image(&self, name: &str, image: &str) -> Result<()> {
        validate_cluster_name(name)?;
        if image.trim().is_empty() {
            return Err(CoreError::InvalidRequest("image must not be empty".into()));
        }
        self.timed("load_image", self.tool.load_image(name, image))
            .await?;
        info!(%image, "image loaded");
        Ok(())
    }

    /// Registry descriptor. `running` is only checked when live status is enabled.
    pub async fn registry_status(&self) -> Result<RegistryStatus> {
        let running = if self.registry.live_status {
            let state = self
                .timed("registry_state", self.tool.registry_state())
                .await?;
            state == RegistryState::Running
        } else {
            true
        };
        Ok(RegistryStatus {
            running,
            port: self.registry.host_port,
            url: self.registry.url(),
        })
    }

    #[instrument(skip_all)]
    pub async fn start_registry(&self) -> Result<()> {
        let result = self.try_start_registry().await;
        self.record("start_registry", &result);
        result
    }

    async fn try_start_registry(&self) -> Result<()> {
        self.timed("ensure_registry", self.tool.ensure_registry())
            .await?;
        self.store.set_registry_running(true)?;
        info!(registry = %self.registry.container_name, "registry running");
        Ok(())
    }

    fn claim(&self, name: &str) -> Result<InFlight<'_>> {
        if !self.creating.lock().insert(name.to_owned()) {
            debug!(cluster = %name, "create already in flight");
            return Err(CoreError::CreateInProgress(name.to_owned()));
        }
        Ok(InFlight {
            creating: &self.creating,
            name: name.to_owned(),
        })
    }

    async fn timed<T>(
        &self,
        operation: &str,
        call: impl Future<Output = hm_kind::Result<T>>,
    ) -> hm_kind::Result<T> {
        let _timer = self.metrics.as_ref().map(|m| m.tool_timer(operation));
        call.await
    }

    fn record<T>(&self, operation: &str, result: &Result<T>) {
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(operation, Outcome::of(result));
        }
        if let Err(err) = result {
            debug!(operation, kind = %err.kind(), error = %err, "cluster operation failed");
        }
    }

    fn set_cluster_gauge(&self, state: &HostState) {
        if let Some(metrics) = &self.metrics {
            metrics.set_managed_clusters(state.clusters.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dns_style_names() {
        for name in ["dev1", "kind", "a", "team-a-2", &"x".repeat(63)] {
            assert!(validate_cluster_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_malformed_names() {
        for name in ["", "-dev", "Dev1", "dev_1", "dev.1", "dev 1", &"x".repeat(64)] {
            let err = validate_cluster_name(name).unwrap_err();
            assert!(matches!(err, CoreError::InvalidRequest(_)), "{name}");
        }
    }
}
