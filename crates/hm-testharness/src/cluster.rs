//! ---
//! hm_section: "11-test-harness"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "In-memory cluster tool double."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use hm_kind::{ClusterTool, RegistryState, ToolError};
use parking_lot::Mutex;
use tracing::debug;

/// Operations of [`ClusterTool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolOp {
    CreateCluster,
    DeleteCluster,
    ListClusters,
    GetKubeconfig,
    LoadImage,
    RegistryState,
    EnsureRegistry,
}

/// One recorded call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    CreateCluster { name: String, attach_registry: bool },
    DeleteCluster { name: String },
    ListClusters,
    GetKubeconfig { name: String },
    LoadImage { name: String, image: String },
    RegistryState,
    EnsureRegistry,
}

impl ToolCall {
    fn op(&self) -> ToolOp {
        match self {
            ToolCall::CreateCluster { .. } => ToolOp::CreateCluster,
            ToolCall::DeleteCluster { .. } => ToolOp::DeleteCluster,
            ToolCall::ListClusters => ToolOp::ListClusters,
            ToolCall::GetKubeconfig { .. } => ToolOp::GetKubeconfig,
            ToolCall::LoadImage { .. } => ToolOp::LoadImage,
            ToolCall::RegistryState => ToolOp::RegistryState,
            ToolCall::EnsureRegistry => ToolOp::EnsureRegistry,
        }
    }
}

/// Injected failure for an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The command exits non-zero with this output.
    Exit(String),
    /// The command exceeds its bound.
    Timeout,
}

impl Failure {
    fn into_error(self, op: ToolOp) -> ToolError {
        let command = format!("fake {op:?}");
        match self {
            Failure::Exit(output) => ToolError::Failed {
                command,
                code: Some(1),
                output,
            },
            Failure::Timeout => ToolError::Timeout {
                command,
                after: Duration::from_secs(1),
            },
        }
    }
}

#[derive(Debug)]
struct Inner {
    clusters: BTreeSet<String>,
    registry: RegistryState,
    calls: Vec<ToolCall>,
    failures: HashMap<ToolOp, Failure>,
}

/// [`ClusterTool`] keeping clusters in memory.
#[derive(Debug)]
pub struct FakeClusterTool {
    inner: Mutex<Inner>,
    create_delay: Duration,
}

impl Default for FakeClusterTool {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClusterTool {
    /// No clusters, registry absent.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                clusters: BTreeSet::new(),
                registry: RegistryState::Absent,
                calls: Vec::new(),
                failures: HashMap::new(),
            }),
            create_delay: Duration::ZERO,
        }
    }

    /// Pretend `names` already exist in the tool.
    pub fn with_clusters<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .lock()
            .clusters
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Sleep this long inside every create, to widen race windows.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// Set the registry container state.
    pub fn set_registry(&self, state: RegistryState) {
        self.inner.lock().registry = state;
    }

    /// Fail every subsequent call of `op`.
    pub fn fail(&self, op: ToolOp, failure: Failure) {
        self.inner.lock().failures.insert(op, failure);
    }

    /// Stop failing `op`.
    pub fn heal(&self, op: ToolOp) {
        self.inner.lock().failures.remove(&op);
    }

    /// Stop failing anything.
    pub fn heal_all(&self) {
        self.inner.lock().failures.clear();
    }

    /// Recorded calls, in order.
    pub fn calls(&self) -> Vec<ToolCall> {
        self.inner.lock().calls.clone()
    }

    /// Number of recorded calls of `op`.
    pub fn count(&self, op: ToolOp) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    /// Forget recorded calls.
    pub fn reset_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Clusters the fake currently holds.
    pub fn clusters(&self) -> Vec<String> {
        self.inner.lock().clusters.iter().cloned().collect()
    }

    /// Current registry state.
    pub fn registry(&self) -> RegistryState {
        self.inner.lock().registry
    }

    fn record(&self, call: ToolCall) -> hm_kind::Result<()> {
        let op = call.op();
        let mut inner = self.inner.lock();
        debug!(?call, "fake cluster tool call");
        inner.calls.push(call);
        match inner.failures.get(&op).cloned() {
            Some(failure) => Err(failure.into_error(op)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ClusterTool for FakeClusterTool {
    async fn create_cluster(&self, name: &str, attach_registry: bool) -> hm_kind::Result<()> {
        self.record(ToolCall::CreateCluster {
            name: name.to_owned(),
            attach_registry,
        })?;
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        self.inner.lock().clusters.insert(name.to_owned());
        Ok(())
    }

    async fn delete_cluster(&self, name: &str) -> hm_kind::Result<()> {
        self.record(ToolCall::DeleteCluster {
            name: name.to_owned(),
        })?;
        self.inner.lock().clusters.remove(name);
        Ok(())
    }

    async fn list_clusters(&self) -> hm_kind::Result<Vec<String>> {
        self.record(ToolCall::ListClusters)?;
        Ok(self.clusters())
    }

    async fn get_kubeconfig(&self, name: &str) -> hm_kind::Result<String> {
        self.record(ToolCall::GetKubeconfig {
            name: name.to_owned(),
        })?;
        Ok(format!(
            "apiVersion: v1\nkind: Config\ncurrent-context: kind-{name}\n"
        ))
    }

    async fn load_image(&self, name: &str, image: &str) -> hm_kind::Result<()> {
        self.record(ToolCall::LoadImage {
            name: name.to_owned(),
            image: image.to_owned(),
        })
    }

    async fn registry_state(&self) -> hm_kind::Result<RegistryState> {
        self.record(ToolCall::RegistryState)?;
        Ok(self.registry())
    }

    async fn ensure_registry(&self) -> hm_kind::Result<()> {
        self.record(ToolCall::EnsureRegistry)?;
        self.set_registry(RegistryState::Running);
        Ok(())
    }
}
