//! ---
//! hm_section: "05-host-bootstrap"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "One-shot host initialization state machine."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use hm_kind::{ClusterTool, ToolError};
use hm_state::{ClusterStatus, ClusterType, StateError, StateStore, StorageDescriptor};
use tracing::{info, instrument, warn};

use crate::{HostError, PackageInstaller, StorageConfigurator, StorageDetector};

const UNKNOWN_INSTANCE_TYPE: &str = "unknown";

/// Progress of a single initialization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    /// Nothing done yet in this run.
    Fresh,
    /// Storage layout and instance type known.
    StorageDetected,
    /// Packages and tooling installed.
    PackagesInstalled,
    /// Container storage prepared.
    StorageConfigured,
    /// Registry and base cluster exist.
    BaseInfraCreated,
    /// Result committed; the host is initialized.
    Initialized,
}

impl InitPhase {
    /// Short label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            InitPhase::Fresh => "fresh",
            InitPhase::StorageDetected => "storage-detected",
            InitPhase::PackagesInstalled => "packages-installed",
            InitPhase::StorageConfigured => "storage-configured",
            InitPhase::BaseInfraCreated => "base-infra-created",
            InitPhase::Initialized => "initialized",
        }
    }
}

impl fmt::Display for InitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`HostInitializer::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// The persisted state was already initialized; nothing ran.
    AlreadyInitialized,
    /// Every step ran and the result was committed.
    Initialized {
        /// Detected instance type, or `unknown`.
        instance_type: String,
        /// Detected storage layout.
        storage: StorageDescriptor,
    },
}

/// Underlying cause of an initialization failure.
#[derive(Debug, thiserror::Error)]
pub enum InitCause {
    /// A bootstrap collaborator failed.
    #[error(transparent)]
    Host(#[from] HostError),
    /// The cluster tool failed.
    #[error(transparent)]
    Tool(#[from] ToolError),
    /// Reading or committing state failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Initialization aborted while working towards `phase`.
#[derive(Debug, thiserror::Error)]
#[error("host initialization failed before reaching {phase}: {source}")]
pub struct InitError {
    /// The phase that could not be reached.
    pub phase: InitPhase,
    /// What went wrong.
    #[source]
    pub source: InitCause,
}

trait AtPhase<T> {
    fn at(self, phase: InitPhase) -> Result<T, InitError>;
}

impl<T, E: Into<InitCause>> AtPhase<T> for Result<T, E> {
    fn at(self, phase: InitPhase) -> Result<T, InitError> {
        self.map_err(|err| InitError {
            phase,
            source: err.into(),
        })
    }
}

/// Drives the one-time bootstrap of the host.
pub struct HostInitializer {
    store: Arc<StateStore>,
    tool: Arc<dyn ClusterTool>,
    detector: Arc<dyn StorageDetector>,
    packages: Arc<dyn PackageInstaller>,
    storage: Arc<dyn StorageConfigurator>,
    base_cluster: String,
}

impl HostInitializer {
    /// Wire the initializer to its collaborators.
    pub fn new(
        store: Arc<StateStore>,
        tool: Arc<dyn ClusterTool>,
        detector: Arc<dyn StorageDetector>,
        packages: Arc<dyn PackageInstaller>,
        storage: Arc<dyn StorageConfigurator>,
        base_cluster: impl Into<String>,
    ) -> Self {
        Self {
            store,
            tool,
            detector,
            packages,
            storage,
            base_cluster: base_cluster.into(),
        }
    }

    /// Run the bootstrap unless the persisted state says it already completed.
    ///
    /// `initialized` flips only with the final write, so a failure at any step
    /// leaves the host uninitialized and the next run repeats every step.
    #[instrument(skip(self), fields(base_cluster = %self.base_cluster))]
    pub async fn run(&self) -> Result<InitOutcome, InitError> {
        let state = self.store.load().at(InitPhase::Fresh)?;
        if state.initialized {
            info!(
                initialized_at = ?state.initialized_at,
                "host already initialized, skipping bootstrap"
            );
            return Ok(InitOutcome::AlreadyInitialized);
        }
        info!("starting host initialization");

        let storage = self.detector.detect().await.at(InitPhase::StorageDetected)?;
        let instance_type = match self.detector.instance_type().await {
            Ok(instance_type) => instance_type,
            Err(err) => {
                warn!(error = %err, "could not determine instance type");
                UNKNOWN_INSTANCE_TYPE.to_owned()
            }
        };
        info!(
            phase = %InitPhase::StorageDetected,
            %instance_type,
            storage_type = %storage.storage_type,
            device = storage.device_or_empty(),
            "storage detected"
        );

        self.packages.install().await.at(InitPhase::PackagesInstalled)?;
        info!(phase = %InitPhase::PackagesInstalled, "packages installed");

        self.storage
            .configure(&storage)
            .await
            .at(InitPhase::StorageConfigured)?;
        info!(phase = %InitPhase::StorageConfigured, "storage configured");

        self.tool
            .ensure_registry()
            .await
            .at(InitPhase::BaseInfraCreated)?;
        self.tool
            .create_cluster(&self.base_cluster, true)
            .await
            .at(InitPhase::BaseInfraCreated)?;
        info!(phase = %InitPhase::BaseInfraCreated, "base infrastructure created");

        self.commit(&instance_type, &storage)
            .at(InitPhase::Initialized)?;
        info!(phase = %InitPhase::Initialized, "host initialization completed");

        Ok(InitOutcome::Initialized {
            instance_type,
            storage,
        })
    }

    fn commit(&self, instance_type: &str, storage: &StorageDescriptor) -> hm_state::Result<()> {
        self.store.set_registry_running(true)?;
        self.store.upsert_cluster(
            &self.base_cluster,
            ClusterStatus::Running,
            ClusterType::Infrastructure,
            false,
        )?;
        self.store.set_base_cluster_ready()?;
        self.store.mark_initialized(
            instance_type,
            storage.storage_type.as_str(),
            storage.device_or_empty(),
        )
    }
}
