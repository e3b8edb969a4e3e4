//! ---
//! hm_section: "05-host-bootstrap"
//! hm_subsection: "tests"
//! hm_type: "test"
//! hm_scope: "code"
//! hm_description: "Exactly-once bootstrap behaviour of the host initializer."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use hm_host::{HostInitializer, InitCause, InitOutcome, InitPhase};
use hm_state::{
    ClusterStatus, ClusterType, StateBackend, StateError, StateStore, StorageDescriptor,
};
use hm_testharness::{
    Failure, FakeClusterTool, FakePackageInstaller, FakeStorageConfigurator,
    FakeStorageDetector, ToolCall, ToolOp,
};
use tempfile::tempdir;

struct Rig {
    store: Arc<StateStore>,
    tool: Arc<FakeClusterTool>,
    detector: Arc<FakeStorageDetector>,
    packages: Arc<FakePackageInstaller>,
    storage: Arc<FakeStorageConfigurator>,
    initializer: HostInitializer,
}

fn rig_with(store: StateStore, detector: FakeStorageDetector) -> Rig {
    let store = Arc::new(store);
    let tool = Arc::new(FakeClusterTool::new());
    let detector = Arc::new(detector);
    let packages = Arc::new(FakePackageInstaller::new());
    let storage = Arc::new(FakeStorageConfigurator::new());
    let initializer = HostInitializer::new(
        Arc::clone(&store),
        tool.clone(),
        detector.clone(),
        packages.clone(),
        storage.clone(),
        "kind",
    );
    Rig {
        store,
        tool,
        detector,
        packages,
        storage,
        initializer,
    }
}

fn rig() -> Rig {
    rig_with(StateStore::in_memory(), FakeStorageDetector::ebs_only())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fresh_host_is_fully_initialized() {
    let rig = rig_with(
        StateStore::in_memory(),
        FakeStorageDetector::new(
            StorageDescriptor::instance_store("/dev/nvme1n1"),
            Some("m5d.xlarge"),
        ),
    );

    let outcome = rig.initializer.run().await.unwrap();
    assert_eq!(
        outcome,
        InitOutcome::Initialized {
            instance_type: "m5d.xlarge".into(),
            storage: StorageDescriptor::instance_store("/dev/nvme1n1"),
        }
    );

    let state = rig.store.load().unwrap();
    assert!(state.initialized);
    assert!(state.initialized_at.is_some());
    assert!(state.packages_installed);
    assert!(state.registry_running);
    assert!(state.base_cluster_ready);
    assert_eq!(state.instance_type, "m5d.xlarge");
    assert_eq!(state.storage_type, "instance-store");
    assert_eq!(state.storage_device, "/dev/nvme1n1");

    let base = state.cluster("kind").unwrap();
    assert_eq!(base.status, ClusterStatus::Running);
    assert_eq!(base.cluster_type, ClusterType::Infrastructure);
    assert!(!base.kubevirt);

    assert_eq!(
        rig.tool.calls(),
        vec![
            ToolCall::EnsureRegistry,
            ToolCall::CreateCluster {
                name: "kind".into(),
                attach_registry: true
            },
        ]
    );
    assert_eq!(rig.storage.seen(), vec![StorageDescriptor::instance_store("/dev/nvme1n1")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_instance_type_falls_back_to_unknown() {
    let rig = rig();
    rig.initializer.run().await.unwrap();
    let state = rig.store.load().unwrap();
    assert_eq!(state.instance_type, "unknown");
    assert_eq!(state.storage_type, "ebs-only");
    assert_eq!(state.storage_device, "");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_run_makes_no_collaborator_calls() {
    let rig = rig();
    rig.initializer.run().await.unwrap();
    let before = rig.store.load().unwrap();
    rig.tool.reset_calls();
    let detector_calls = rig.detector.calls();

    let outcome = rig.initializer.run().await.unwrap();
    assert_eq!(outcome, InitOutcome::AlreadyInitialized);
    assert!(rig.tool.calls().is_empty());
    assert_eq!(rig.detector.calls(), detector_calls);
    assert_eq!(rig.packages.calls(), 1);
    assert_eq!(rig.storage.calls(), 1);
    assert_eq!(rig.store.load().unwrap(), before);
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Detect,
    Packages,
    Storage,
    Registry,
    BaseCluster,
}

fn break_step(rig: &Rig, step: Step) {
    match step {
        Step::Detect => rig.detector.fail("no /dev"),
        Step::Packages => rig.packages.fail("dnf: mirror unreachable"),
        Step::Storage => rig.storage.fail("mkfs.btrfs failed"),
        Step::Registry => rig
            .tool
            .fail(ToolOp::EnsureRegistry, Failure::Exit("port in use".into())),
        Step::BaseCluster => rig.tool.fail(ToolOp::CreateCluster, Failure::Timeout),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failure_at_each_step_leaves_host_uninitialized() {
    let cases = [
        (Step::Detect, InitPhase::StorageDetected),
        (Step::Packages, InitPhase::PackagesInstalled),
        (Step::Storage, InitPhase::StorageConfigured),
        (Step::Registry, InitPhase::BaseInfraCreated),
        (Step::BaseCluster, InitPhase::BaseInfraCreated),
    ];

    for (step, phase) in cases {
        let rig = rig();
        break_step(&rig, step);

        let err = rig.initializer.run().await.unwrap_err();
        assert_eq!(err.phase, phase, "{step:?}");
        let state = rig.store.load().unwrap();
        assert!(!state.initialized, "initialized after failing {step:?}");
        assert!(state.initialized_at.is_none());
        assert!(!state.base_cluster_ready);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_after_failure_repeats_every_step() {
    let rig = rig();
    rig.tool
        .fail(ToolOp::CreateCluster, Failure::Exit("kind exploded".into()));

    let err = rig.initializer.run().await.unwrap_err();
    assert!(matches!(err.source, InitCause::Tool(_)));
    assert!(!rig.store.load().unwrap().initialized);

    rig.tool.heal_all();
    rig.initializer.run().await.unwrap();

    let state = rig.store.load().unwrap();
    assert!(state.initialized);
    assert_eq!(rig.packages.calls(), 2);
    assert_eq!(rig.storage.calls(), 2);
    assert_eq!(rig.tool.count(ToolOp::EnsureRegistry), 2);
    assert_eq!(rig.tool.count(ToolOp::CreateCluster), 2);
    assert_eq!(state.clusters.len(), 1);
}

/// Backend that reads as empty and refuses every write.
struct ReadOnlyBackend;

impl StateBackend for ReadOnlyBackend {
    fn read(&self) -> hm_state::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn write(&self, _bytes: &[u8]) -> hm_state::Result<()> {
        Err(StateError::Io {
            path: self.location(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    fn location(&self) -> PathBuf {
        PathBuf::from("/readonly/state.json")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commit_failure_is_reported_at_final_phase() {
    let rig = rig_with(
        StateStore::with_backend(ReadOnlyBackend),
        FakeStorageDetector::ebs_only(),
    );
    let err = rig.initializer.run().await.unwrap_err();
    assert_eq!(err.phase, InitPhase::Initialized);
    assert!(matches!(err.source, InitCause::State(_)));
    assert_eq!(rig.tool.count(ToolOp::CreateCluster), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreadable_state_aborts_before_any_step() {
    let dir = tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    std::fs::create_dir(&state_path).unwrap();

    let rig = rig_with(StateStore::open(&state_path), FakeStorageDetector::ebs_only());
    let err = rig.initializer.run().await.unwrap_err();
    assert_eq!(err.phase, InitPhase::Fresh);
    assert!(matches!(err.source, InitCause::State(_)));
    assert_eq!(rig.detector.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn initialized_state_on_disk_skips_bootstrap() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");
    StateStore::open(&path)
        .mark_initialized("m5.large", "ebs-only", "")
        .unwrap();

    let rig = rig_with(StateStore::open(&path), FakeStorageDetector::ebs_only());
    assert_eq!(rig.initializer.run().await.unwrap(), InitOutcome::AlreadyInitialized);
    assert_eq!(rig.detector.calls(), 0);
    assert_eq!(rig.packages.calls(), 0);
}
