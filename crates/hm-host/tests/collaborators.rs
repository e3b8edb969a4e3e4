//! ---
//! hm_section: "05-host-bootstrap"
//! hm_subsection: "tests"
//! hm_type: "test"
//! hm_scope: "code"
//! hm_description: "Production bootstrap collaborators against fake endpoints and commands."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::Path;

use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, put};
use axum::Router;
use hm_common::{ClusterConfig, HostConfig};
use hm_host::{
    DnfPackageInstaller, Ec2StorageDetector, HostError, PackageInstaller, StorageConfigurator,
    StorageDetector, SystemStorageConfigurator,
};
use hm_kind::CommandOutput;
use hm_state::StorageDescriptor;
use hm_testharness::ScriptedRunner;
use tempfile::{tempdir, TempDir};

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn metadata_service() -> Router {
    Router::new()
        .route(
            "/latest/api/token",
            put(|headers: HeaderMap| async move {
                if headers.contains_key("x-aws-ec2-metadata-token-ttl-seconds") {
                    (StatusCode::OK, "session-token")
                } else {
                    (StatusCode::BAD_REQUEST, "")
                }
            }),
        )
        .route(
            "/latest/meta-data/instance-type",
            get(|headers: HeaderMap| async move {
                match headers.get("x-aws-ec2-metadata-token") {
                    Some(token) if token == "session-token" => (StatusCode::OK, "m5d.2xlarge\n"),
                    _ => (StatusCode::UNAUTHORIZED, ""),
                }
            }),
        )
}

fn host_config(dir: &Path) -> HostConfig {
    HostConfig {
        device_dir: dir.join("dev"),
        install_dir: dir.join("bin"),
        storage_conf: dir.join("etc/containers/storage.conf"),
        nvme_mount: dir.join("root"),
        default_graphroot: dir.join("var/lib/containers/storage"),
        runroot: dir.join("run/containers/storage"),
        mounts_file: dir.join("mounts"),
        // Nothing listens on port 1; the lookup fails fast.
        metadata_endpoint: "http://127.0.0.1:1".into(),
        ..HostConfig::default()
    }
}

fn device_dir(names: &[&str]) -> TempDir {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("dev")).unwrap();
    for name in names {
        std::fs::write(dir.path().join("dev").join(name), b"").unwrap();
    }
    dir
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metadata_instance_type_selects_instance_store() {
    let addr = serve(metadata_service()).await;
    let dir = device_dir(&[]);
    let config = HostConfig {
        metadata_endpoint: format!("http://{addr}/"),
        ..host_config(dir.path())
    };
    let detector = Ec2StorageDetector::with_runner(ScriptedRunner::new(), &config).unwrap();

    assert_eq!(detector.instance_type().await.unwrap(), "m5d.2xlarge");
    let expected = dir.path().join("dev/nvme1n1").display().to_string();
    assert_eq!(
        detector.detect().await.unwrap(),
        StorageDescriptor::instance_store(expected)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn device_scan_finds_large_unformatted_nvme() {
    let dir = device_dir(&["nvme0n1", "nvme0n1p1", "nvme1n1", "sda"]);
    let dev = dir.path().join("dev");
    let runner = ScriptedRunner::new()
        .on(
            &format!("blkid {}", dev.join("nvme0n1").display()),
            CommandOutput::ok("TYPE=\"xfs\""),
        )
        .on("blkid", CommandOutput::failed(2, ""))
        .on(
            &format!("blockdev --getsize64 {}", dev.join("nvme1n1").display()),
            CommandOutput::ok("236223201280\n"),
        );
    let detector = Ec2StorageDetector::with_runner(runner, &host_config(dir.path())).unwrap();

    assert!(detector.instance_type().await.is_err());
    assert_eq!(
        detector.detect().await.unwrap(),
        StorageDescriptor::instance_store(dev.join("nvme1n1").display().to_string())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn small_devices_are_not_instance_stores() {
    let dir = device_dir(&["nvme1n1"]);
    let runner = ScriptedRunner::new()
        .on("blkid", CommandOutput::failed(2, ""))
        .on("blockdev", CommandOutput::ok("21474836480"));
    let detector = Ec2StorageDetector::with_runner(runner, &host_config(dir.path())).unwrap();
    assert_eq!(detector.detect().await.unwrap(), StorageDescriptor::ebs_only());
}

fn release_server() -> Router {
    Router::new()
        .route("/dl/v0.29.0/kind-linux-amd64", get(|| async { "kind-binary" }))
        .route("/release/stable.txt", get(|| async { "v1.33.1\n" }))
        .route(
            "/release/v1.33.1/bin/linux/amd64/kubectl",
            get(|| async { "kubectl-binary" }),
        )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn installer_runs_dnf_and_installs_tools() {
    let addr = serve(release_server()).await;
    let dir = tempdir().unwrap();
    let config = HostConfig {
        kind_download_base: format!("http://{addr}/dl"),
        kubectl_release_base: format!("http://{addr}/release"),
        ..host_config(dir.path())
    };
    let installer = DnfPackageInstaller::with_runner(ScriptedRunner::new(), &config)
        .unwrap()
        .with_arch("x86_64");

    installer.install().await.unwrap();

    let kind = dir.path().join("bin/kind");
    assert_eq!(std::fs::read(&kind).unwrap(), b"kind-binary");
    assert_eq!(
        std::fs::read(dir.path().join("bin/kubectl")).unwrap(),
        b"kubectl-binary"
    );
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&kind).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn installer_issues_dnf_and_sysctl_commands() {
    let addr = serve(release_server()).await;
    let dir = tempdir().unwrap();
    let config = HostConfig {
        kind_download_base: format!("http://{addr}/dl"),
        kubectl_release_base: format!("http://{addr}/release"),
        packages: vec!["jq".into(), "podman".into()],
        ..host_config(dir.path())
    };
    let runner = ScriptedRunner::new().on("loginctl", CommandOutput::failed(1, "no session"));
    let installer = DnfPackageInstaller::with_runner(runner, &config)
        .unwrap()
        .with_arch("x86_64");

    installer.install().await.unwrap();

    let calls = installer.runner().calls();
    assert_eq!(calls[0], "dnf update -y");
    assert_eq!(calls[1], "dnf install -y jq podman");
    assert!(calls[2].starts_with("loginctl enable-linger"));
    assert_eq!(
        &calls[3..],
        [
            "sysctl fs.inotify.max_user_watches=524288",
            "sysctl fs.inotify.max_user_instances=512",
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_release_artifact_is_a_download_error() {
    let addr = serve(release_server()).await;
    let dir = tempdir().unwrap();
    let config = HostConfig {
        kind_download_base: format!("http://{addr}/dl"),
        kubectl_release_base: format!("http://{addr}/release"),
        ..host_config(dir.path())
    };
    let installer = DnfPackageInstaller::with_runner(ScriptedRunner::new(), &config)
        .unwrap()
        .with_arch("aarch64");

    let err = installer.install().await.unwrap_err();
    assert!(matches!(err, HostError::Download { status: 404, .. }));
    assert!(!dir.path().join("bin/kind").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_package_install_stops_before_downloads() {
    let dir = tempdir().unwrap();
    let runner = ScriptedRunner::new().on("dnf install", CommandOutput::failed(1, "No match for argument"));
    let installer = DnfPackageInstaller::with_runner(runner, &host_config(dir.path()))
        .unwrap()
        .with_arch("x86_64");

    let err = installer.install().await.unwrap_err();
    assert!(err.to_string().contains("No match for argument"));
    assert!(!dir.path().join("bin/kind").exists());
}

fn configurator(dir: &Path, runner: ScriptedRunner) -> SystemStorageConfigurator<ScriptedRunner> {
    let cluster = ClusterConfig {
        host_mount: dir.join("root/kind"),
        ..ClusterConfig::default()
    };
    SystemStorageConfigurator::with_runner(runner, &host_config(dir), &cluster)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nvme_is_formatted_mounted_and_configured() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("mounts"), "/dev/nvme0n1p1 / xfs rw 0 0\n").unwrap();
    let runner = ScriptedRunner::new().on("blkid", CommandOutput::failed(2, ""));
    let configurator = configurator(dir.path(), runner);

    configurator
        .configure(&StorageDescriptor::instance_store("/dev/nvme1n1"))
        .await
        .unwrap();

    let root = dir.path().join("root");
    let conf = std::fs::read_to_string(dir.path().join("etc/containers/storage.conf")).unwrap();
    assert!(conf.contains("driver = \"overlay\""));
    assert!(conf.contains(&format!(
        "graphroot = \"{}\"",
        root.join("containers/storage").display()
    )));
    assert!(root.join("kind").is_dir());
    assert!(root.join("containers/storage").is_dir());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nvme_setup_commands_and_relabel() {
    let dir = tempdir().unwrap();
    let runner = ScriptedRunner::new()
        .on("blkid", CommandOutput::failed(2, ""))
        .on("semanage", CommandOutput::failed(1, "SELinux disabled"));
    let configurator = configurator(dir.path(), runner);
    configurator
        .configure(&StorageDescriptor::instance_store("/dev/nvme1n1"))
        .await
        .unwrap();

    let root = dir.path().join("root");
    let graphroot = root.join("containers/storage");
    let calls = configurator.runner().calls();
    assert_eq!(calls[0], "blkid -o value -s TYPE /dev/nvme1n1");
    assert_eq!(calls[1], "mkfs.btrfs -f /dev/nvme1n1");
    assert_eq!(calls[2], format!("mount /dev/nvme1n1 {}", root.display()));
    assert_eq!(
        calls[3],
        format!("semanage fcontext -a -t container_var_lib_t {}(/.*)?", graphroot.display())
    );
    assert_eq!(calls[5], format!("restorecon -R {}", graphroot.display()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn foreign_filesystem_is_never_formatted() {
    let dir = tempdir().unwrap();
    let runner = ScriptedRunner::new().on("blkid", CommandOutput::ok("xfs\n"));
    let configurator = configurator(dir.path(), runner);

    let err = configurator
        .configure(&StorageDescriptor::instance_store("/dev/nvme1n1"))
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::InvalidStorage(ref msg) if msg.contains("xfs")), "{err}");
    assert!(!configurator.runner().ran("mkfs.btrfs"));
    assert!(!configurator.runner().ran("mount"));
    assert!(!dir.path().join("etc/containers/storage.conf").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_signature_read_is_never_formatted() {
    let dir = tempdir().unwrap();
    let runner = ScriptedRunner::new().on("blkid", CommandOutput::failed(4, "usage error"));
    let configurator = configurator(dir.path(), runner);

    let err = configurator
        .configure(&StorageDescriptor::instance_store("/dev/nvme1n1"))
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::InvalidStorage(_)), "{err}");
    assert!(!configurator.runner().ran("mkfs.btrfs"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn existing_btrfs_is_mounted_without_formatting() {
    let dir = tempdir().unwrap();
    let runner = ScriptedRunner::new().on("blkid", CommandOutput::ok("btrfs\n"));
    let configurator = configurator(dir.path(), runner);
    configurator
        .configure(&StorageDescriptor::instance_store("/dev/nvme1n1"))
        .await
        .unwrap();

    let root = dir.path().join("root");
    assert!(!configurator.runner().ran("mkfs.btrfs"));
    assert_eq!(
        configurator.runner().call("mount").map(|spec| spec.command_line()),
        Some(format!("mount /dev/nvme1n1 {}", root.display()))
    );
    assert!(root.join("containers/storage").is_dir());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn selinux_relabel_can_be_skipped() {
    let dir = tempdir().unwrap();
    let host = HostConfig {
        skip_selinux: true,
        ..host_config(dir.path())
    };
    let configurator =
        SystemStorageConfigurator::with_runner(ScriptedRunner::new(), &host, &ClusterConfig::default());
    configurator
        .configure(&StorageDescriptor::ebs_only())
        .await
        .unwrap();
    assert!(configurator.runner().calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mounted_device_is_not_reformatted() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");
    std::fs::write(
        dir.path().join("mounts"),
        format!("/dev/nvme1n1 {} btrfs rw 0 0\n", root.display()),
    )
    .unwrap();
    let configurator = configurator(dir.path(), ScriptedRunner::new());
    configurator
        .configure(&StorageDescriptor::instance_store("/dev/nvme1n1"))
        .await
        .unwrap();
    assert!(root.join("containers/storage").is_dir());
    assert!(!configurator.runner().ran("mkfs.btrfs"));
    assert!(!configurator.runner().ran("mount"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ebs_only_uses_default_graphroot() {
    let dir = tempdir().unwrap();
    let configurator = configurator(dir.path(), ScriptedRunner::new());
    configurator
        .configure(&StorageDescriptor::ebs_only())
        .await
        .unwrap();

    let graphroot = dir.path().join("var/lib/containers/storage");
    assert!(graphroot.is_dir());
    let conf = std::fs::read_to_string(dir.path().join("etc/containers/storage.conf")).unwrap();
    assert!(conf.contains(&format!("graphroot = \"{}\"", graphroot.display())));
    assert!(!dir.path().join("root").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn instance_store_without_device_is_rejected() {
    let dir = tempdir().unwrap();
    let descriptor = StorageDescriptor {
        device: None,
        ..StorageDescriptor::instance_store("/dev/nvme1n1")
    };
    let err = configurator(dir.path(), ScriptedRunner::new())
        .configure(&descriptor)
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::InvalidStorage(_)));
}
