//! ---
//! hm_section: "01-core-functionality"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Shared primitives and utilities for the host manager."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_state_path() -> PathBuf {
    PathBuf::from("/etc/host-manager-state.json")
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("/var/log/host-manager")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9898))
}

fn default_base_cluster() -> String {
    "kind".to_owned()
}

fn default_kind_binary() -> String {
    "kind".to_owned()
}

fn default_runtime_binary() -> String {
    "podman".to_owned()
}

fn default_kubernetes_version() -> String {
    "v1.32.0".to_owned()
}

fn default_host_mount() -> PathBuf {
    PathBuf::from("/root/kind")
}

fn default_ssh_host_port() -> Option<u16> {
    Some(2222)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_create_timeout() -> Duration {
    Duration::from_secs(900)
}

fn default_registry_name() -> String {
    "kind-registry".to_owned()
}

fn default_registry_image() -> String {
    "registry:2".to_owned()
}

fn default_registry_host_port() -> u16 {
    5001
}

fn default_registry_container_port() -> u16 {
    5000
}

fn default_registry_network() -> String {
    "kind".to_owned()
}

fn default_packages() -> Vec<String> {
    [
        "jq", "tmux", "iotop", "htop", "vim", "curl", "wget", "git", "podman", "buildah",
        "skopeo",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

fn default_kind_version() -> String {
    "v0.29.0".to_owned()
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("/usr/local/bin")
}

fn default_metadata_endpoint() -> String {
    "http://169.254.169.254".to_owned()
}

fn default_metadata_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_package_timeout() -> Duration {
    Duration::from_secs(1800)
}

fn default_kind_download_base() -> String {
    "https://kind.sigs.k8s.io/dl".to_string()
}

fn default_kubectl_release_base() -> String {
    "https://dl.k8s.io/release".to_string()
}

fn default_storage_conf() -> PathBuf {
    PathBuf::from("/etc/containers/storage.conf")
}

fn default_nvme_mount() -> PathBuf {
    PathBuf::from("/root")
}

fn default_graphroot() -> PathBuf {
    PathBuf::from("/var/lib/containers/storage")
}

fn default_runroot() -> PathBuf {
    PathBuf::from("/run/containers/storage")
}

fn default_mounts_file() -> PathBuf {
    PathBuf::from("/proc/mounts")
}

fn default_device_dir() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_min_instance_store_gib() -> u64 {
    50
}

/// Primary configuration object for the host manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub host: HostConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "HOST_MANAGER_CONFIG";

    /// Well-known locations inspected when no explicit path is given.
    pub fn default_candidates() -> Vec<PathBuf> {
        vec![
            PathBuf::from("/etc/host-manager/config.toml"),
            PathBuf::from("configs/host-manager.toml"),
        ]
    }

    /// Load configuration, respecting the `HOST_MANAGER_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `HOST_MANAGER_CONFIG` path must exist. Missing candidates are
    /// skipped, and when none exists the defaults are returned: a freshly
    /// provisioned host has no configuration file yet.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!("no configuration file found; using defaults");
        let config = AppConfig::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.state.path.as_os_str().is_empty() {
            return Err(anyhow!("state.path must not be empty"));
        }
        self.cluster.validate()?;
        self.registry.validate()?;
        self.host.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Settings for the `kind` adapter and the reserved base cluster.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Reserved name of the infrastructure cluster.
    #[serde(default = "default_base_cluster")]
    pub base_name: String,
    #[serde(default = "default_kind_binary")]
    pub kind_binary: String,
    #[serde(default = "default_runtime_binary")]
    pub runtime_binary: String,
    #[serde(default = "default_kubernetes_version")]
    pub kubernetes_version: String,
    /// Host directory mounted into cluster nodes at `/local`.
    #[serde(default = "default_host_mount")]
    pub host_mount: PathBuf,
    /// Host port forwarded to node port 32222 on the base cluster only.
    #[serde(default = "default_ssh_host_port")]
    pub ssh_host_port: Option<u16>,
    #[serde(default = "default_command_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub command_timeout: Duration,
    #[serde(default = "default_create_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub create_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            base_name: default_base_cluster(),
            kind_binary: default_kind_binary(),
            runtime_binary: default_runtime_binary(),
            kubernetes_version: default_kubernetes_version(),
            host_mount: default_host_mount(),
            ssh_host_port: default_ssh_host_port(),
            command_timeout: default_command_timeout(),
            create_timeout: default_create_timeout(),
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_name.trim().is_empty() {
            return Err(anyhow!("cluster.base_name must not be empty"));
        }
        if self.kind_binary.trim().is_empty() || self.runtime_binary.trim().is_empty() {
            return Err(anyhow!("cluster binaries must not be empty"));
        }
        if self.command_timeout.is_zero() || self.create_timeout.is_zero() {
            return Err(anyhow!("cluster timeouts must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_name")]
    pub container_name: String,
    #[serde(default = "default_registry_image")]
    pub image: String,
    #[serde(default = "default_registry_host_port")]
    pub host_port: u16,
    #[serde(default = "default_registry_container_port")]
    pub container_port: u16,
    /// Runtime network shared with kind nodes.
    #[serde(default = "default_registry_network")]
    pub network: String,
    /// Probe the registry container for `/registry/status` instead of
    /// returning the configured descriptor.
    #[serde(default)]
    pub live_status: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            container_name: default_registry_name(),
            image: default_registry_image(),
            host_port: default_registry_host_port(),
            container_port: default_registry_container_port(),
            network: default_registry_network(),
            live_status: false,
        }
    }
}

impl RegistryConfig {
    pub fn url(&self) -> String {
        format!("localhost:{}", self.host_port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.container_name.trim().is_empty() {
            return Err(anyhow!("registry.container_name must not be empty"));
        }
        if self.host_port == 0 || self.container_port == 0 {
            return Err(anyhow!("registry ports must be non-zero"));
        }
        Ok(())
    }
}

/// Host bootstrap settings: packages, downloads, and storage paths.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,
    #[serde(default = "default_kind_version")]
    pub kind_version: String,
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,
    #[serde(default = "default_metadata_endpoint")]
    pub metadata_endpoint: String,
    #[serde(default = "default_metadata_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub metadata_timeout: Duration,
    #[serde(default = "default_download_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub download_timeout: Duration,
    /// Bound for each package manager invocation.
    #[serde(default = "default_package_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub package_timeout: Duration,
    #[serde(default = "default_kind_download_base")]
    pub kind_download_base: String,
    #[serde(default = "default_kubectl_release_base")]
    pub kubectl_release_base: String,
    #[serde(default = "default_storage_conf")]
    pub storage_conf: PathBuf,
    #[serde(default = "default_nvme_mount")]
    pub nvme_mount: PathBuf,
    #[serde(default = "default_graphroot")]
    pub default_graphroot: PathBuf,
    #[serde(default = "default_runroot")]
    pub runroot: PathBuf,
    #[serde(default = "default_mounts_file")]
    pub mounts_file: PathBuf,
    #[serde(default = "default_device_dir")]
    pub device_dir: PathBuf,
    #[serde(default = "default_min_instance_store_gib")]
    pub min_instance_store_gib: u64,
    /// Skip best-effort SELinux relabelling of container storage.
    #[serde(default)]
    pub skip_selinux: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            packages: default_packages(),
            kind_version: default_kind_version(),
            install_dir: default_install_dir(),
            metadata_endpoint: default_metadata_endpoint(),
            metadata_timeout: default_metadata_timeout(),
            download_timeout: default_download_timeout(),
            package_timeout: default_package_timeout(),
            kind_download_base: default_kind_download_base(),
            kubectl_release_base: default_kubectl_release_base(),
            storage_conf: default_storage_conf(),
            nvme_mount: default_nvme_mount(),
            default_graphroot: default_graphroot(),
            runroot: default_runroot(),
            mounts_file: default_mounts_file(),
            device_dir: default_device_dir(),
            min_instance_store_gib: default_min_instance_store_gib(),
            skip_selinux: false,
        }
    }
}

impl HostConfig {
    pub fn validate(&self) -> Result<()> {
        if self.metadata_timeout.is_zero()
            || self.download_timeout.is_zero()
            || self.package_timeout.is_zero()
        {
            return Err(anyhow!("host timeouts must be greater than zero"));
        }
        if self.kind_version.trim().is_empty() {
            return Err(anyhow!("host.kind_version must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = "".parse().unwrap();
        assert_eq!(config.state.path, default_state_path());
        assert_eq!(config.cluster.base_name, "kind");
        assert_eq!(config.registry.url(), "localhost:5001");
        assert_eq!(config.cluster.create_timeout, Duration::from_secs(900));
        assert!(config.host.packages.iter().any(|pkg| pkg == "podman"));
    }

    #[test]
    fn sections_override_defaults() {
        let config: AppConfig = r#"
            [state]
            path = "/tmp/hm-state.json"

            [api]
            listen = "127.0.0.1:9090"

            [cluster]
            base_name = "infra"
            command_timeout = 30
            ssh_host_port = 2200

            [registry]
            host_port = 5005
            live_status = true
        "#
        .parse()
        .unwrap();
        assert_eq!(config.state.path, PathBuf::from("/tmp/hm-state.json"));
        assert_eq!(config.api.listen.port(), 9090);
        assert_eq!(config.cluster.base_name, "infra");
        assert_eq!(config.cluster.command_timeout, Duration::from_secs(30));
        assert_eq!(config.cluster.ssh_host_port, Some(2200));
        assert_eq!(config.registry.url(), "localhost:5005");
        assert!(config.registry.live_status);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let result = "[cluster]\ncommand_timeout = 0\n".parse::<AppConfig>();
        assert!(result.is_err());
    }

    #[test]
    fn empty_base_name_is_rejected() {
        let result = "[cluster]\nbase_name = \"  \"\n".parse::<AppConfig>();
        assert!(result.is_err());
    }

    #[test]
    fn missing_candidates_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppConfig::load_with_source(&[dir.path().join("absent.toml")]).unwrap();
        assert!(loaded.source.is_none());
        assert_eq!(loaded.config.api.listen, default_api_listen());
    }

    #[test]
    fn existing_candidate_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host-manager.toml");
        fs::write(&path, "[registry]\ncontainer_name = \"shared-registry\"\n").unwrap();
        let loaded = AppConfig::load_with_source(&[path.clone()]).unwrap();
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.registry.container_name, "shared-registry");
    }

    #[test]
    fn shipped_example_matches_defaults() {
        let example: AppConfig = include_str!("../../../configs/host-manager.example.toml")
            .parse()
            .unwrap();
        let defaults = AppConfig::default();
        assert_eq!(example.api.listen, defaults.api.listen);
        assert_eq!(example.cluster.create_timeout, defaults.cluster.create_timeout);
        assert_eq!(example.cluster.ssh_host_port, defaults.cluster.ssh_host_port);
        assert_eq!(example.registry.url(), defaults.registry.url());
        assert_eq!(example.host.package_timeout, defaults.host.package_timeout);
        assert_eq!(example.logging.format, LogFormat::StructuredJson);
    }
}
