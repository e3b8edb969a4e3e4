//! ---
//! hm_section: "04-cluster-tooling"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "kind CLI and container runtime adapter."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use hm_common::{ClusterConfig, RegistryConfig};
use tracing::{debug, info, instrument};

use crate::exec::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
use crate::templates::{registry_hosts_toml, ClusterTemplate};
use crate::{ClusterTool, RegistryState, Result};

const CERTS_DIR: &str = "/etc/containerd/certs.d";

/// [`ClusterTool`] implemented by invoking `kind` and the container runtime.
#[derive(Debug, Clone)]
pub struct KindCli<R = ProcessRunner> {
    runner: R,
    cluster: ClusterConfig,
    registry: RegistryConfig,
}

impl KindCli<ProcessRunner> {
    /// Adapter running real processes.
    pub fn new(cluster: ClusterConfig, registry: RegistryConfig) -> Self {
        Self::with_runner(ProcessRunner, cluster, registry)
    }
}

impl<R: CommandRunner> KindCli<R> {
    /// Adapter over a custom runner.
    pub fn with_runner(runner: R, cluster: ClusterConfig, registry: RegistryConfig) -> Self {
        Self {
            runner,
            cluster,
            registry,
        }
    }

    /// The underlying runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn uses_podman(&self) -> bool {
        Path::new(&self.cluster.runtime_binary)
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name == "podman")
            .unwrap_or(false)
    }

    fn kind(&self, timeout: Duration) -> CommandSpec {
        let spec = CommandSpec::new(&self.cluster.kind_binary, timeout);
        if self.uses_podman() {
            spec.env("KIND_EXPERIMENTAL_PROVIDER", "podman")
        } else {
            spec
        }
    }

    fn runtime(&self) -> CommandSpec {
        CommandSpec::new(&self.cluster.runtime_binary, self.cluster.command_timeout)
    }

    async fn exec(&self, spec: CommandSpec) -> Result<CommandOutput> {
        self.runner.run(&spec).await?.check(&spec)
    }

    fn template_for(&self, name: &str, attach_registry: bool) -> ClusterTemplate {
        let is_base = name == self.cluster.base_name;
        ClusterTemplate {
            kubernetes_version: self.cluster.kubernetes_version.clone(),
            with_registry: attach_registry,
            ssh_host_port: if is_base { self.cluster.ssh_host_port } else { None },
            host_mount: Some(self.cluster.host_mount.clone()),
        }
    }

    async fn nodes(&self, name: &str) -> Result<Vec<String>> {
        let spec = self
            .kind(self.cluster.command_timeout)
            .args(["get", "nodes", "--name", name]);
        Ok(lines(&self.exec(spec).await?.stdout))
    }

    #[instrument(skip(self), fields(registry = %self.registry.container_name))]
    async fn attach_registry(&self, name: &str) -> Result<()> {
        let certs_dir = format!("{CERTS_DIR}/localhost:{}", self.registry.host_port);
        let hosts_toml =
            registry_hosts_toml(&self.registry.container_name, self.registry.container_port);

        for node in self.nodes(name).await? {
            self.exec(
                self.runtime()
                    .args(["exec", node.as_str(), "mkdir", "-p", certs_dir.as_str()]),
            )
            .await?;
            let target = format!("{certs_dir}/hosts.toml");
            self.exec(
                self.runtime()
                    .args(["exec", "-i", node.as_str(), "cp", "/dev/stdin", target.as_str()])
                    .stdin(hosts_toml.clone()),
            )
            .await?;
            debug!(%node, "registry host config written");
        }

        let spec = self.runtime().args([
            "network",
            "connect",
            self.registry.network.as_str(),
            self.registry.container_name.as_str(),
        ]);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            if output.combined().contains("already") {
                debug!(network = %self.registry.network, "registry already connected");
            } else {
                output.check(&spec)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<R: CommandRunner> ClusterTool for KindCli<R> {
    #[instrument(skip(self))]
    async fn create_cluster(&self, name: &str, attach_registry: bool) -> Result<()> {
        if self.list_clusters().await?.iter().any(|existing| existing == name) {
            info!(cluster = %name, "cluster already exists, skipping create");
        } else {
            let config = self.template_for(name, attach_registry).render();
            let spec = self
                .kind(self.cluster.create_timeout)
                .args(["create", "cluster", "--name", name, "--config", "-"])
                .stdin(config);
            self.exec(spec).await?;
            info!(cluster = %name, "cluster created");
        }

        if attach_registry {
            self.attach_registry(name).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_cluster(&self, name: &str) -> Result<()> {
        let spec = self
            .kind(self.cluster.command_timeout)
            .args(["delete", "cluster", "--name", name]);
        self.exec(spec).await?;
        info!(cluster = %name, "cluster deleted");
        Ok(())
    }

    async fn list_clusters(&self) -> Result<Vec<String>> {
        let spec = self
            .kind(self.cluster.command_timeout)
            .args(["get", "clusters"]);
        Ok(lines(&self.exec(spec).await?.stdout))
    }

    async fn get_kubeconfig(&self, name: &str) -> Result<String> {
        let spec = self
            .kind(self.cluster.command_timeout)
            .args(["get", "kubeconfig", "--name", name]);
        Ok(self.exec(spec).await?.stdout)
    }

    #[instrument(skip(self))]
    async fn load_image(&self, name: &str, image: &str) -> Result<()> {
        let spec = self
            .kind(self.cluster.create_timeout)
            .args(["load", "docker-image", image, "--name", name]);
        self.exec(spec).await?;
        info!(cluster = %name, %image, "image loaded");
        Ok(())
    }

    async fn registry_state(&self) -> Result<RegistryState> {
        let spec = self.runtime().args([
            "inspect",
            "-f",
            "{{.State.Running}}",
            self.registry.container_name.as_str(),
        ]);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Ok(RegistryState::Absent);
        }
        Ok(match output.stdout.trim() {
            "true" => RegistryState::Running,
            _ => RegistryState::Stopped,
        })
    }

    #[instrument(skip(self), fields(registry = %self.registry.container_name))]
    async fn ensure_registry(&self) -> Result<()> {
        match self.registry_state().await? {
            RegistryState::Running => {
                debug!("registry already running");
            }
            RegistryState::Stopped => {
                self.exec(
                    self.runtime()
                        .args(["start", self.registry.container_name.as_str()]),
                )
                .await?;
                info!("registry started");
            }
            RegistryState::Absent => {
                let publish = format!(
                    "127.0.0.1:{}:{}",
                    self.registry.host_port, self.registry.container_port
                );
                self.exec(self.runtime().args([
                    "run",
                    "-d",
                    "--restart=always",
                    "-p",
                    publish.as_str(),
                    "--network",
                    "bridge",
                    "--name",
                    self.registry.container_name.as_str(),
                    self.registry.image.as_str(),
                ]))
                .await?;
                info!(image = %self.registry.image, "registry container created");
            }
        }
        Ok(())
    }
}

fn lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}
