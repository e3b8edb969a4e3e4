//! ---
//! hm_section: "05-host-bootstrap"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Container storage preparation on NVMe or default disks."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use hm_common::{ClusterConfig, HostConfig};
use hm_kind::{CommandRunner, CommandSpec, ProcessRunner};
use hm_state::StorageDescriptor;
use tracing::{debug, info};

use crate::{write_atomic, HostError, Result, StorageConfigurator};

/// Render the containers `storage.conf` document.
pub fn storage_conf(graphroot: &Path, runroot: &Path) -> String {
    format!(
        "[storage]\ndriver = \"overlay\"\ngraphroot = \"{}\"\nrunroot = \"{}\"\n",
        graphroot.display(),
        runroot.display()
    )
}

/// Whether `mounts` (in `/proc/mounts` format) lists `device` mounted at `target`.
pub fn is_mounted(mounts: &str, device: &str, target: &Path) -> bool {
    mounts.lines().any(|line| {
        let mut fields = line.split_whitespace();
        matches!(
            (fields.next(), fields.next()),
            (Some(source), Some(mount_point)) if source == device && Path::new(mount_point) == target
        )
    })
}

/// Filesystem type from `blkid` output, either bare (`-o value`) or as a
/// `TYPE="..."` tag.
pub fn filesystem_type(blkid_output: &str) -> Option<&str> {
    let output = blkid_output.trim();
    let value = match output.find("TYPE=\"") {
        Some(start) => {
            let rest = &output[start + "TYPE=\"".len()..];
            rest.split('"').next().unwrap_or_default()
        }
        None => output.split_whitespace().next().unwrap_or_default(),
    };
    (!value.is_empty()).then_some(value)
}

/// Prepares container storage on the local machine.
pub struct SystemStorageConfigurator<R = ProcessRunner> {
    runner: R,
    storage_conf: PathBuf,
    nvme_mount: PathBuf,
    host_mount: PathBuf,
    default_graphroot: PathBuf,
    runroot: PathBuf,
    mounts_file: PathBuf,
    skip_selinux: bool,
    command_timeout: Duration,
}

impl SystemStorageConfigurator<ProcessRunner> {
    /// Configurator running real processes.
    pub fn new(host: &HostConfig, cluster: &ClusterConfig) -> Self {
        Self::with_runner(ProcessRunner, host, cluster)
    }
}

impl<R: CommandRunner> SystemStorageConfigurator<R> {
    /// Configurator over a custom runner.
    pub fn with_runner(runner: R, host: &HostConfig, cluster: &ClusterConfig) -> Self {
        Self {
            runner,
            storage_conf: host.storage_conf.clone(),
            nvme_mount: host.nvme_mount.clone(),
            host_mount: cluster.host_mount.clone(),
            default_graphroot: host.default_graphroot.clone(),
            runroot: host.runroot.clone(),
            mounts_file: host.mounts_file.clone(),
            skip_selinux: host.skip_selinux,
            command_timeout: cluster.create_timeout,
        }
    }

    /// Runner used for disk and labelling commands.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Graph root used for the given layout.
    pub fn graphroot_for(&self, storage: &StorageDescriptor) -> PathBuf {
        if storage.has_nvme {
            self.nvme_mount.join("containers").join("storage")
        } else {
            self.default_graphroot.clone()
        }
    }

    async fn exec(&self, spec: CommandSpec) -> Result<()> {
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(())
    }

    async fn already_mounted(&self, device: &str) -> Result<bool> {
        match tokio::fs::read_to_string(&self.mounts_file).await {
            Ok(mounts) => Ok(is_mounted(&mounts, device, &self.nvme_mount)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(HostError::io(&self.mounts_file, err)),
        }
    }

    /// Whether `device` needs a fresh filesystem. Only a blank device (blkid
    /// exit 2) is formatted; an existing btrfs is reused and anything else is
    /// refused.
    async fn needs_format(&self, device: &str) -> Result<bool> {
        let spec = CommandSpec::new("blkid", self.command_timeout)
            .args(["-o", "value", "-s", "TYPE", device]);
        let output = self.runner.run(&spec).await?;
        if output.code == Some(2) {
            return Ok(true);
        }
        if !output.success() {
            return Err(HostError::InvalidStorage(format!(
                "unable to read the signature of {device}: {}",
                output.combined()
            )));
        }
        match filesystem_type(&output.stdout) {
            Some("btrfs") => Ok(false),
            Some(other) => Err(HostError::InvalidStorage(format!(
                "{device} already holds a {other} filesystem; refusing to format it"
            ))),
            None => Err(HostError::InvalidStorage(format!(
                "{device} carries an unidentified signature; refusing to format it"
            ))),
        }
    }

    async fn prepare_nvme(&self, device: &str) -> Result<()> {
        if self.already_mounted(device).await? {
            info!(%device, mount = %self.nvme_mount.display(), "instance store already mounted");
            return create_dir(&self.host_mount).await;
        }

        let fresh = self.needs_format(device).await?;
        if fresh {
            self.exec(CommandSpec::new("mkfs.btrfs", self.command_timeout).args(["-f", device]))
                .await?;
        }
        let target = self.nvme_mount.display().to_string();
        self.exec(CommandSpec::new("mount", self.command_timeout).args([device, target.as_str()]))
            .await?;
        info!(%device, mount = %target, formatted = fresh, "instance store mounted");
        create_dir(&self.host_mount).await
    }

    async fn relabel(&self, graphroot: &Path) {
        if self.skip_selinux {
            return;
        }
        let root = graphroot.display().to_string();
        let specs = [
            CommandSpec::new("semanage", self.command_timeout).args([
                "fcontext".to_owned(),
                "-a".to_owned(),
                "-t".to_owned(),
                "container_var_lib_t".to_owned(),
                format!("{root}(/.*)?"),
            ]),
            CommandSpec::new("semanage", self.command_timeout).args([
                "fcontext".to_owned(),
                "-a".to_owned(),
                "-t".to_owned(),
                "container_file_t".to_owned(),
                format!("{root}/overlay-containers(/.*)?"),
            ]),
            CommandSpec::new("restorecon", self.command_timeout).args(["-R", root.as_str()]),
        ];
        for spec in specs {
            match self.runner.run(&spec).await {
                Ok(output) if output.success() => {}
                Ok(output) => {
                    debug!(command = %spec, output = %output.combined(), "selinux labelling skipped")
                }
                Err(err) => debug!(command = %spec, error = %err, "selinux labelling skipped"),
            }
        }
    }
}

async fn create_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|err| HostError::io(path, err))
}

#[async_trait]
impl<R: CommandRunner> StorageConfigurator for SystemStorageConfigurator<R> {
    async fn configure(&self, storage: &StorageDescriptor) -> Result<()> {
        if storage.has_nvme {
            let device = storage.device.as_deref().ok_or_else(|| {
                HostError::InvalidStorage("instance store without a device path".into())
            })?;
            self.prepare_nvme(device).await?;
        }

        let graphroot = self.graphroot_for(storage);
        create_dir(&graphroot).await?;
        write_atomic(
            &self.storage_conf,
            storage_conf(&graphroot, &self.runroot).as_bytes(),
            0o644,
        )
        .await?;
        info!(
            storage_type = %storage.storage_type,
            graphroot = %graphroot.display(),
            conf = %self.storage_conf.display(),
            "container storage configured"
        );

        self.relabel(&graphroot).await;
        Ok(())
    }
}
