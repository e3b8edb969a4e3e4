//! ---
//! hm_section: "05-host-bootstrap"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Package installation, kernel tuning, and tool downloads."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use hm_common::HostConfig;
use hm_kind::{CommandRunner, CommandSpec, ProcessRunner};
use tracing::{debug, info, warn};

use crate::{write_atomic, HostError, PackageInstaller, Result};

const INOTIFY_LIMITS: &[&str] = &[
    "fs.inotify.max_user_watches=524288",
    "fs.inotify.max_user_instances=512",
];

/// Map a Rust target architecture to the naming used by kind and kubectl releases.
pub fn release_arch(arch: &str) -> Result<&'static str> {
    match arch {
        "x86_64" => Ok("amd64"),
        "aarch64" => Ok("arm64"),
        other => Err(HostError::UnsupportedArch(other.to_owned())),
    }
}

/// Download location of the pinned kind release.
pub fn kind_url(base: &str, version: &str, arch: &str) -> String {
    format!("{}/{version}/kind-linux-{arch}", base.trim_end_matches('/'))
}

/// Download location of a kubectl release.
pub fn kubectl_url(base: &str, version: &str, arch: &str) -> String {
    format!(
        "{}/{version}/bin/linux/{arch}/kubectl",
        base.trim_end_matches('/')
    )
}

/// Installs packages with `dnf`, tunes inotify limits, and fetches `kind` and
/// `kubectl` into the install directory.
pub struct DnfPackageInstaller<R = ProcessRunner> {
    runner: R,
    client: reqwest::Client,
    packages: Vec<String>,
    kind_version: String,
    kind_download_base: String,
    kubectl_release_base: String,
    install_dir: PathBuf,
    package_timeout: Duration,
    arch: String,
}

impl DnfPackageInstaller<ProcessRunner> {
    /// Installer running real processes.
    pub fn new(config: &HostConfig) -> Result<Self> {
        Self::with_runner(ProcessRunner, config)
    }
}

impl<R: CommandRunner> DnfPackageInstaller<R> {
    /// Installer over a custom runner.
    pub fn with_runner(runner: R, config: &HostConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.download_timeout)
            .build()?;
        Ok(Self {
            runner,
            client,
            packages: config.packages.clone(),
            kind_version: config.kind_version.clone(),
            kind_download_base: config.kind_download_base.clone(),
            kubectl_release_base: config.kubectl_release_base.clone(),
            install_dir: config.install_dir.clone(),
            package_timeout: config.package_timeout,
            arch: std::env::consts::ARCH.to_owned(),
        })
    }

    /// Override the architecture used for downloads.
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    /// Runner used for package and sysctl commands.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    async fn exec(&self, spec: CommandSpec) -> Result<()> {
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(())
    }

    async fn install_packages(&self) -> Result<()> {
        self.exec(CommandSpec::new("dnf", self.package_timeout).args(["update", "-y"]))
            .await?;
        if self.packages.is_empty() {
            return Ok(());
        }
        self.exec(
            CommandSpec::new("dnf", self.package_timeout)
                .args(["install", "-y"])
                .args(self.packages.iter().cloned()),
        )
        .await?;
        info!(packages = ?self.packages, "system packages installed");
        Ok(())
    }

    async fn tune_system(&self) -> Result<()> {
        let user = std::env::var("USER").unwrap_or_else(|_| "root".to_owned());
        let linger = CommandSpec::new("loginctl", self.package_timeout)
            .args(["enable-linger", user.as_str()]);
        match self.runner.run(&linger).await {
            Ok(output) if output.success() => {}
            Ok(output) => debug!(%user, output = %output.combined(), "enable-linger failed, continuing"),
            Err(err) => debug!(%user, error = %err, "enable-linger unavailable, continuing"),
        }

        for setting in INOTIFY_LIMITS {
            self.exec(CommandSpec::new("sysctl", self.package_timeout).arg(*setting))
                .await?;
        }
        Ok(())
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HostError::Download {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn install_binary(&self, url: &str, name: &str) -> Result<()> {
        let payload = self.fetch(url).await?;
        let target = self.install_dir.join(name);
        write_atomic(&target, &payload, 0o755).await?;
        info!(%url, target = %target.display(), bytes = payload.len(), "binary installed");
        Ok(())
    }

    async fn install_tools(&self) -> Result<()> {
        let arch = release_arch(&self.arch)?;

        let url = kind_url(&self.kind_download_base, &self.kind_version, arch);
        self.install_binary(&url, "kind").await?;

        let stable = format!("{}/stable.txt", self.kubectl_release_base.trim_end_matches('/'));
        let version = String::from_utf8_lossy(&self.fetch(&stable).await?)
            .trim()
            .to_owned();
        if version.is_empty() {
            warn!(%stable, "empty kubectl release marker");
            return Err(HostError::Other(format!("empty kubectl release marker at {stable}")));
        }
        let url = kubectl_url(&self.kubectl_release_base, &version, arch);
        self.install_binary(&url, "kubectl").await
    }
}

#[async_trait]
impl<R: CommandRunner> PackageInstaller for DnfPackageInstaller<R> {
    async fn install(&self) -> Result<()> {
        self.install_packages().await?;
        self.tune_system().await?;
        self.install_tools().await
    }
}
