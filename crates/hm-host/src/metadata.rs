//! ---
//! hm_section: "05-host-bootstrap"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "EC2 metadata lookup and NVMe instance-store detection."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use hm_common::HostConfig;
use hm_kind::{CommandRunner, CommandSpec, ProcessRunner};
use hm_state::StorageDescriptor;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{HostError, Result, StorageDetector};

const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECS: &str = "21600";
const GIB: u64 = 1024 * 1024 * 1024;

/// Instance families that ship local NVMe instance store. Bare-metal sizes
/// of these families match too; other `.metal` types only have EBS.
const NVME_FAMILIES: &[&str] = &[
    "c5d", "c5ad", "c6gd", "c6id", "c7gd", "m5d", "m5ad", "m5dn", "m5zn", "m6gd", "m6id",
    "m6idn", "r5d", "r5ad", "r5dn", "r6gd", "r6id", "r6idn", "x2gd", "x2idn", "x2iedn", "z1d",
    "i3", "i3en", "i4i", "d3", "d3en", "hpc6id",
];

/// Whether `instance_type` belongs to a family with NVMe instance store.
pub fn has_instance_store(instance_type: &str) -> bool {
    instance_type
        .split_once('.')
        .is_some_and(|(family, _)| NVME_FAMILIES.contains(&family))
}

/// Storage detector backed by the EC2 instance metadata service (IMDSv2),
/// falling back to scanning block devices when metadata is unavailable.
pub struct Ec2StorageDetector<R = ProcessRunner> {
    client: reqwest::Client,
    endpoint: String,
    runner: R,
    device_dir: PathBuf,
    min_instance_store_gib: u64,
    command_timeout: Duration,
    instance_type: OnceCell<Option<String>>,
}

impl Ec2StorageDetector<ProcessRunner> {
    /// Detector using real processes for the device scan.
    pub fn new(config: &HostConfig) -> Result<Self> {
        Self::with_runner(ProcessRunner, config)
    }
}

impl<R: CommandRunner> Ec2StorageDetector<R> {
    /// Detector using `runner` for `blkid` and `blockdev`.
    pub fn with_runner(runner: R, config: &HostConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.metadata_timeout)
            .connect_timeout(config.metadata_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.metadata_endpoint.trim_end_matches('/').to_owned(),
            runner,
            device_dir: config.device_dir.clone(),
            min_instance_store_gib: config.min_instance_store_gib,
            command_timeout: config.metadata_timeout.max(Duration::from_secs(10)),
            instance_type: OnceCell::new(),
        })
    }

    async fn fetch_instance_type(&self) -> Result<String> {
        let token = self
            .client
            .put(format!("{}/latest/api/token", self.endpoint))
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECS)
            .send()
            .await?;
        if !token.status().is_success() {
            return Err(HostError::Metadata(format!(
                "token request returned status {}",
                token.status().as_u16()
            )));
        }
        let token = token.text().await?.trim().to_owned();

        let response = self
            .client
            .get(format!("{}/latest/meta-data/instance-type", self.endpoint))
            .header(TOKEN_HEADER, token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(HostError::Metadata(format!(
                "instance-type request returned status {}",
                response.status().as_u16()
            )));
        }
        let instance_type = response.text().await?.trim().to_owned();
        if instance_type.is_empty() {
            return Err(HostError::Metadata("empty instance type".into()));
        }
        Ok(instance_type)
    }

    // One metadata round trip per detector, shared by detect and instance_type.
    async fn cached_instance_type(&self) -> Option<String> {
        self.instance_type
            .get_or_init(|| async {
                match self.fetch_instance_type().await {
                    Ok(instance_type) => Some(instance_type),
                    Err(err) => {
                        debug!(error = %err, endpoint = %self.endpoint, "instance metadata unavailable");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Scan the device directory for an unformatted NVMe namespace large enough
    /// to be an instance store.
    pub async fn scan_devices(&self) -> Result<StorageDescriptor> {
        let mut entries = tokio::fs::read_dir(&self.device_dir)
            .await
            .map_err(|err| HostError::io(&self.device_dir, err))?;
        let mut candidates = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| HostError::io(&self.device_dir, err))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("nvme") && name.ends_with("n1") {
                candidates.push(entry.path());
            }
        }
        candidates.sort();

        for device in candidates {
            let device = device.display().to_string();
            if self.is_instance_store(&device).await {
                info!(%device, "instance store found by device scan");
                return Ok(StorageDescriptor::instance_store(device));
            }
        }
        Ok(StorageDescriptor::ebs_only())
    }

    async fn is_instance_store(&self, device: &str) -> bool {
        // A filesystem signature means a network volume that is already in use.
        let blkid = CommandSpec::new("blkid", self.command_timeout).arg(device);
        if matches!(self.runner.run(&blkid).await, Ok(output) if output.success()) {
            return false;
        }

        let size = CommandSpec::new("blockdev", self.command_timeout).args(["--getsize64", device]);
        let bytes = match self.runner.run(&size).await {
            Ok(output) if output.success() => output.stdout.trim().parse::<u64>().ok(),
            Ok(_) => None,
            Err(err) => {
                debug!(%device, error = %err, "unable to size device");
                None
            }
        };
        bytes.map(|bytes| bytes / GIB > self.min_instance_store_gib).unwrap_or(false)
    }

    fn descriptor_for(&self, instance_type: &str) -> StorageDescriptor {
        if has_instance_store(instance_type) {
            StorageDescriptor::instance_store(self.device_dir.join("nvme1n1").display().to_string())
        } else {
            StorageDescriptor::ebs_only()
        }
    }
}

#[async_trait]
impl<R: CommandRunner> StorageDetector for Ec2StorageDetector<R> {
    async fn detect(&self) -> Result<StorageDescriptor> {
        match self.cached_instance_type().await {
            Some(instance_type) => Ok(self.descriptor_for(&instance_type)),
            None => self.scan_devices().await,
        }
    }

    async fn instance_type(&self) -> Result<String> {
        self.cached_instance_type()
            .await
            .ok_or_else(|| HostError::Metadata(format!("no response from {}", self.endpoint)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nvme_families_are_recognised() {
        assert!(has_instance_store("m5d.xlarge"));
        assert!(has_instance_store("i4i.2xlarge"));
        assert!(has_instance_store("z1d.large"));
        assert!(has_instance_store("i3.metal"));
        assert!(has_instance_store("m5d.metal"));
        assert!(!has_instance_store("m5.xlarge"));
        assert!(!has_instance_store("c6i.large"));
        assert!(!has_instance_store("m5dn"));
    }

    #[test]
    fn ebs_only_families_are_not_instance_stores() {
        for instance_type in ["t3.medium", "t4g.large", "a1.xlarge", "m5.metal", "c5.metal", "c6i.metal"] {
            assert!(!has_instance_store(instance_type), "{instance_type}");
        }
    }
}
