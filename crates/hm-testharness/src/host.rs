//! ---
//! hm_section: "11-test-harness"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Doubles for the host bootstrap collaborators."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use hm_host::{HostError, PackageInstaller, StorageConfigurator, StorageDetector};
use hm_state::StorageDescriptor;
use parking_lot::Mutex;

/// Detector returning a fixed descriptor.
#[derive(Debug)]
pub struct FakeStorageDetector {
    descriptor: StorageDescriptor,
    instance_type: Option<String>,
    failure: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl FakeStorageDetector {
    /// Detector reporting `descriptor` and `instance_type` (`None` makes lookup fail).
    pub fn new(descriptor: StorageDescriptor, instance_type: Option<&str>) -> Self {
        Self {
            descriptor,
            instance_type: instance_type.map(str::to_owned),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Network-only storage with an unknown instance type.
    pub fn ebs_only() -> Self {
        Self::new(StorageDescriptor::ebs_only(), None)
    }

    /// Make `detect` fail with `message` until cleared.
    pub fn fail(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    /// Stop failing.
    pub fn heal(&self) {
        *self.failure.lock() = None;
    }

    /// Number of `detect` and `instance_type` calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageDetector for FakeStorageDetector {
    async fn detect(&self) -> hm_host::Result<StorageDescriptor> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().clone() {
            Some(message) => Err(HostError::Other(message)),
            None => Ok(self.descriptor.clone()),
        }
    }

    async fn instance_type(&self) -> hm_host::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.instance_type
            .clone()
            .ok_or_else(|| HostError::Metadata("metadata service unreachable".into()))
    }
}

/// Package installer that only counts.
#[derive(Debug, Default)]
pub struct FakePackageInstaller {
    failure: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl FakePackageInstaller {
    /// Succeeding installer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `install` fail with `message` until cleared.
    pub fn fail(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    /// Stop failing.
    pub fn heal(&self) {
        *self.failure.lock() = None;
    }

    /// Number of `install` calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageInstaller for FakePackageInstaller {
    async fn install(&self) -> hm_host::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().clone() {
            Some(message) => Err(HostError::Other(message)),
            None => Ok(()),
        }
    }
}

/// Storage configurator recording the descriptors it was given.
#[derive(Debug, Default)]
pub struct FakeStorageConfigurator {
    failure: Mutex<Option<String>>,
    seen: Mutex<Vec<StorageDescriptor>>,
}

impl FakeStorageConfigurator {
    /// Succeeding configurator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `configure` fail with `message` until cleared.
    pub fn fail(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    /// Stop failing.
    pub fn heal(&self) {
        *self.failure.lock() = None;
    }

    /// Number of `configure` calls.
    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    /// Descriptors passed to `configure`, in order.
    pub fn seen(&self) -> Vec<StorageDescriptor> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl StorageConfigurator for FakeStorageConfigurator {
    async fn configure(&self, storage: &StorageDescriptor) -> hm_host::Result<()> {
        self.seen.lock().push(storage.clone());
        match self.failure.lock().clone() {
            Some(message) => Err(HostError::Other(message)),
            None => Ok(()),
        }
    }
}
