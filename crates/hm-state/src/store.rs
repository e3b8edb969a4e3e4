//! ---
//! hm_section: "03-persistence-logging"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Host state persistence and mutation primitives."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::backend::{FileBackend, MemoryBackend, StateBackend};
use crate::model::{ClusterInfo, ClusterStatus, ClusterType, HostState};
use crate::{Result, StateError};

type CommitLock = Arc<Mutex<()>>;

// Stores opened on the same file share one lock; entries die with their last store.
static PATH_LOCKS: Lazy<Mutex<HashMap<PathBuf, Weak<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn lock_for_path(path: &Path) -> CommitLock {
    let key = lock_key(path);
    let mut locks = PATH_LOCKS.lock();
    locks.retain(|_, weak| weak.strong_count() > 0);
    if let Some(existing) = locks.get(&key).and_then(Weak::upgrade) {
        return existing;
    }
    let lock = Arc::new(Mutex::new(()));
    locks.insert(key, Arc::downgrade(&lock));
    lock
}

fn lock_key(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    // The file may not exist yet; resolve the parent instead.
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        if let Ok(parent) = parent.canonicalize() {
            return parent.join(name);
        }
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Handle onto the persisted [`HostState`].
///
/// Each mutator performs a full load, applies the change in memory, then saves
/// the whole record. Nothing is cached between calls, so every operation sees
/// what is on disk.
pub struct StateStore {
    backend: Box<dyn StateBackend>,
    commit_lock: CommitLock,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("location", &self.backend.location())
            .finish()
    }
}

impl StateStore {
    /// Open the store backed by the JSON file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            backend: Box::new(FileBackend::new(path)),
            commit_lock: lock_for_path(path),
        }
    }

    /// Store kept entirely in memory.
    pub fn in_memory() -> Self {
        Self::with_backend(MemoryBackend::new())
    }

    /// Store over an arbitrary backend with its own private lock.
    pub fn with_backend(backend: impl StateBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            commit_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Where the record lives.
    pub fn location(&self) -> PathBuf {
        self.backend.location()
    }

    /// Read the current state; a fresh state is returned when none was persisted.
    pub fn load(&self) -> Result<HostState> {
        match self.backend.read()? {
            None => Ok(HostState::default()),
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt {
                path: self.backend.location(),
                source,
            }),
        }
    }

    /// Persist `state` as the whole record.
    pub fn save(&self, state: &HostState) -> Result<()> {
        let _guard = self.commit_lock.lock();
        self.write(state)
    }

    /// Load, apply `mutate`, save. Serialised against every other mutation on the same path.
    pub fn update<T>(&self, mutate: impl FnOnce(&mut HostState) -> T) -> Result<T> {
        let _guard = self.commit_lock.lock();
        let mut state = self.load()?;
        let out = mutate(&mut state);
        self.write(&state)?;
        Ok(out)
    }

    fn write(&self, state: &HostState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state).map_err(StateError::Encode)?;
        self.backend.write(&bytes)?;
        debug!(location = %self.backend.location().display(), clusters = state.clusters.len(), "host state saved");
        Ok(())
    }

    /// Record a completed initialization. Also marks packages as installed.
    pub fn mark_initialized(
        &self,
        instance_type: &str,
        storage_type: &str,
        storage_device: &str,
    ) -> Result<()> {
        self.update(|state| {
            state.initialized = true;
            state.initialized_at = Some(Utc::now());
            state.instance_type = instance_type.to_owned();
            state.storage_type = storage_type.to_owned();
            state.storage_device = storage_device.to_owned();
            state.packages_installed = true;
        })?;
        info!(instance_type, storage_type, storage_device, "host marked initialized");
        Ok(())
    }

    /// Insert or replace the entry for `name`, stamping `created` with now.
    pub fn upsert_cluster(
        &self,
        name: &str,
        status: ClusterStatus,
        cluster_type: ClusterType,
        kubevirt: bool,
    ) -> Result<()> {
        self.update(|state| {
            state.clusters.insert(
                name.to_owned(),
                ClusterInfo {
                    status,
                    created: Some(Utc::now()),
                    cluster_type,
                    kubevirt,
                },
            );
        })
    }

    /// Drop the entry for `name`. Absent names are not an error.
    pub fn remove_cluster(&self, name: &str) -> Result<()> {
        self.update(|state| {
            state.clusters.remove(name);
        })
    }

    /// Set the registry progress flag.
    pub fn set_registry_running(&self, running: bool) -> Result<()> {
        self.update(|state| state.registry_running = running)
    }

    /// Set the base cluster progress flag.
    pub fn set_base_cluster_ready(&self) -> Result<()> {
        self.update(|state| state.base_cluster_ready = true)
    }

    /// End the store's lifecycle. Pending writes are already durable.
    pub fn close(self) {
        debug!(location = %self.backend.location().display(), "state store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_store_loads_zero_state() {
        let store = StateStore::in_memory();
        let state = store.load().unwrap();
        assert_eq!(state, HostState::default());
        assert!(!state.initialized);
        assert!(state.clusters.is_empty());
    }

    #[test]
    fn corrupt_record_is_reported() {
        let store = StateStore::with_backend(MemoryBackend::with_contents("{not json"));
        assert!(matches!(store.load(), Err(StateError::Corrupt { .. })));
        assert!(matches!(
            store.set_registry_running(true),
            Err(StateError::Corrupt { .. })
        ));
    }

    #[test]
    fn mark_initialized_sets_descriptive_fields() {
        let store = StateStore::in_memory();
        store
            .mark_initialized("m5d.xlarge", "instance-store", "/dev/nvme1n1")
            .unwrap();
        let state = store.load().unwrap();
        assert!(state.initialized);
        assert!(state.packages_installed);
        assert!(state.initialized_at.is_some());
        assert_eq!(state.instance_type, "m5d.xlarge");
        assert_eq!(state.storage_device, "/dev/nvme1n1");
    }

    #[test]
    fn upsert_then_remove_cluster() {
        let store = StateStore::in_memory();
        store
            .upsert_cluster("dev1", ClusterStatus::Running, ClusterType::Development, true)
            .unwrap();
        let info = store.load().unwrap().cluster("dev1").cloned().unwrap();
        assert_eq!(info.status, ClusterStatus::Running);
        assert!(info.kubevirt);
        assert!(info.created.is_some());

        store.remove_cluster("dev1").unwrap();
        store.remove_cluster("dev1").unwrap();
        assert!(!store.load().unwrap().has_cluster("dev1"));
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = StateStore::open(&path);
        store.set_base_cluster_ready().unwrap();
        store.close();

        let reopened = StateStore::open(&path);
        assert!(reopened.load().unwrap().base_cluster_ready);
    }

    #[test]
    fn stores_on_same_path_share_a_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let a = StateStore::open(&path);
        let b = StateStore::open(dir.path().join(".").join("state.json"));
        assert!(Arc::ptr_eq(&a.commit_lock, &b.commit_lock));

        let other = StateStore::open(dir.path().join("other.json"));
        assert!(!Arc::ptr_eq(&a.commit_lock, &other.commit_lock));
    }
}
