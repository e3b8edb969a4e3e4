//! ---
//! hm_section: "03-persistence-logging"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Host state persistence and mutation primitives."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::{Result, StateError};

/// Raw byte storage for the serialised host state.
pub trait StateBackend: Send + Sync {
    /// Return the stored record, or `None` when nothing has been written yet.
    fn read(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored record. Readers observe either the old or the new bytes.
    fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Human readable location used in logs and errors.
    fn location(&self) -> PathBuf;
}

/// Filesystem backend writing through a temp file and rename.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Backend persisting to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StateError {
        StateError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateBackend for FileBackend {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.io_error(err)),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|err| self.io_error(err))?;

        let mut tmp = NamedTempFile::new_in(&parent).map_err(|err| self.io_error(err))?;
        tmp.write_all(bytes).map_err(|err| self.io_error(err))?;
        tmp.as_file().sync_all().map_err(|err| self.io_error(err))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644))
                .map_err(|err| self.io_error(err))?;
        }
        tmp.persist(&self.path)
            .map_err(|err| self.io_error(err.error))?;
        Ok(())
    }

    fn location(&self) -> PathBuf {
        self.path.clone()
    }
}

/// In-process backend for tests and fakes.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryBackend {
    /// Empty backend; the first load yields a fresh state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with `bytes`, e.g. to simulate a corrupt record.
    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes.into())),
        }
    }

    /// Copy of the currently stored bytes.
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.bytes.lock().clone()
    }
}

impl StateBackend for MemoryBackend {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.bytes.lock().clone())
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        *self.bytes.lock() = Some(bytes.to_vec());
        Ok(())
    }

    fn location(&self) -> PathBuf {
        PathBuf::from("memory://host-state")
    }
}
