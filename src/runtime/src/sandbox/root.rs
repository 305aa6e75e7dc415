//! Ephemeral container root directory.

use std::path::{Path, PathBuf};

use minidock_core::error::{MinidockError, Result};

/// Prefix of ephemeral root directory names.
const ROOT_PREFIX: &str = "minidock-";

/// A uniquely named directory serving as one run's root filesystem.
///
/// The directory is removed recursively when the guard is dropped, on the
/// success path as well as on errors and unwinding. Removal failures are
/// logged and otherwise ignored.
#[derive(Debug)]
pub struct EphemeralRoot {
    path: PathBuf,
}

impl EphemeralRoot {
    /// Create a fresh root under the system temp directory.
    pub fn create() -> Result<Self> {
        Self::create_in(&std::env::temp_dir())
    }

    /// Create a fresh root under `parent`.
    pub fn create_in(parent: &Path) -> Result<Self> {
        let path = parent.join(format!("{}{}", ROOT_PREFIX, uuid::Uuid::new_v4().simple()));
        // create_dir (not create_dir_all) so an existing path is an error
        std::fs::create_dir(&path).map_err(|e| MinidockError::filesystem(&path, e))?;

        tracing::info!(root = %path.display(), "Created ephemeral root");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EphemeralRoot {
    fn drop(&mut self) {
        tracing::info!(root = %self.path.display(), "Removing ephemeral root");
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::warn!(
                root = %self.path.display(),
                error = %e,
                "Failed to remove ephemeral root"
            );
        }
    }
}
