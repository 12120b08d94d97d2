//! Directory Provisioner Module
//!
//! Hands out directories below the store's `vardir/` namespace, creating them
//! on demand.

use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;

use tokio::fs;
use tracing::debug;

use crate::cache::PrefixManager;
use crate::error::{Result, StateError};

/// Name of the provisioned-directory namespace below the base prefix
pub const VAR_DIR: &str = "vardir";

// == Dir Provisioner ==
/// Maps relative directory names to absolute, existing directories.
#[derive(Debug, Clone)]
pub struct DirProvisioner {
    prefix: Arc<PrefixManager>,
}

impl DirProvisioner {
    /// Creates a provisioner rooted at `<base_prefix>/vardir/`.
    pub fn new(base_prefix: impl AsRef<Path>) -> Self {
        Self {
            prefix: Arc::new(PrefixManager::new(base_prefix.as_ref().join(VAR_DIR))),
        }
    }

    /// Root of the namespace.
    pub fn root(&self) -> &Path {
        self.prefix.path()
    }

    /// Returns the absolute directory for `rel`, creating it if needed.
    ///
    /// `rel` must be relative, end with a separator (so it names a directory)
    /// and stay inside the namespace.
    pub async fn dir(&self, rel: &str) -> Result<PathBuf> {
        let rel_path = validate_rel_dir(rel)?;
        let root = self.prefix.ensure().await?;

        let result = root.join(rel_path);
        fs::create_dir_all(&result)
            .await
            .map_err(|e| StateError::io(format!("create {}", result.display()), e))?;

        debug!("Provisioned directory {}", result.display());
        Ok(result)
    }
}

/// Checks a caller-supplied directory name and returns it without the
/// trailing separator or `.` components.
fn validate_rel_dir(rel: &str) -> Result<PathBuf> {
    let path = Path::new(rel);
    if path.has_root() || path.is_absolute() {
        return Err(StateError::Validation(format!(
            "path {:?} must be relative",
            rel
        )));
    }
    if !rel.ends_with('/') && !rel.ends_with(MAIN_SEPARATOR) {
        return Err(StateError::Validation(format!(
            "path {:?} must be a dir (end with a separator)",
            rel
        )));
    }

    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StateError::Validation(format!(
                    "path {:?} escapes the directory namespace",
                    rel
                )));
            }
        }
    }
    Ok(clean)
}
