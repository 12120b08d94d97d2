//! Prefix Manager Module
//!
//! Provisions a base directory on first use and remembers it afterwards.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{Result, StateError};

// == Prefix Manager ==
/// Lazily creates one directory and hands out its path.
///
/// The check-and-create sequence runs under a lock so concurrent first callers
/// cannot race. Once provisioned, `ensure` never touches the filesystem again.
#[derive(Debug)]
pub struct PrefixManager {
    /// Directory to provision
    path: PathBuf,
    /// Set after the first successful provisioning
    provisioned: Mutex<bool>,
}

impl PrefixManager {
    // == Constructor ==
    /// Creates a manager for `path`. Nothing is created until `ensure`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            provisioned: Mutex::new(false),
        }
    }

    /// The managed directory, whether or not it exists yet.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true once the directory has been provisioned by this manager.
    pub async fn is_provisioned(&self) -> bool {
        *self.provisioned.lock().await
    }

    // == Ensure ==
    /// Creates the directory (and any parents) on first call and returns its
    /// path. Later calls return immediately.
    pub async fn ensure(&self) -> Result<PathBuf> {
        let mut provisioned = self.provisioned.lock().await;
        if *provisioned {
            return Ok(self.path.clone());
        }

        if !self.path.is_absolute() {
            return Err(StateError::Validation(format!(
                "prefix {} is not absolute",
                self.path.display()
            )));
        }

        fs::create_dir_all(&self.path)
            .await
            .map_err(|e| StateError::io(format!("create {}", self.path.display()), e))?;

        let metadata = fs::metadata(&self.path)
            .await
            .map_err(|e| StateError::io(format!("stat {}", self.path.display()), e))?;
        if !metadata.is_dir() {
            return Err(StateError::io(
                format!("prefix {}", self.path.display()),
                std::io::Error::new(std::io::ErrorKind::Other, "not a directory"),
            ));
        }

        info!("Provisioned prefix {}", self.path.display());
        *provisioned = true;
        Ok(self.path.clone())
    }
}
