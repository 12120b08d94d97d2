//! API Module
//!
//! The handle a host process builds once and injects into every consumer of
//! local state.
//!
//! # Surface
//! - `value()` - get, set and watch keys ([`ValueStore`])
//! - `var_dir()` - provision private directories ([`DirProvisioner`])

use std::path::{Path, PathBuf};

use crate::cache::{CancelToken, StoreStats, ValueStore, WatchStream};
use crate::config::Config;
use crate::error::Result;
use crate::models::TaggedValue;
use crate::vardir::DirProvisioner;

/// Local state shared across the host process.
///
/// Both parts live under one base prefix: values in `<prefix>/value/` and
/// provisioned directories in `<prefix>/vardir/`. Cloning shares state.
#[derive(Debug, Clone)]
pub struct LocalApi {
    /// Base prefix
    prefix: PathBuf,
    /// Key-value store
    value: ValueStore,
    /// Directory provisioner
    var_dir: DirProvisioner,
}

impl LocalApi {
    /// Creates the API rooted at `prefix`. Nothing touches disk until first use.
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        Self {
            value: ValueStore::new(&prefix),
            var_dir: DirProvisioner::new(&prefix),
            prefix,
        }
    }

    /// Creates the API from configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut api = Self::new(&config.prefix);
        api.value = api.value.with_watch_buffer(config.watch_buffer);
        api
    }

    /// Base prefix shared by all parts.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn value(&self) -> &ValueStore {
        &self.value
    }

    pub fn var_dir(&self) -> &DirProvisioner {
        &self.var_dir
    }

    // == Shorthands ==

    pub async fn get(&self, key: &str) -> Result<Option<TaggedValue>> {
        self.value.get(key).await
    }

    pub async fn set(&self, key: &str, value: Option<TaggedValue>) -> Result<()> {
        self.value.set(key, value).await
    }

    pub async fn watch(&self, key: &str, cancel: CancelToken) -> Result<WatchStream> {
        self.value.watch(key, cancel).await
    }

    pub async fn dir(&self, rel: &str) -> Result<PathBuf> {
        self.var_dir.dir(rel).await
    }

    pub async fn stats(&self) -> StoreStats {
        self.value.stats().await
    }
}
