//! Configuration Module
//!
//! Handles loading the store configuration from environment variables.

use std::env;
use std::path::PathBuf;

/// Default capacity of each watcher's outgoing notification stream.
pub const DEFAULT_WATCH_BUFFER: usize = 1;

/// Store configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory under which values and provisioned dirs live
    pub prefix: PathBuf,
    /// Enables debug level logging in the binary
    pub debug: bool,
    /// Capacity of each watcher's outgoing stream
    pub watch_buffer: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `LOCAL_STATE_PREFIX` - Base prefix directory (default: `<tmp>/local-state`)
    /// - `LOCAL_STATE_DEBUG` - `1` or `true` to enable debug logs (default: false)
    /// - `LOCAL_STATE_WATCH_BUFFER` - Watch stream capacity (default: 1, minimum 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            prefix: env::var("LOCAL_STATE_PREFIX")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.prefix),
            debug: env::var("LOCAL_STATE_DEBUG")
                .ok()
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.debug),
            watch_buffer: env::var("LOCAL_STATE_WATCH_BUFFER")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .map(|v| v.max(1))
                .unwrap_or(defaults.watch_buffer),
        }
    }

    /// Returns a copy of this config rooted at a different prefix.
    pub fn with_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: env::temp_dir().join("local-state"),
            debug: false,
            watch_buffer: DEFAULT_WATCH_BUFFER,
        }
    }
}
