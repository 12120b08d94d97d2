//! Cache Module
//!
//! Disk-backed value store served from memory once warm, with per-key
//! change notifications.

mod prefix;
mod stats;
mod store;
mod watch;


// Re-export public types
pub use prefix::PrefixManager;
pub use stats::StoreStats;
pub use store::ValueStore;
pub use watch::{cancel_pair, CancelToken, Canceller, WatchStream};

pub(crate) use store::WatcherGuard;

use crate::error::{Result, StateError};

// == Public Constants ==
/// Maximum allowed key length in bytes (a key is a file name on disk)
pub const MAX_KEY_LENGTH: usize = 255;

/// Name of the value directory below the base prefix
pub const VALUE_DIR: &str = "value";

// == Key Validation ==
/// Checks that `key` can be used verbatim as a file name inside the value
/// directory.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StateError::Validation("key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(StateError::Validation(format!(
            "key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    if key == "." || key == ".." {
        return Err(StateError::Validation(format!("key {:?} is reserved", key)));
    }
    if key.contains(['/', '\\', '\0']) {
        return Err(StateError::Validation(format!(
            "key {:?} contains a path separator or NUL byte",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_accepts_plain_names() {
        assert!(validate_key("hostname").is_ok());
        assert!(validate_key("retry.count-2_b").is_ok());
        assert!(validate_key(&"k".repeat(MAX_KEY_LENGTH)).is_ok());
    }

    #[test]
    fn test_validate_key_rejects_bad_names() {
        for key in ["", ".", "..", "a/b", "/abs", "a\\b", "nul\0byte"] {
            let result = validate_key(key);
            assert!(
                matches!(result, Err(StateError::Validation(_))),
                "key {:?} should be rejected",
                key
            );
        }
        assert!(validate_key(&"k".repeat(MAX_KEY_LENGTH + 1)).is_err());
    }
}
