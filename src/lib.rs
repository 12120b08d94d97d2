//! Local State - a disk-backed key-value store served from memory
//!
//! Values persist under a base prefix and are loaded lazily; once a key is
//! warm all reads come from memory. Consumers can watch keys for changes and
//! provision private directories under the same prefix.

pub mod api;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod models;
pub mod vardir;

mod tasks;

pub use api::LocalApi;
pub use cache::{cancel_pair, CancelToken, Canceller, StoreStats, ValueStore, WatchStream};
pub use codec::{Base64Codec, Codec};
pub use config::Config;
pub use error::{Result, StateError};
pub use models::TaggedValue;
pub use vardir::DirProvisioner;
