//! Data models for the local state store
//!
//! Defines the value type that is persisted under each key.

pub mod value;

pub use value::{TaggedValue, SCHEMA_JSON, SCHEMA_TEXT};
