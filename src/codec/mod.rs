//! Codec Module
//!
//! Converts stored values to and from their on-disk text form.

mod base64_codec;

pub use base64_codec::Base64Codec;

use std::fmt::Debug;

use crate::error::Result;
use crate::models::TaggedValue;

// == Codec Trait ==
/// Strategy for the textual representation of a value on disk.
///
/// `encode` must produce a single line without a trailing newline; the store
/// appends the newline itself. `decode` receives the file contents with
/// surrounding whitespace already trimmed.
pub trait Codec: Send + Sync + Debug {
    fn encode(&self, value: &TaggedValue) -> Result<String>;

    fn decode(&self, text: &str) -> Result<TaggedValue>;
}
