//! Default codec: JSON envelope wrapped in standard base64.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::codec::Codec;
use crate::error::{Result, StateError};
use crate::models::TaggedValue;

/// Encodes a value as base64 of its JSON form, which keeps the file a
/// single printable line whatever the payload bytes are.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl Codec for Base64Codec {
    fn encode(&self, value: &TaggedValue) -> Result<String> {
        let json = serde_json::to_vec(value).map_err(|e| StateError::Encode(e.to_string()))?;
        Ok(BASE64.encode(json))
    }

    fn decode(&self, text: &str) -> Result<TaggedValue> {
        let bytes = BASE64
            .decode(text.trim())
            .map_err(|e| StateError::Decode(format!("invalid base64: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StateError::Decode(format!("invalid value envelope: {}", e)))
    }
}
