//! Tagged Value Model
//!
//! The payload stored under each key: a schema tag plus opaque encoded bytes.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Result, StateError};

/// Schema tag for UTF-8 text payloads.
pub const SCHEMA_TEXT: &str = "str";

/// Schema tag for JSON payloads.
pub const SCHEMA_JSON: &str = "json";

// == Tagged Value ==
/// A stored value. The store never interprets `data`; the schema tag tells
/// consumers how to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedValue {
    /// Describes how `data` is encoded
    pub schema: String,
    /// Encoded payload bytes
    pub data: Vec<u8>,
}

impl TaggedValue {
    // == Constructor ==
    /// Creates a value with an arbitrary schema tag.
    pub fn new(schema: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            schema: schema.into(),
            data: data.into(),
        }
    }

    /// Creates a text value.
    pub fn text(s: impl AsRef<str>) -> Self {
        Self::new(SCHEMA_TEXT, s.as_ref().as_bytes())
    }

    /// Serializes `value` as JSON and tags it accordingly.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        let data = serde_json::to_vec(value).map_err(|e| StateError::Encode(e.to_string()))?;
        Ok(Self::new(SCHEMA_JSON, data))
    }

    /// Returns the payload as text if this is a text value holding valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        if self.schema != SCHEMA_TEXT {
            return None;
        }
        std::str::from_utf8(&self.data).ok()
    }

    /// Deserializes a JSON value.
    pub fn to_json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.schema != SCHEMA_JSON {
            return Err(StateError::Decode(format!(
                "expected schema {:?}, found {:?}",
                SCHEMA_JSON, self.schema
            )));
        }
        serde_json::from_slice(&self.data).map_err(|e| StateError::Decode(e.to_string()))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_text_value() {
        let value = TaggedValue::text("hello");
        assert_eq!(value.schema, SCHEMA_TEXT);
        assert_eq!(value.as_text(), Some("hello"));
    }

    #[test]
    fn test_as_text_rejects_other_schemas() {
        let value = TaggedValue::new("bytes", vec![0xff, 0x00]);
        assert_eq!(value.as_text(), None);
    }

    #[test]
    fn test_json_value() {
        let mut map = BTreeMap::new();
        map.insert("attempts".to_string(), 3u32);

        let value = TaggedValue::json(&map).unwrap();
        assert_eq!(value.schema, SCHEMA_JSON);

        let decoded: BTreeMap<String, u32> = value.to_json().unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn test_to_json_wrong_schema() {
        let value = TaggedValue::text("42");
        let result: Result<u32> = value.to_json();
        assert!(matches!(result, Err(StateError::Decode(_))));
    }
}
