//! Canonical JSON encoding
//!
//! Content addresses are hashes of this encoding, so it must not depend on
//! map insertion order: object keys are emitted in sorted order at every
//! nesting level, with no insignificant whitespace.

use crate::{crypto, Error, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Record attribute map
pub type Attributes = BTreeMap<String, Value>;

/// `type` tag of a reference attribute
pub const REFERENCE_TYPE: &str = "wrn:reference";

/// Rebuild a value with every object's keys in sorted order
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonical bytes of any JSON value
pub fn to_canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&canonicalize(value))?)
}

/// Canonical bytes of an attribute map
pub fn attributes_to_bytes(attributes: &Attributes) -> Result<Vec<u8>> {
    let object: Map<String, Value> = attributes
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    to_canonical_bytes(&Value::Object(object))
}

/// Parse attribute bytes back into a map
pub fn attributes_from_bytes(bytes: &[u8]) -> Result<Attributes> {
    match serde_json::from_slice(bytes)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(Error::InvalidInput("Attributes must be a JSON object".into())),
    }
}

/// Content hash (hex SHA-256) of a JSON value's canonical encoding
pub fn content_id(value: &Value) -> Result<String> {
    Ok(crypto::content_hash(&to_canonical_bytes(value)?))
}

/// Target id when `value` is a reference attribute
pub fn reference_id(value: &Value) -> Option<&str> {
    let object = value.as_object()?;
    if object.get("type")?.as_str()? != REFERENCE_TYPE {
        return None;
    }
    object.get("id")?.as_str()
}

/// Attribute map codec
///
/// Binary codecs get canonical JSON text so they never need to describe a
/// `Value`; human-readable formats get the plain object.
pub mod attributes_json {
    use super::Attributes;
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize as an object, or as a canonical JSON string for binary codecs
    pub fn serialize<S: Serializer>(attributes: &Attributes, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            return attributes.serialize(serializer);
        }
        let bytes = super::attributes_to_bytes(attributes).map_err(S::Error::custom)?;
        let text = String::from_utf8(bytes).map_err(S::Error::custom)?;
        serializer.serialize_str(&text)
    }

    /// Deserialize from whichever form [`serialize`] produced
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Attributes, D::Error> {
        if deserializer.is_human_readable() {
            return Attributes::deserialize(deserializer);
        }
        let text = String::deserialize(deserializer)?;
        super::attributes_from_bytes(text.as_bytes()).map_err(D::Error::custom)
    }
}
