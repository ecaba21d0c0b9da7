//! Payload serializers.
//!
//! The unique queue compares encoded bytes, so a serializer used with it must
//! be deterministic for values meant to deduplicate.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Turns an item into bytes and back.
pub trait Serializer<T>: Send + Sync {
    fn encode(&self, item: &T) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON via serde_json, with object keys written in sorted order so equal
/// values always produce equal bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T> Serializer<T> for JsonSerializer
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, item: &T) -> Result<Vec<u8>> {
        let value = sort_keys(serde_json::to_value(item)?);
        let bytes = serde_json::to_vec(&value)?;
        // serde_json writes non-finite floats as `null`; refuse anything a
        // consumer could not read back.
        serde_json::from_slice::<T>(&bytes).map_err(|e| {
            Error::Serialization(format!("value does not survive a JSON round trip: {e}"))
        })?;
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Pass-through for callers that already hold encoded payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl Serializer<Vec<u8>> for BytesSerializer {
    fn encode(&self, item: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(item.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// UTF-8 text stored as-is. Rejects undecodable rows instead of replacing bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSerializer;

impl Serializer<String> for TextSerializer {
    fn encode(&self, item: &String) -> Result<Vec<u8>> {
        Ok(item.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Serialization(e.to_string()))
    }
}
