//! Caller metadata is stored as base64-wrapped JSON so arbitrary blobs
//! survive the TEXT column without escaping concerns.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

/// Serialise a JSON value to its stored form.
pub fn encode_metadata(value: &Value) -> Result<String> {
    let json = serde_json::to_vec(value).context("Failed to serialise metadata")?;
    Ok(STANDARD.encode(json))
}

/// Decode a stored blob. An absent or empty blob is the empty mapping.
pub fn decode_metadata(encoded: Option<&str>) -> Result<Value> {
    let Some(encoded) = encoded.filter(|e| !e.is_empty()) else {
        return Ok(Value::Object(serde_json::Map::new()));
    };
    let json = STANDARD
        .decode(encoded)
        .context("Metadata blob is not valid base64")?;
    serde_json::from_slice(&json).context("Metadata blob is not valid JSON")
}
