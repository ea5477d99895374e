//! Values handling with deep merge and canonical digests

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{CoreError, Result};

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Load values from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse values from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self(value))
    }

    /// Parse values from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self(value))
    }

    /// Deep merge another Values into this one
    ///
    /// Rules:
    /// - Scalars: overlay replaces base
    /// - Objects: recursive merge
    /// - Arrays: overlay replaces base (not appended)
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Merge multiple values in order
    pub fn merge_all(values: Vec<Values>) -> Self {
        let mut result = Values::new();
        for v in values {
            result.merge(&v);
        }
        result
    }

    /// Set a value by dotted path (e.g., "image.tag")
    pub fn set(&mut self, path: &str, value: JsonValue) {
        let parts: Vec<&str> = path.split('.').collect();
        set_nested(&mut self.0, &parts, value);
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let parts: Vec<&str> = path.split('.').collect();
        get_nested(&self.0, &parts)
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Canonical serialization: JSON with object keys sorted at every level.
    ///
    /// Two values trees with equal content always produce identical bytes,
    /// regardless of insertion order.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let canonical = canonicalize(&self.0);
        serde_json::to_vec(&canonical).unwrap_or_default()
    }

    /// SHA-256 digest of the canonical serialization, hex-encoded
    pub fn digest(&self) -> String {
        hex_digest(&self.canonical_bytes())
    }
}

/// SHA-256 over arbitrary bytes, hex-encoded
pub fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Canonicalize an arbitrary JSON value: sort object keys recursively
pub fn canonicalize(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::with_capacity(map.len());
            for k in keys {
                sorted.insert(k.clone(), canonicalize(&map[k]));
            }
            JsonValue::Object(sorted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn set_nested(target: &mut JsonValue, parts: &[&str], value: JsonValue) {
    if parts.is_empty() {
        *target = value;
        return;
    }

    if !target.is_object() {
        *target = JsonValue::Object(serde_json::Map::new());
    }
    let map = target.as_object_mut().expect("just coerced to object");

    if parts.len() == 1 {
        map.insert(parts[0].to_string(), value);
    } else {
        let entry = map
            .entry(parts[0].to_string())
            .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
        set_nested(entry, &parts[1..], value);
    }
}

fn get_nested<'a>(value: &'a JsonValue, parts: &[&str]) -> Option<&'a JsonValue> {
    match parts {
        [] => Some(value),
        [head, rest @ ..] => value.as_object()?.get(*head).and_then(|v| get_nested(v, rest)),
    }
}

/// How a `--set`-style expression should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetValueKind {
    /// Typed: "true"/"false"/"null"/numbers become their JSON types
    Plain,
    /// Always a string, no type coercion
    String,
    /// The right-hand side is a file path; the value is the file contents
    File,
}

/// Parse `key.path=value` expressions into a Values overlay
///
/// Multiple expressions may be comma-separated within one string, matching
/// the usual CLI shorthand (`--set a=1,b=2`).
pub fn parse_set_values(exprs: &[String], kind: SetValueKind) -> Result<Values> {
    let mut values = Values::new();

    for expr in exprs {
        for pair in expr.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }

            let (path, raw) = pair.split_once('=').ok_or_else(|| CoreError::InvalidSetValue {
                expr: pair.to_string(),
                message: "expected key=value".to_string(),
            })?;

            if path.is_empty() {
                return Err(CoreError::InvalidSetValue {
                    expr: pair.to_string(),
                    message: "empty key".to_string(),
                });
            }

            let value = match kind {
                SetValueKind::Plain => coerce_scalar(raw),
                SetValueKind::String => JsonValue::String(raw.to_string()),
                SetValueKind::File => {
                    let content = std::fs::read_to_string(raw)?;
                    JsonValue::String(content)
                }
            };

            values.set(path, value);
        }
    }

    Ok(values)
}

fn coerce_scalar(raw: &str) -> JsonValue {
    match raw {
        "true" => JsonValue::Bool(true),
        "false" => JsonValue::Bool(false),
        "null" => JsonValue::Null,
        _ => {
            if let Ok(n) = raw.parse::<i64>() {
                JsonValue::Number(n.into())
            } else if let Ok(f) = raw.parse::<f64>() {
                serde_json::Number::from_f64(f)
                    .map(JsonValue::Number)
                    .unwrap_or_else(|| JsonValue::String(raw.to_string()))
            } else {
                JsonValue::String(raw.to_string())
            }
        }
    }
}
