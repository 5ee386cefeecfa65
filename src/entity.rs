// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Polled entities and their content signatures.
//!
//! The source returns carts as loosely-typed JSON objects. We keep the raw
//! payload untouched (it is forwarded to consumers as-is) and only pull out
//! two things:
//!
//! - the [`EntityId`], normalised to a string so `1` and `"1"` key the same cart
//! - the [`ContentSignature`], a SHA-256 over a canonical rendering of the
//!   configured content fields
//!
//! # Canonical form
//!
//! ```text
//! {"userId":1,"products":[{"quantity":2,"productId":5},{"productId":1,"quantity":1}],"date":"..."}
//!                                   │
//!            keep configured fields, sort keys, sort unordered arrays
//!                                   ▼
//! {"date":"...","products":[{"productId":1,"quantity":1},{"productId":5,"quantity":2}],"userId":1}
//!                                   │
//!                                SHA-256
//!                                   ▼
//!                      7f3a…(64 hex chars)
//! ```
//!
//! SHA-256 has no per-process seed, so signatures are stable across restarts
//! and safe to persist in the snapshot.

use crate::config::SignatureConfig;
use crate::error::{CdcError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Normalised entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Normalise a JSON `id` value. Strings and integers are accepted.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self(n.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One entity as returned by the source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntity {
    pub id: EntityId,
    pub payload: Value,
}

impl RawEntity {
    /// Wrap a JSON object, extracting its `id`.
    pub fn from_value(payload: Value) -> Result<Self> {
        if !payload.is_object() {
            return Err(CdcError::SourcePayload(format!(
                "expected an object, got {}",
                json_type(&payload)
            )));
        }
        let id = payload
            .get("id")
            .and_then(EntityId::from_json)
            .ok_or_else(|| {
                CdcError::SourcePayload(format!(
                    "entity has no usable id (got {})",
                    payload.get("id").map_or("nothing", json_type)
                ))
            })?;
        Ok(Self { id, payload })
    }
}

/// Parse a full poll response body into entities, preserving order.
///
/// Anything other than an array of objects with string/integer ids rejects
/// the whole response. A partial parse would look like mass deletion.
pub fn parse_entities(body: Value) -> Result<Vec<RawEntity>> {
    match body {
        Value::Array(items) => items.into_iter().map(RawEntity::from_value).collect(),
        other => Err(CdcError::SourcePayload(format!(
            "expected a JSON array, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Stable hash over an entity's canonicalised content fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentSignature(String);

impl ContentSignature {
    /// Compute the signature of `payload` under `config`.
    pub fn compute(payload: &Value, config: &SignatureConfig) -> Self {
        let canonical = canonical_content(payload, config);
        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex::encode(digest))
    }

    /// Wrap an already-computed signature (e.g. loaded from a snapshot).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render the configured content fields of `payload` as canonical JSON text.
///
/// Fields are emitted in sorted order. Missing fields render as `null`,
/// except unordered arrays which render as `[]`.
pub fn canonical_content(payload: &Value, config: &SignatureConfig) -> String {
    let mut fields: Vec<&str> = config.fields.iter().map(String::as_str).collect();
    fields.sort_unstable();
    fields.dedup();

    let mut out = String::with_capacity(128);
    out.push('{');
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(field, &mut out);
        out.push(':');

        let unordered = config.unordered_arrays.iter().any(|f| f == field);
        match payload.get(*field) {
            Some(Value::Array(items)) if unordered => write_unordered(items, &mut out),
            Some(value) => write_canonical(value, &mut out),
            None if unordered => out.push_str("[]"),
            None => out.push_str("null"),
        }
    }
    out.push('}');
    out
}

fn write_unordered(items: &[Value], out: &mut String) {
    let mut rendered: Vec<String> = items
        .iter()
        .map(|item| {
            let mut s = String::new();
            write_canonical(item, &mut s);
            s
        })
        .collect();
    rendered.sort_unstable();

    out.push('[');
    out.push_str(&rendered.join(","));
    out.push(']');
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push_str(&Value::String(s.to_string()).to_string());
}
