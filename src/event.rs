// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event builder: turn change candidates into self-describing envelopes.
//!
//! # Event Identity
//!
//! ```text
//! event_id = "cart_" + entity_id + "_" + hex(sha256(entity_id ␟ event_type ␟ content_signature))[..16]
//! ```
//!
//! The same entity content under the same change type always yields the
//! same id, in any process, on any run. Consumers deduplicate on it, which
//! turns at-least-once delivery into exactly-once processing.
//!
//! `detected_at`, `run_id`, `source` and `schema_version` are informational
//! and never feed the id.

use crate::diff::ChangeCandidate;
use crate::entity::{ContentSignature, EntityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Envelope format version.
pub const SCHEMA_VERSION: &str = "1.0";

/// Separator between id components (ASCII unit separator).
const ID_SEPARATOR: u8 = 0x1f;

/// Hex characters of the digest kept in the event id.
const ID_DIGEST_LEN: usize = 16;

/// What happened to an entity between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The envelope published to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_id: String,
    pub event_type: ChangeKind,
    pub entity_id: EntityId,
    pub ordering_key: String,
    pub content_signature: ContentSignature,
    pub payload: Value,
    pub detected_at: DateTime<Utc>,
    pub schema_version: String,
    pub source: String,
    pub run_id: String,
}

/// Deterministic event id for `(entity_id, kind, signature)`.
pub fn event_id(entity_id: &EntityId, kind: ChangeKind, signature: &ContentSignature) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_id.as_str().as_bytes());
    hasher.update([ID_SEPARATOR]);
    hasher.update(kind.as_str().as_bytes());
    hasher.update([ID_SEPARATOR]);
    hasher.update(signature.as_str().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("cart_{}_{}", entity_id, &digest[..ID_DIGEST_LEN])
}

const MAX_PLAIN_STEM_LEN: usize = 128;
const STEM_DIGEST_LEN: usize = 32;

/// Bus ordering key: every event for one cart shares it.
pub fn ordering_key(entity_id: &EntityId) -> String {
    format!("cart_{}", entity_id)
}

/// Stamps candidates with identity and provenance.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    source: String,
    run_id: String,
}

impl EventBuilder {
    pub fn new(source: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Build the envelope. Pure; `detected_at` is the cycle's wall-clock time.
    pub fn build(&self, candidate: &ChangeCandidate, detected_at: DateTime<Utc>) -> ChangeEvent {
        ChangeEvent {
            event_id: event_id(&candidate.entity_id, candidate.kind, &candidate.content_signature),
            event_type: candidate.kind,
            entity_id: candidate.entity_id.clone(),
            ordering_key: ordering_key(&candidate.entity_id),
            content_signature: candidate.content_signature.clone(),
            payload: candidate.payload.clone(),
            detected_at,
            schema_version: SCHEMA_VERSION.to_string(),
            source: self.source.clone(),
            run_id: self.run_id.clone(),
        }
    }
}

/// Local file stem for an event id.
///
/// Entity ids are opaque strings and may contain `/`, `..` or other bytes a
/// filesystem treats specially. Ids made only of ASCII alphanumerics, `_`
/// and `-` are used as-is; anything else is replaced by a digest of the id.
/// The stored record always carries the real `event_id`.
pub fn file_stem(event_id: &str) -> String {
    let plain = !event_id.is_empty()
        && event_id.len() <= MAX_PLAIN_STEM_LEN
        && event_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if plain {
        return event_id.to_string();
    }
    let digest = hex::encode(Sha256::digest(event_id.as_bytes()));
    format!("cart_x{}", &digest[..STEM_DIGEST_LEN])
}

/// Short per-process run id.
pub fn new_run_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
