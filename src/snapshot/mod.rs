// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot store: the last committed state of every known cart.
//!
//! A [`Snapshot`] maps entity id to `{content_signature, payload}`. It is
//! loaded once at startup and replaced wholesale at the end of every
//! successful cycle. Nothing else is persisted between cycles.
//!
//! # Backends
//!
//! | Backend | Commit | Crash behaviour |
//! |---------|--------|-----------------|
//! | [`FileSnapshotStore`] | write temp file, fsync, rename | old or new file, never torn |
//! | [`SqliteSnapshotStore`] | one transaction replacing all rows | old or new rows (WAL) |
//!
//! # Cold start vs corruption
//!
//! A missing or empty store is a cold start and loads as an empty snapshot.
//! A store that exists but cannot be parsed is [`CdcError::CorruptState`] and
//! must stop the process: silently starting over would re-announce every
//! live cart as `created`.
//!
//! A single process owns a store. Two instances pointed at the same path is
//! an unsupported deployment and is not guarded against.

pub mod file;
pub mod sqlite;

pub use file::FileSnapshotStore;
pub use sqlite::SqliteSnapshotStore;

use crate::entity::{ContentSignature, EntityId};
use crate::error::{BoxFuture, CdcError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What the store remembers about one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub content_signature: ContentSignature,
    pub payload: Value,
}

/// Committed state of every known entity, keyed by id.
///
/// Serializes as a plain JSON object: `{"<id>": {"content_signature": ..., "payload": {...}}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: BTreeMap<EntityId, SnapshotEntry>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: &EntityId) -> Option<&SnapshotEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entries.contains_key(id)
    }

    /// Insert or replace an entry. Returns the previous entry, if any.
    pub fn insert(&mut self, id: EntityId, entry: SnapshotEntry) -> Option<SnapshotEntry> {
        self.entries.insert(id, entry)
    }

    /// Iterate entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &SnapshotEntry)> {
        self.entries.iter()
    }

    /// Parse the persisted JSON form. Blank input is a cold start.
    pub fn from_json_slice(bytes: &[u8], location: &str) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }
        serde_json::from_slice(bytes).map_err(|e| CdcError::corrupt(location, e))
    }

    /// Render the persisted JSON form.
    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| CdcError::Internal(format!("snapshot serialization failed: {}", e)))
    }
}

impl FromIterator<(EntityId, SnapshotEntry)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (EntityId, SnapshotEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Durable home of the committed snapshot.
///
/// Only the lifecycle controller calls these. `commit` must be atomic: after
/// a crash, `load` returns either the previous or the new snapshot in full.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Load the last committed snapshot (empty on cold start).
    fn load(&self) -> BoxFuture<'_, Snapshot>;

    /// Replace the committed snapshot.
    fn commit<'a>(&'a self, snapshot: &'a Snapshot) -> BoxFuture<'a, ()>;

    /// Human-readable location for logs and errors.
    fn location(&self) -> &str;

    /// Release resources on shutdown.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
