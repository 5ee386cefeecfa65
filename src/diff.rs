// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Diff engine: classify every polled entity against the committed snapshot.
//!
//! ```text
//!   previous ids ───┐            ┌─── current ids
//!                   ▼            ▼
//!          ┌────────────┬─────────────┬────────────┐
//!          │  deleted   │   overlap   │  created   │
//!          └────────────┴──────┬──────┴────────────┘
//!                              │ signature differs?
//!                       yes ◄──┴──► no
//!                    modified      unchanged (no candidate)
//! ```
//!
//! An empty previous snapshot (cold start) makes every current entity
//! `created`. Deleted candidates carry the last payload the snapshot knew,
//! so consumers still see what was removed.
//!
//! Candidate order is deterministic: created and modified in poll order,
//! then deleted in ascending id order. Order across entities carries no
//! meaning downstream; only the per-entity ordering key does.
//!
//! The diff is snapshot-based. A cart that disappears and comes back with
//! the same content between two polls is invisible here.

use crate::config::SignatureConfig;
use crate::entity::{ContentSignature, EntityId, RawEntity};
use crate::event::ChangeKind;
use crate::snapshot::{Snapshot, SnapshotEntry};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// A classified change, not yet turned into an event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeCandidate {
    pub kind: ChangeKind,
    pub entity_id: EntityId,
    pub payload: Value,
    pub content_signature: ContentSignature,
}

/// Per-cycle classification counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Entities that appeared more than once in the poll (last one kept).
    pub duplicates: usize,
    /// The previous snapshot was empty.
    pub cold_start: bool,
}

impl DiffStats {
    pub fn total_changes(&self) -> usize {
        self.created + self.modified + self.deleted
    }
}

/// Result of one diff: what to publish, and what to commit afterwards.
#[derive(Debug, Clone)]
pub struct DiffOutcome {
    pub candidates: Vec<ChangeCandidate>,
    pub next_snapshot: Snapshot,
    pub stats: DiffStats,
}

/// Compare the current poll against the committed snapshot.
pub fn diff(previous: &Snapshot, current: &[RawEntity], signature: &SignatureConfig) -> DiffOutcome {
    let mut stats = DiffStats {
        cold_start: previous.is_empty(),
        ..DiffStats::default()
    };

    // Index by id; first appearance fixes the position, last one wins.
    let mut order: Vec<&EntityId> = Vec::with_capacity(current.len());
    let mut latest: HashMap<&EntityId, &RawEntity> = HashMap::with_capacity(current.len());
    for entity in current {
        if latest.insert(&entity.id, entity).is_some() {
            stats.duplicates += 1;
            warn!(entity_id = %entity.id, "Duplicate id in poll, keeping last occurrence");
        } else {
            order.push(&entity.id);
        }
    }

    let mut candidates = Vec::new();
    let mut next_snapshot = Snapshot::new();

    for id in order {
        let Some(entity) = latest.get(id) else {
            continue;
        };
        let content_signature = ContentSignature::compute(&entity.payload, signature);

        let kind = match previous.get(id) {
            None => Some(ChangeKind::Created),
            Some(prev) if prev.content_signature != content_signature => Some(ChangeKind::Modified),
            Some(_) => None,
        };

        match kind {
            Some(ChangeKind::Created) => stats.created += 1,
            Some(_) => stats.modified += 1,
            None => stats.unchanged += 1,
        }

        if let Some(kind) = kind {
            candidates.push(ChangeCandidate {
                kind,
                entity_id: id.clone(),
                payload: entity.payload.clone(),
                content_signature: content_signature.clone(),
            });
        }

        next_snapshot.insert(
            id.clone(),
            SnapshotEntry {
                content_signature,
                payload: entity.payload.clone(),
            },
        );
    }

    for (id, entry) in previous.iter() {
        if !latest.contains_key(id) {
            stats.deleted += 1;
            candidates.push(ChangeCandidate {
                kind: ChangeKind::Deleted,
                entity_id: id.clone(),
                payload: entry.payload.clone(),
                content_signature: entry.content_signature.clone(),
            });
        }
    }

    DiffOutcome {
        candidates,
        next_snapshot,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::parse_entities;
    use serde_json::json;

    fn poll(items: Value) -> Vec<RawEntity> {
        parse_entities(items).unwrap()
    }

    fn kinds(outcome: &DiffOutcome) -> Vec<(ChangeKind, &str)> {
        outcome
            .candidates
            .iter()
            .map(|c| (c.kind, c.entity_id.as_str()))
            .collect()
    }

    #[test]
    fn test_cold_start_all_created() {
        let current = poll(json!([
            { "id": 1, "userId": 1, "products": [] },
            { "id": 2, "userId": 2, "products": [] },
            { "id": 3, "userId": 3, "products": [] }
        ]));
        let outcome = diff(&Snapshot::new(), &current, &SignatureConfig::default());

        assert!(outcome.stats.cold_start);
        assert_eq!(outcome.stats.created, 3);
        assert_eq!(outcome.stats.total_changes(), 3);
        assert!(outcome.candidates.iter().all(|c| c.kind == ChangeKind::Created));
        assert_eq!(outcome.next_snapshot.len(), 3);
    }

    #[test]
    fn test_unchanged_is_noop() {
        let config = SignatureConfig::default();
        let current = poll(json!([{ "id": 1, "userId": 1, "products": [{ "productId": 2, "quantity": 1 }] }]));
        let first = diff(&Snapshot::new(), &current, &config);
        let second = diff(&first.next_snapshot, &current, &config);

        assert!(second.candidates.is_empty());
        assert_eq!(second.stats.unchanged, 1);
        assert!(!second.stats.cold_start);
        assert_eq!(second.next_snapshot, first.next_snapshot);
    }

    #[test]
    fn test_modified_and_created() {
        let config = SignatureConfig::default();
        let first = diff(
            &Snapshot::new(),
            &poll(json!([{ "id": 1, "userId": 1, "products": [] }])),
            &config,
        );

        let second = diff(
            &first.next_snapshot,
            &poll(json!([
                { "id": 1, "userId": 1, "products": [{ "productId": 9, "quantity": 1 }] },
                { "id": 2, "userId": 5, "products": [] }
            ])),
            &config,
        );

        assert_eq!(
            kinds(&second),
            vec![(ChangeKind::Modified, "1"), (ChangeKind::Created, "2")]
        );
    }

    #[test]
    fn test_delete_carries_last_payload() {
        let config = SignatureConfig::default();
        let first = diff(
            &Snapshot::new(),
            &poll(json!([
                { "id": 1, "userId": 7, "products": [{ "productId": 3, "quantity": 2 }] },
                { "id": 2, "userId": 8, "products": [] }
            ])),
            &config,
        );

        let second = diff(
            &first.next_snapshot,
            &poll(json!([{ "id": 2, "userId": 8, "products": [] }])),
            &config,
        );

        assert_eq!(kinds(&second), vec![(ChangeKind::Deleted, "1")]);
        let deleted = &second.candidates[0];
        assert_eq!(deleted.payload["userId"], 7);
        assert_eq!(
            &deleted.content_signature,
            &first.next_snapshot.get(&EntityId::new("1")).unwrap().content_signature
        );
        assert!(!second.next_snapshot.contains(&EntityId::new("1")));
    }

    #[test]
    fn test_line_item_reorder_is_unchanged() {
        let config = SignatureConfig::default();
        let first = diff(
            &Snapshot::new(),
            &poll(json!([{ "id": 1, "products": [{ "productId": 1, "quantity": 1 }, { "productId": 2, "quantity": 1 }] }])),
            &config,
        );
        let second = diff(
            &first.next_snapshot,
            &poll(json!([{ "id": 1, "products": [{ "productId": 2, "quantity": 1 }, { "productId": 1, "quantity": 1 }] }])),
            &config,
        );
        assert!(second.candidates.is_empty());
    }

    #[test]
    fn test_duplicate_ids_last_wins() {
        let current = poll(json!([
            { "id": 1, "userId": 1 },
            { "id": 2, "userId": 2 },
            { "id": "1", "userId": 99 }
        ]));
        let outcome = diff(&Snapshot::new(), &current, &SignatureConfig::default());

        assert_eq!(outcome.stats.duplicates, 1);
        assert_eq!(kinds(&outcome), vec![(ChangeKind::Created, "1"), (ChangeKind::Created, "2")]);
        assert_eq!(outcome.candidates[0].payload["userId"], 99);
    }

    #[test]
    fn test_deleted_in_ascending_id_order() {
        let config = SignatureConfig::default();
        let first = diff(
            &Snapshot::new(),
            &poll(json!([{ "id": "c" }, { "id": "a" }, { "id": "b" }, { "id": "z" }])),
            &config,
        );
        let second = diff(&first.next_snapshot, &poll(json!([{ "id": "z" }])), &config);
        assert_eq!(
            kinds(&second),
            vec![
                (ChangeKind::Deleted, "a"),
                (ChangeKind::Deleted, "b"),
                (ChangeKind::Deleted, "c")
            ]
        );
    }

    #[test]
    fn test_empty_poll_deletes_everything() {
        let config = SignatureConfig::default();
        let first = diff(&Snapshot::new(), &poll(json!([{ "id": 1 }, { "id": 2 }])), &config);
        let second = diff(&first.next_snapshot, &[], &config);
        assert_eq!(second.stats.deleted, 2);
        assert!(second.next_snapshot.is_empty());
    }
}
