//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

use cart_cdc::config::SignatureConfig;
use cart_cdc::event::{event_id, ordering_key};
use cart_cdc::resilience::RetryConfig;
use cart_cdc::{diff, ChangeKind, ContentSignature, EntityId, RawEntity, Snapshot};
use proptest::prelude::*;
use rand::{rngs::StdRng, SeedableRng};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;

fn cart(id: u64, user_id: u64, products: &[(u64, u64)]) -> Value {
    json!({
        "id": id,
        "userId": user_id,
        "date": "2020-03-02T00:00:00.000Z",
        "products": products
            .iter()
            .map(|(p, q)| json!({ "productId": p, "quantity": q }))
            .collect::<Vec<_>>()
    })
}

fn entities(values: &[Value]) -> Vec<RawEntity> {
    values
        .iter()
        .cloned()
        .map(|v| RawEntity::from_value(v).unwrap())
        .collect()
}

/// A collection of carts with unique ids.
fn cart_collection(max: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::btree_map(
        1u64..10_000,
        (1u64..50, prop::collection::vec((1u64..30, 1u64..10), 0..5)),
        0..max,
    )
    .prop_map(|carts| {
        carts
            .into_iter()
            .map(|(id, (user, products))| cart(id, user, &products))
            .collect()
    })
}

fn kind_strategy() -> impl Strategy<Value = ChangeKind> {
    prop_oneof![
        Just(ChangeKind::Created),
        Just(ChangeKind::Modified),
        Just(ChangeKind::Deleted),
    ]
}

// =============================================================================
// Event Identity Properties
// =============================================================================

proptest! {
    /// Same (entity, type, signature) always yields the same event id
    #[test]
    fn event_id_is_deterministic(id in "[a-zA-Z0-9]{1,12}", kind in kind_strategy(), sig in "[0-9a-f]{64}") {
        let entity = EntityId::new(id);
        let signature = ContentSignature::from_hex(sig);
        prop_assert_eq!(event_id(&entity, kind, &signature), event_id(&entity, kind, &signature));
    }

    /// Changing only the event type changes the id
    #[test]
    fn event_id_depends_on_type(id in "[0-9]{1,6}", sig in "[0-9a-f]{64}") {
        let entity = EntityId::new(id);
        let signature = ContentSignature::from_hex(sig);
        let ids: BTreeSet<String> = [ChangeKind::Created, ChangeKind::Modified, ChangeKind::Deleted]
            .into_iter()
            .map(|kind| event_id(&entity, kind, &signature))
            .collect();
        prop_assert_eq!(ids.len(), 3);
    }

    /// Every event for one entity shares the ordering key, whatever the content
    #[test]
    fn ordering_key_depends_only_on_entity(id in "[0-9]{1,6}", kind in kind_strategy(), sig in "[0-9a-f]{64}") {
        let entity = EntityId::new(id.clone());
        let key = ordering_key(&entity);
        prop_assert_eq!(&key, &format!("cart_{}", id));

        let event_id = event_id(&entity, kind, &ContentSignature::from_hex(sig));
        let expected_prefix = format!("{}_", key);
        prop_assert!(event_id.starts_with(&expected_prefix));
    }
}

// =============================================================================
// Signature Properties
// =============================================================================

proptest! {
    /// Product line order does not affect the signature
    #[test]
    fn signature_ignores_product_order(
        products in prop::collection::vec((1u64..30, 1u64..10), 0..8).prop_shuffle(),
        user in 1u64..50,
    ) {
        let config = SignatureConfig::default();
        let mut reversed = products.clone();
        reversed.reverse();

        prop_assert_eq!(
            ContentSignature::compute(&cart(1, user, &products), &config),
            ContentSignature::compute(&cart(1, user, &reversed), &config)
        );
    }

    /// Fields outside the signed set never affect the signature
    #[test]
    fn signature_ignores_unsigned_fields(version in any::<u32>(), user in 1u64..50) {
        let config = SignatureConfig::default();
        let plain = cart(1, user, &[(1, 1)]);
        let mut noisy = plain.clone();
        noisy["__v"] = json!(version);
        noisy["id"] = json!(999);

        prop_assert_eq!(
            ContentSignature::compute(&plain, &config),
            ContentSignature::compute(&noisy, &config)
        );
    }

    /// Changing a signed field changes the signature
    #[test]
    fn signature_detects_quantity_change(quantity in 1u64..100, delta in 1u64..100) {
        let config = SignatureConfig::default();
        prop_assert_ne!(
            ContentSignature::compute(&cart(1, 1, &[(1, quantity)]), &config),
            ContentSignature::compute(&cart(1, 1, &[(1, quantity + delta)]), &config)
        );
    }
}

// =============================================================================
// Diff Properties
// =============================================================================

proptest! {
    /// Cold start: N carts yield exactly N created candidates
    #[test]
    fn cold_start_creates_everything(carts in cart_collection(40)) {
        let outcome = diff(&Snapshot::new(), &entities(&carts), &SignatureConfig::default());

        prop_assert_eq!(outcome.candidates.len(), carts.len());
        prop_assert!(outcome.candidates.iter().all(|c| c.kind == ChangeKind::Created));
        prop_assert_eq!(outcome.next_snapshot.len(), carts.len());
    }

    /// Diffing the same collection against its own snapshot yields nothing
    #[test]
    fn unchanged_collection_is_a_no_op(carts in cart_collection(40)) {
        let config = SignatureConfig::default();
        let first = diff(&Snapshot::new(), &entities(&carts), &config);
        let second = diff(&first.next_snapshot, &entities(&carts), &config);

        prop_assert!(second.candidates.is_empty());
        prop_assert_eq!(second.stats.unchanged, carts.len());
        prop_assert_eq!(second.next_snapshot, first.next_snapshot);
    }

    /// Removing one cart yields exactly one deleted candidate, for that cart
    #[test]
    fn removal_yields_single_delete(carts in cart_collection(30).prop_filter("non-empty", |c| !c.is_empty()), pick in any::<prop::sample::Index>()) {
        let config = SignatureConfig::default();
        let before = diff(&Snapshot::new(), &entities(&carts), &config);

        let removed = pick.index(carts.len());
        let mut remaining = carts.clone();
        let gone = remaining.remove(removed);

        let after = diff(&before.next_snapshot, &entities(&remaining), &config);
        prop_assert_eq!(after.candidates.len(), 1);
        let candidate = &after.candidates[0];
        prop_assert_eq!(candidate.kind, ChangeKind::Deleted);
        prop_assert_eq!(candidate.entity_id.as_str(), gone["id"].to_string());
        prop_assert_eq!(&candidate.payload, &gone);
    }

    /// Candidates never repeat an entity within one cycle
    #[test]
    fn candidates_are_unique_per_entity(old in cart_collection(30), new in cart_collection(30)) {
        let config = SignatureConfig::default();
        let previous = diff(&Snapshot::new(), &entities(&old), &config).next_snapshot;
        let outcome = diff(&previous, &entities(&new), &config);

        let ids: BTreeSet<&str> = outcome.candidates.iter().map(|c| c.entity_id.as_str()).collect();
        prop_assert_eq!(ids.len(), outcome.candidates.len());
        prop_assert_eq!(outcome.stats.total_changes(), outcome.candidates.len());
    }
}

// =============================================================================
// Retry Backoff Properties
// =============================================================================

proptest! {
    /// Backoff never exceeds max_delay, with or without jitter
    #[test]
    fn backoff_is_bounded(attempt in 1usize..64, jitter in 0.0f64..0.5, seed in any::<u64>()) {
        let config = RetryConfig {
            max_attempts: 64,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter,
            attempt_timeout: Duration::from_secs(1),
        };
        let base = config.delay_for_attempt(attempt);
        prop_assert!(base <= config.max_delay);

        let mut rng = StdRng::seed_from_u64(seed);
        let jittered = config.jittered_delay_for_attempt(attempt, &mut rng);
        prop_assert!(jittered <= config.max_delay);
    }

    /// Backoff is non-decreasing until it hits the cap
    #[test]
    fn backoff_is_monotonic(attempt in 1usize..32) {
        let config = RetryConfig::poller();
        prop_assert!(config.delay_for_attempt(attempt) <= config.delay_for_attempt(attempt + 1));
    }
}
