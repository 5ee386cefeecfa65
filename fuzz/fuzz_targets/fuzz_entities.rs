//! Fuzz target for poll response parsing and content signatures.
//!
//! Arbitrary bytes that happen to be JSON must never panic the parser, and
//! every accepted entity must hash to the same signature twice and diff to
//! a cold-start backfill.

#![no_main]

use cart_cdc::config::SignatureConfig;
use cart_cdc::entity::{parse_entities, ContentSignature};
use cart_cdc::{diff, ChangeKind, Snapshot};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(body) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    // Should never panic
    let Ok(entities) = parse_entities(body) else {
        return;
    };

    let config = SignatureConfig::default();
    for entity in &entities {
        let a = ContentSignature::compute(&entity.payload, &config);
        let b = ContentSignature::compute(&entity.payload.clone(), &config);
        assert_eq!(a, b, "signature not stable for {}", entity.id);
        assert_eq!(a.as_str().len(), 64);
    }

    // Cold start: one created candidate per distinct id
    let outcome = diff(&Snapshot::new(), &entities, &config);
    assert!(outcome.candidates.iter().all(|c| c.kind == ChangeKind::Created));
    assert_eq!(outcome.candidates.len(), outcome.next_snapshot.len());

    // And nothing on the second pass
    let again = diff(&outcome.next_snapshot, &entities, &config);
    assert!(again.candidates.is_empty());
});
