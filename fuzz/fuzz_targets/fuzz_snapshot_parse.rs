//! Fuzz target for snapshot file parsing.
//!
//! Arbitrary file contents must load as a snapshot or fail with a
//! CorruptState error, never panic. Whatever loads must survive a
//! serialize/parse cycle unchanged.

#![no_main]

use cart_cdc::{CdcError, Snapshot};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    match Snapshot::from_json_slice(data, "fuzz") {
        Ok(snapshot) => {
            let bytes = snapshot.to_json_vec().expect("serialize");
            let reparsed = Snapshot::from_json_slice(&bytes, "fuzz").expect("reparse");
            assert_eq!(reparsed, snapshot);
        }
        Err(CdcError::CorruptState { .. }) => {}
        Err(other) => panic!("unexpected error kind: {other:?}"),
    }
});
