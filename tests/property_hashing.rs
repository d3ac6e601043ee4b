// tests/property_hashing.rs

//! Property-based checks on the addressing model.

use std::collections::BTreeMap;

use proptest::prelude::*;

use hashdag::graph::{
    const_digest, derived_digest, operation_digest, put_const, put_operation, Encoding, Funsie,
    FunsieSpec, OpOptions, Slot,
};
use hashdag::hashing::Digest;
use hashdag_test_utils::{memory_store, test_session};

fn encoding_strategy() -> impl Strategy<Value = Encoding> {
    prop_oneof![Just(Encoding::Blob), Just(Encoding::Json)]
}

proptest! {
    /// Const identity is a pure function of (encoding, bytes), and storing
    /// twice yields the same artifact.
    #[test]
    fn const_artifacts_are_content_addressed(
        bytes in proptest::collection::vec(any::<u8>(), 0..256),
        encoding in encoding_strategy(),
    ) {
        let store = memory_store();
        let a = put_const(store.as_ref(), encoding, &bytes).unwrap();
        let b = put_const(store.as_ref(), encoding, &bytes).unwrap();

        prop_assert_eq!(a.hash, b.hash);
        prop_assert_eq!(a.hash, const_digest(encoding, &bytes));
    }

    /// Different encodings of the same bytes are different artifacts.
    #[test]
    fn encoding_participates_in_const_identity(
        bytes in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        prop_assert_ne!(
            const_digest(Encoding::Blob, &bytes),
            const_digest(Encoding::Json, &bytes)
        );
    }

    /// Operation identity is independent of binding insertion order.
    #[test]
    fn operation_identity_ignores_binding_order(
        names in proptest::collection::btree_set("[a-z]{1,8}", 1..6),
        funsie_bytes in proptest::collection::vec(any::<u8>(), 1..32),
        shuffle_seed in any::<u64>(),
    ) {
        let funsie = Digest::from_bytes({
            let mut arr = [0u8; 20];
            for (i, b) in funsie_bytes.iter().enumerate().take(20) {
                arr[i] = *b;
            }
            arr
        });

        let names: Vec<String> = names.into_iter().collect();
        let forward: BTreeMap<String, Digest> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), const_digest(Encoding::Blob, &[i as u8])))
            .collect();

        // Insert in a different order; BTreeMap canonicalizes it away.
        let mut shuffled_names = names.clone();
        let rot = (shuffle_seed as usize) % shuffled_names.len();
        shuffled_names.rotate_left(rot);
        let shuffled: BTreeMap<String, Digest> = shuffled_names
            .iter()
            .map(|n| (n.clone(), forward[n]))
            .collect();

        prop_assert_eq!(
            operation_digest(&funsie, &forward),
            operation_digest(&funsie, &shuffled)
        );
    }

    /// Output artifact identities derive from (operation, slot) alone.
    #[test]
    fn derived_identity_is_slot_deterministic(
        op_bytes in proptest::collection::vec(any::<u8>(), 20..21),
        slot in "[a-z0-9._-]{1,16}",
    ) {
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&op_bytes);
        let op = Digest::from_bytes(arr);

        prop_assert_eq!(derived_digest(&op, &slot), derived_digest(&op, &slot));
        prop_assert_ne!(derived_digest(&op, &slot), derived_digest(&op, &format!("{slot}x")));
    }

    /// Digest hex round-trips.
    #[test]
    fn digest_hex_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 20..21)) {
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        let digest = Digest::from_bytes(arr);
        prop_assert_eq!(Digest::from_hex(&digest.to_hex()).unwrap(), digest);
    }
}

/// Two independently stored copies of the same operation agree on every
/// identity, including outputs (the whole point of causal hashing).
#[test]
fn duplicate_operations_collapse() {
    let session = test_session();

    let funsie = Funsie {
        spec: FunsieSpec::Callable {
            name: "sum".to_string(),
        },
        inputs: vec![Slot::new("values", Encoding::Json)],
        outputs: vec![Slot::new("sum", Encoding::Json)],
        strict: true,
        extra: None,
    };

    let input = session.put_json(&serde_json::json!([1, 2])).unwrap();
    let mut bindings = BTreeMap::new();
    bindings.insert("values".to_string(), input);

    let store = session.store();
    let op1 = put_operation(store.as_ref(), &funsie, &bindings, &OpOptions::default()).unwrap();
    let op2 = put_operation(store.as_ref(), &funsie, &bindings, &OpOptions::default()).unwrap();

    assert_eq!(op1.hash, op2.hash);
    assert_eq!(op1.outputs, op2.outputs);
    assert_eq!(
        op1.hash,
        operation_digest(
            &funsie.digest(),
            &op1.inputs
        )
    );
    assert_eq!(
        op1.outputs["sum"],
        derived_digest(&op1.hash, "sum")
    );
}
