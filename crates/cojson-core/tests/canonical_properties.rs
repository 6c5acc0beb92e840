//! Property test for canonical encoding's round-trip invariant (§8 Invariant
//! 6): encode, decode back to `serde_json::Value`, re-encode, and the bytes
//! must match — for any JSON value built from the finite, serde_json
//! representable subset canonical encoding promises to handle.

use cojson_core::canonical::encode;
use proptest::collection::{btree_map, vec as prop_vec};
use proptest::prelude::*;
use serde_json::Value;

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop_vec(inner.clone(), 0..8).prop_map(Value::Array),
            btree_map(".{0,8}", inner, 0..8).prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    /// Encoding is deterministic and round-trips through serde_json: the
    /// bytes produced before and after a decode/re-encode cycle are always
    /// identical.
    #[test]
    fn encode_decode_encode_is_byte_identical(value in arb_json()) {
        let encoded = encode(&value).unwrap();
        let decoded: Value = serde_json::from_slice(&encoded).unwrap();
        let re_encoded = encode(&decoded).unwrap();
        prop_assert_eq!(encoded, re_encoded);
    }

    /// Key order in the source value never affects the encoded bytes: two
    /// objects built from the same unique-keyed entries in different
    /// insertion orders encode identically.
    #[test]
    fn object_key_order_does_not_affect_encoding(entries in btree_map(".{1,8}", any::<i64>(), 1..8)) {
        let entries: Vec<(String, i64)> = entries.into_iter().collect();
        let mut forward = serde_json::Map::new();
        for (k, v) in &entries {
            forward.insert(k.clone(), Value::Number((*v).into()));
        }
        let mut reversed = serde_json::Map::new();
        for (k, v) in entries.iter().rev() {
            reversed.insert(k.clone(), Value::Number((*v).into()));
        }
        prop_assert_eq!(
            encode(&Value::Object(forward)).unwrap(),
            encode(&Value::Object(reversed)).unwrap(),
        );
    }
}
