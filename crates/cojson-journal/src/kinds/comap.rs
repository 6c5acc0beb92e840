//! CoMap: last-writer-wins per key (§4.6).

use super::{sorted, Applied};
use cojson_authorization::GroupEntry;
use cojson_core::time::CausalKey;
use indexmap::IndexMap;
use serde_json::Value;

/// A single op recognized in a CoMap transaction's `changes` array.
#[derive(Debug, Clone)]
enum MapOp {
    Set { key: String, value: Value },
    Del { key: String },
}

fn parse(op: &Value) -> Option<MapOp> {
    match op.get("op").and_then(Value::as_str)? {
        "set" => Some(MapOp::Set {
            key: op.get("key")?.as_str()?.to_string(),
            value: op.get("value")?.clone(),
        }),
        "del" => Some(MapOp::Del {
            key: op.get("key")?.as_str()?.to_string(),
        }),
        _ => None,
    }
}

/// Last-writer-wins materialized view of a CoMap (§4.6 "CoMap"). Order of
/// application is `(causal_key, op_index)`; within that order the most
/// recent `set` or `del` for a key wins.
#[derive(Debug, Default, Clone)]
pub struct CoMapFold {
    entries: IndexMap<String, (Option<Value>, CausalKey)>,
}

impl CoMapFold {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).and_then(|(v, _)| v.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter(|(_, (v, _))| v.is_some()).map(|(k, _)| k.as_str())
    }

    pub fn as_json_object(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (k, (v, _)) in &self.entries {
            if let Some(v) = v {
                map.insert(k.clone(), v.clone());
            }
        }
        Value::Object(map)
    }
}

pub fn fold_comap(applied: Vec<Applied>) -> CoMapFold {
    let mut fold = CoMapFold::default();
    for a in sorted(applied) {
        let Some(op) = parse(&a.op) else { continue };
        match op {
            MapOp::Set { key, value } => {
                fold.entries.insert(key, (Some(value), a.causal_key));
            }
            MapOp::Del { key } => {
                fold.entries.insert(key, (None, a.causal_key));
            }
        }
    }
    fold
}

/// Extract a raw op's `(key, value)`, where `value` is `None` for a `del`
/// (no value to carry, but the key is still reported so callers that need
/// every touched key — e.g. invite self-swap validation — see it).
pub fn extract_key_value(op: &Value) -> Option<(String, Option<Value>)> {
    match parse(op)? {
        MapOp::Set { key, value } => Some((key, Some(value))),
        MapOp::Del { key } => Some((key, None)),
    }
}

/// Reinterpret a CoMap's raw `set` ops as group-permission entries (§4.5): a
/// group's content IS an ordinary CoMap, so its keys/values/causal
/// positions feed directly into `cojson_authorization::fold_group`. `del`
/// ops are ignored since group semantics never delete a grant, they
/// overwrite it with `"revoked"`.
pub fn to_group_entries(applied: &[Applied]) -> Vec<GroupEntry> {
    applied
        .iter()
        .filter_map(|a| match extract_key_value(&a.op)? {
            (key, Some(value)) => Some(GroupEntry {
                key,
                value,
                causal_key: a.causal_key,
            }),
            (_, None) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cojson_core::crypto::Digest;
    use cojson_core::ids::{CoValueId, SessionId, TransactionId};
    use cojson_core::time::MadeAt;

    fn applied(idx: u64, key: &str, op: Value) -> Applied {
        let acc = CoValueId(Digest([idx as u8; 32]));
        let session = SessionId::new(acc, 1);
        let tx = TransactionId::new(session, idx);
        Applied {
            id: tx,
            causal_key: CausalKey::new(MadeAt(idx as i64), session, idx),
            op_index: 0,
            op: serde_json::json!({"op": op.get("op").unwrap(), "key": key, "value": op.get("value")}),
        }
    }

    #[test]
    fn later_set_wins() {
        let a = applied(1, "name", serde_json::json!({"op": "set", "value": "alice"}));
        let b = applied(2, "name", serde_json::json!({"op": "set", "value": "bob"}));
        let fold = fold_comap(vec![a, b]);
        assert_eq!(fold.get("name"), Some(&Value::String("bob".into())));
    }

    #[test]
    fn del_hides_value_but_preserves_lww_slot() {
        let a = applied(1, "name", serde_json::json!({"op": "set", "value": "alice"}));
        let b = applied(2, "name", serde_json::json!({"op": "del", "value": null}));
        let fold = fold_comap(vec![a, b]);
        assert_eq!(fold.get("name"), None);
        assert_eq!(fold.keys().count(), 0);
    }

    #[test]
    fn out_of_order_input_still_resolves_by_causal_key() {
        let a = applied(1, "name", serde_json::json!({"op": "set", "value": "alice"}));
        let b = applied(2, "name", serde_json::json!({"op": "set", "value": "bob"}));
        let fold = fold_comap(vec![b, a]);
        assert_eq!(fold.get("name"), Some(&Value::String("bob".into())));
    }
}
