//! CoList: an RGA with tombstones (§4.6).
//!
//! Every inserted element keeps the transaction ID (plus its op index) that
//! introduced it as a permanent, stable position identifier; later ops
//! reference that identifier as an anchor. Deleting an element tombstones it
//! rather than removing its slot, so concurrent inserts anchored to it still
//! resolve deterministically.

use super::{sorted, Applied};
use cojson_core::ids::TransactionId;
use cojson_core::time::CausalKey;
use serde_json::Value;
use std::collections::HashMap;

/// A stable position identifier: the transaction that introduced the
/// element, disambiguated by its index within that transaction's `changes`
/// array (needed when one transaction inserts several elements at once).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pos {
    pub tx: TransactionId,
    pub op_index: u32,
}

impl Pos {
    /// The textual anchor form other ops reference this position by.
    pub fn anchor_text(&self) -> String {
        format!("{}/{}", self.tx, self.op_index)
    }
}

/// The two sentinel anchors plus every real position, forming the anchor
/// namespace operations reference (§4.6 "start"/"end"/position id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Anchor {
    Start,
    End,
    At(Pos),
}

fn parse_anchor(s: &str) -> Option<Anchor> {
    match s {
        "start" => Some(Anchor::Start),
        "end" => Some(Anchor::End),
        _ => None, // real position anchors are resolved by the caller via op_index bookkeeping below
    }
}

#[derive(Debug, Clone)]
enum ListOp {
    /// Insert `value` immediately after `after`.
    After { after: Anchor, value: Value },
    /// Insert `value` immediately before `before`.
    Before { before: Anchor, value: Value },
    /// Tombstone the element at `pos`.
    Delete { pos: Anchor },
}

/// Anchors that reference a prior position are written on the wire as that
/// position's `TransactionId` text plus `/opIndex` (e.g. `"<txid>/0"`);
/// `op_positions` maps those strings back to `Pos` for every position seen
/// so far in application order.
fn resolve_anchor(raw: &str, op_positions: &HashMap<String, Pos>) -> Option<Anchor> {
    parse_anchor(raw).or_else(|| op_positions.get(raw).map(|p| Anchor::At(*p)))
}

fn parse(op: &Value, op_positions: &HashMap<String, Pos>) -> Option<ListOp> {
    match op.get("op").and_then(Value::as_str)? {
        "app" => Some(ListOp::After {
            after: resolve_anchor(op.get("after")?.as_str()?, op_positions)?,
            value: op.get("value")?.clone(),
        }),
        "pre" => Some(ListOp::Before {
            before: resolve_anchor(op.get("before")?.as_str()?, op_positions)?,
            value: op.get("value")?.clone(),
        }),
        "del" => Some(ListOp::Delete {
            pos: resolve_anchor(op.get("pos")?.as_str()?, op_positions)?,
        }),
        _ => None,
    }
}

struct Node {
    causal_key: CausalKey,
    value: Value,
    tombstoned: bool,
}

/// The folded RGA: an ordered, append-only tree of nodes rooted at the
/// `start`/`end` sentinels, materialized into a flat visible sequence.
#[derive(Default)]
pub struct CoListFold {
    nodes: HashMap<Pos, Node>,
    after_children: HashMap<Anchor, Vec<(CausalKey, Pos)>>,
    before_children: HashMap<Anchor, Vec<(CausalKey, Pos)>>,
}

impl CoListFold {
    /// The visible (non-tombstoned) positions, in iteration order (§4.6:
    /// newest-first among siblings at the same anchor).
    pub fn positions(&self) -> Vec<Pos> {
        self.render(Anchor::Start)
            .into_iter()
            .chain(self.render(Anchor::End))
            .filter(|pos| self.nodes.get(pos).map(|n| !n.tombstoned).unwrap_or(false))
            .collect()
    }

    /// The visible (non-tombstoned) sequence, in iteration order.
    pub fn values(&self) -> Vec<&Value> {
        self.positions().into_iter().filter_map(|pos| self.nodes.get(&pos)).map(|n| &n.value).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.values().filter(|n| !n.tombstoned).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn render(&self, anchor: Anchor) -> Vec<Pos> {
        let mut out = Vec::new();
        if let Some(children) = self.before_children.get(&anchor) {
            for (_, child) in sorted_desc(children) {
                out.extend(self.render(Anchor::At(child)));
            }
        }
        if let Anchor::At(pos) = anchor {
            out.push(pos);
        }
        if let Some(children) = self.after_children.get(&anchor) {
            for (_, child) in sorted_desc(children) {
                out.extend(self.render(Anchor::At(child)));
            }
        }
        out
    }
}

fn sorted_desc(children: &[(CausalKey, Pos)]) -> Vec<(CausalKey, Pos)> {
    let mut v = children.to_vec();
    v.sort_by(|a, b| b.0.cmp(&a.0));
    v
}

pub fn fold_colist(applied: Vec<Applied>) -> CoListFold {
    let mut fold = CoListFold::default();
    let mut op_positions: HashMap<String, Pos> = HashMap::new();

    for a in sorted(applied) {
        let pos = Pos {
            tx: a.id,
            op_index: a.op_index,
        };
        let Some(op) = parse(&a.op, &op_positions) else { continue };
        match op {
            ListOp::After { after, value } => {
                fold.nodes.insert(
                    pos,
                    Node {
                        causal_key: a.causal_key,
                        value,
                        tombstoned: false,
                    },
                );
                fold.after_children.entry(after).or_default().push((a.causal_key, pos));
            }
            ListOp::Before { before, value } => {
                fold.nodes.insert(
                    pos,
                    Node {
                        causal_key: a.causal_key,
                        value,
                        tombstoned: false,
                    },
                );
                fold.before_children.entry(before).or_default().push((a.causal_key, pos));
            }
            ListOp::Delete { pos: target } => {
                if let Anchor::At(target_pos) = target {
                    if let Some(node) = fold.nodes.get_mut(&target_pos) {
                        node.tombstoned = true;
                    }
                }
            }
        }
        op_positions.insert(pos.anchor_text(), pos);
    }
    fold
}

#[cfg(test)]
mod tests {
    use super::*;
    use cojson_core::crypto::Digest;
    use cojson_core::ids::{CoValueId, SessionId};
    use cojson_core::time::MadeAt;

    fn applied(idx: u64, op: Value) -> Applied {
        let acc = CoValueId(Digest([idx as u8; 32]));
        let session = SessionId::new(acc, 1);
        let tx = TransactionId::new(session, idx);
        Applied {
            id: tx,
            causal_key: CausalKey::new(MadeAt(idx as i64), session, idx),
            op_index: 0,
            op,
        }
    }

    fn pos_text(a: &Applied) -> String {
        format!("{}/{}", a.id, a.op_index)
    }

    #[test]
    fn sequential_appends_produce_order() {
        let a1 = applied(1, serde_json::json!({"op": "app", "after": "start", "value": "a"}));
        let a1_text = pos_text(&a1);
        let a2 = applied(2, serde_json::json!({"op": "app", "after": a1_text, "value": "b"}));
        let fold = fold_colist(vec![a1, a2]);
        assert_eq!(fold.values(), vec![&Value::String("a".into()), &Value::String("b".into())]);
    }

    #[test]
    fn concurrent_appends_at_same_anchor_are_newest_first() {
        let a1 = applied(1, serde_json::json!({"op": "app", "after": "start", "value": "a"}));
        let a2 = applied(2, serde_json::json!({"op": "app", "after": "start", "value": "b"}));
        let fold = fold_colist(vec![a1, a2]);
        // both anchor to start; higher causal key (a2, made_at=2) sorts first.
        assert_eq!(fold.values(), vec![&Value::String("b".into()), &Value::String("a".into())]);
    }

    #[test]
    fn delete_tombstones_but_keeps_slot_for_children() {
        let a1 = applied(1, serde_json::json!({"op": "app", "after": "start", "value": "a"}));
        let a1_text = pos_text(&a1);
        let a2 = applied(2, serde_json::json!({"op": "app", "after": a1_text.clone(), "value": "b"}));
        let a3 = applied(3, serde_json::json!({"op": "del", "pos": a1_text}));
        let fold = fold_colist(vec![a1, a2, a3]);
        assert_eq!(fold.values(), vec![&Value::String("b".into())]);
        assert_eq!(fold.len(), 1);
    }

    #[test]
    fn insert_before_end_appends_at_tail() {
        let a1 = applied(1, serde_json::json!({"op": "pre", "before": "end", "value": "a"}));
        let a2 = applied(2, serde_json::json!({"op": "pre", "before": "end", "value": "b"}));
        let fold = fold_colist(vec![a1, a2]);
        // both anchor to end via "pre"; newest-first among before-siblings.
        assert_eq!(fold.values(), vec![&Value::String("b".into()), &Value::String("a".into())]);
    }
}
