//! CoPlainText: a CoList of single characters (§4.6).
//!
//! A run of characters inserted together is carried on the wire as one
//! compressed `{op:"ins", after|before, text}` record rather than one
//! `app`/`pre` op per character; this module expands that record into the
//! per-character chain `cojson_journal::kinds::colist` already knows how to
//! fold, then materializes the visible sequence back into a `String`.

use super::colist::{fold_colist, CoListFold, Pos};
use super::Applied;
use cojson_core::ids::TransactionId;

/// Expand one applied `ins` record into the equivalent chain of
/// single-character `app`/`pre` records, each keeping the same causal key
/// (all characters in a run are causally simultaneous) but a distinct
/// synthetic `op_index` so each gets its own stable [`Pos`].
///
/// `after` runs chain forward (char 0 anchors to `after`, char 1 to char
/// 0, ...). `before` runs are emitted in reverse textual order so that the
/// last character anchors directly to `before` and earlier characters chain
/// backward from it — processing order (ascending synthetic `op_index`)
/// then resolves each anchor before it is needed.
fn expand(a: &Applied) -> Vec<Applied> {
    let op = &a.op;
    let Some(tag) = op.get("op").and_then(serde_json::Value::as_str) else {
        return vec![a.clone()];
    };
    if tag != "ins" {
        return vec![a.clone()];
    }
    let Some(text) = op.get("text").and_then(serde_json::Value::as_str) else {
        return vec![];
    };
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![];
    }

    // Reserve a wide synthetic op_index band per source op so multiple
    // `ins` records in the same transaction never collide.
    let base = a.op_index.saturating_mul(10_000);

    if let Some(after) = op.get("after").and_then(serde_json::Value::as_str) {
        let mut out = Vec::with_capacity(chars.len());
        let mut anchor = after.to_string();
        for (i, ch) in chars.iter().enumerate() {
            let op_index = base + i as u32;
            out.push(Applied {
                id: a.id,
                causal_key: a.causal_key,
                op_index,
                op: serde_json::json!({"op": "app", "after": anchor, "value": ch.to_string()}),
            });
            anchor = (Pos { tx: a.id, op_index }).anchor_text();
        }
        return out;
    }

    if let Some(before) = op.get("before").and_then(serde_json::Value::as_str) {
        let mut out = Vec::with_capacity(chars.len());
        let mut anchor = before.to_string();
        for (i, ch) in chars.iter().enumerate().rev() {
            let op_index = base + (chars.len() - 1 - i) as u32;
            out.push(Applied {
                id: a.id,
                causal_key: a.causal_key,
                op_index,
                op: serde_json::json!({"op": "pre", "before": anchor, "value": ch.to_string()}),
            });
            anchor = (Pos { tx: a.id, op_index }).anchor_text();
        }
        return out;
    }

    vec![]
}

pub struct CoPlainTextFold {
    inner: CoListFold,
}

impl CoPlainTextFold {
    pub fn text(&self) -> String {
        self.inner.values().into_iter().filter_map(|v| v.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The visible character positions in order, the anchor surface
    /// `applyDiff`/`insertBefore`/`deleteRange` callers need without reaching
    /// into the underlying [`CoListFold`] directly.
    pub fn positions(&self) -> Vec<Pos> {
        self.inner.positions()
    }
}

pub fn fold_coplaintext(applied: Vec<Applied>) -> CoPlainTextFold {
    let expanded = applied.iter().flat_map(expand).collect();
    CoPlainTextFold {
        inner: fold_colist(expanded),
    }
}

/// Build an `insertAfter(pos, text)` change record (§4.6). `after` is
/// `"start"` or a position's anchor text.
pub fn insert_after_op(after: &str, text: &str) -> serde_json::Value {
    serde_json::json!({"op": "ins", "after": after, "text": text})
}

/// Build an `insertBefore(pos, text)` change record (§4.6). `before` is
/// `"end"` or a position's anchor text.
pub fn insert_before_op(before: &str, text: &str) -> serde_json::Value {
    serde_json::json!({"op": "ins", "before": before, "text": text})
}

/// Build the change records for `deleteRange(from, to)` (§4.6): one `del`
/// op per character position currently visible in `[from, to)`.
pub fn delete_range_ops(positions: &[Pos], from: usize, to: usize) -> Vec<serde_json::Value> {
    positions
        .iter()
        .skip(from)
        .take(to.saturating_sub(from))
        .map(|pos| serde_json::json!({"op": "del", "pos": pos.anchor_text()}))
        .collect()
}

/// Compute the minimum edit script turning `current` into `new_text` as at
/// most one insertion and one deletion transaction (§8 S6): the common
/// prefix and suffix are left untouched, and the differing middle segment
/// is replaced in a single `ins`/`del` pair anchored at the end of the
/// common prefix.
pub fn diff_ops(
    current_fold: &CoPlainTextFold,
    current: &str,
    new_text: &str,
) -> (Option<serde_json::Value>, Vec<serde_json::Value>) {
    let cur: Vec<char> = current.chars().collect();
    let new: Vec<char> = new_text.chars().collect();

    let mut prefix = 0;
    while prefix < cur.len() && prefix < new.len() && cur[prefix] == new[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < cur.len() - prefix
        && suffix < new.len() - prefix
        && cur[cur.len() - 1 - suffix] == new[new.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let positions = current_fold.positions();
    let delete_from = prefix;
    let delete_to = cur.len() - suffix;
    let deletions = delete_range_ops(&positions, delete_from, delete_to);

    let insert_text: String = new[prefix..new.len() - suffix].iter().collect();
    let insertion = if insert_text.is_empty() {
        None
    } else {
        let anchor = if prefix == 0 {
            "start".to_string()
        } else {
            positions[prefix - 1].anchor_text()
        };
        Some(insert_after_op(&anchor, &insert_text))
    };

    (insertion, deletions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cojson_core::crypto::Digest;
    use cojson_core::ids::{CoValueId, SessionId};
    use cojson_core::time::{CausalKey, MadeAt};

    fn applied(idx: u64, op: serde_json::Value) -> Applied {
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

    #[test]
    fn ins_after_materializes_run_in_order() {
        let a = applied(1, insert_after_op("start", "hello"));
        let fold = fold_coplaintext(vec![a]);
        assert_eq!(fold.text(), "hello");
    }

    #[test]
    fn ins_before_materializes_run_in_order() {
        let a = applied(1, insert_before_op("end", "hello"));
        let fold = fold_coplaintext(vec![a]);
        assert_eq!(fold.text(), "hello");
    }

    #[test]
    fn sequential_runs_concatenate() {
        let a1 = applied(1, insert_after_op("start", "Meeting "));
        // "Meeting " is 8 characters; the last one lands at synthetic op_index 7.
        let a2 = applied(2, insert_after_op(&format!("{}/7", a1.id), "notes"));
        let fold = fold_coplaintext(vec![a1, a2]);
        assert_eq!(fold.text(), "Meeting notes");
    }

    #[test]
    fn diff_produces_single_insert_and_delete_roundtrip() {
        let a = applied(1, insert_after_op("start", "Meeting notes"));
        let fold = fold_coplaintext(vec![a]);

        let (insert, deletes) = diff_ops(&fold, &fold.text(), "Meeting weekly notes");
        assert!(insert.is_some());
        assert!(deletes.is_empty());

        let insert_op = insert.unwrap();
        assert_eq!(insert_op.get("text").unwrap().as_str().unwrap(), "weekly ");
    }
}
