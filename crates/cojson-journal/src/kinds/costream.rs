//! CoStream: a per-session append-only feed, with no cross-session merge
//! (§4.6). The public view is "for each session, its own ordered entries";
//! convenience accessors combine those per-session feeds without altering
//! them.

use super::{sorted, Applied};
use cojson_core::ids::SessionId;
use cojson_core::time::CausalKey;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    causal_key: CausalKey,
    value: Value,
}

/// The folded view: each session's entries kept in its own append order,
/// since concurrent sessions never interleave or merge (§4.6 Non-goals:
/// "conflict-free merging of binary blobs").
#[derive(Debug, Default)]
pub struct CoStreamFold {
    by_session: HashMap<SessionId, Vec<Entry>>,
}

pub fn fold_costream(applied: Vec<Applied>) -> CoStreamFold {
    let mut fold = CoStreamFold::default();
    for a in sorted(applied) {
        fold.by_session.entry(a.id.session).or_default().push(Entry {
            causal_key: a.causal_key,
            value: a.op,
        });
    }
    fold
}

impl CoStreamFold {
    /// A single session's entries, in append order.
    pub(crate) fn for_session(&self, session: SessionId) -> &[Entry] {
        self.by_session.get(&session).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn values_for_session(&self, session: SessionId) -> Vec<&Value> {
        self.for_session(session).iter().map(|e| &e.value).collect()
    }

    /// The most recent entry written by each session.
    pub fn latest_per_session(&self) -> HashMap<SessionId, &Value> {
        self.by_session
            .iter()
            .filter_map(|(s, entries)| entries.last().map(|e| (*s, &e.value)))
            .collect()
    }

    /// The most recent entry written by any of `account`'s sessions, by
    /// causal order.
    pub fn latest_per_account(&self, account: cojson_core::ids::AccountId) -> Option<&Value> {
        self.by_session
            .iter()
            .filter(|(s, _)| s.account == account)
            .filter_map(|(_, entries)| entries.last())
            .max_by_key(|e| e.causal_key)
            .map(|e| &e.value)
    }

    /// Every entry from every session, in causal order.
    pub fn all(&self) -> Vec<&Value> {
        let mut entries: Vec<&Entry> = self.by_session.values().flatten().collect();
        entries.sort_by_key(|e| e.causal_key);
        entries.into_iter().map(|e| &e.value).collect()
    }
}

/// Decode a binary stream session's entries: concatenate base64-encoded
/// `push` chunks between each matched `start`/`end` pair (§4.6 "Binary
/// streams"). A `start` without a matching `end` yields no segment (the
/// blob is still in flight). Malformed chunk data is skipped rather than
/// failing the whole decode, since one corrupt segment should not hide
/// others.
pub fn decode_binary_segments(fold: &CoStreamFold, session: SessionId) -> Vec<Vec<u8>> {
    use base64::Engine;

    let mut segments = Vec::new();
    let mut current: Option<Vec<u8>> = None;
    for entry in fold.for_session(session) {
        let Some(op) = entry.value.get("op").and_then(Value::as_str) else { continue };
        match op {
            "start" => current = Some(Vec::new()),
            "push" => {
                if let (Some(buf), Some(chunk)) = (current.as_mut(), entry.value.get("chunk").and_then(Value::as_str)) {
                    if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(chunk) {
                        buf.extend(bytes);
                    }
                }
            }
            "end" => {
                if let Some(buf) = current.take() {
                    segments.push(buf);
                }
            }
            _ => {}
        }
    }
    segments
}

pub fn start_op() -> Value {
    serde_json::json!({"op": "start"})
}

pub fn push_op(chunk: &[u8]) -> Value {
    use base64::Engine;
    serde_json::json!({"op": "push", "chunk": base64::engine::general_purpose::STANDARD.encode(chunk)})
}

pub fn end_op() -> Value {
    serde_json::json!({"op": "end"})
}

#[cfg(test)]
mod tests {
    use super::*;
    use cojson_core::crypto::Digest;
    use cojson_core::ids::{CoValueId, TransactionId};
    use cojson_core::time::MadeAt;

    fn applied(session: SessionId, idx: u64, op: Value) -> Applied {
        let tx = TransactionId::new(session, idx);
        Applied {
            id: tx,
            causal_key: CausalKey::new(MadeAt(idx as i64), session, idx),
            op_index: 0,
            op,
        }
    }

    #[test]
    fn sessions_do_not_interleave() {
        let acc1 = CoValueId(Digest([1u8; 32]));
        let acc2 = CoValueId(Digest([2u8; 32]));
        let s1 = SessionId::new(acc1, 1);
        let s2 = SessionId::new(acc2, 1);
        let a1 = applied(s1, 0, serde_json::json!("a"));
        let a2 = applied(s2, 0, serde_json::json!("b"));
        let fold = fold_costream(vec![a1, a2]);
        assert_eq!(fold.values_for_session(s1), vec![&Value::String("a".into())]);
        assert_eq!(fold.values_for_session(s2), vec![&Value::String("b".into())]);
    }

    #[test]
    fn latest_per_account_picks_max_across_sessions() {
        let acc = CoValueId(Digest([1u8; 32]));
        let s1 = SessionId::new(acc, 1);
        let s2 = SessionId::new(acc, 2);
        let a1 = applied(s1, 0, serde_json::json!("from-s1"));
        let a2 = applied(s2, 0, serde_json::json!("from-s2"));
        let fold = fold_costream(vec![a1, a2]);
        // s2's text sorts greater than s1's, so it wins the causal tie.
        assert_eq!(fold.latest_per_account(acc), Some(&Value::String("from-s2".into())));
    }

    #[test]
    fn binary_stream_round_trips_through_start_push_end() {
        let acc = CoValueId(Digest([1u8; 32]));
        let session = SessionId::new(acc, 1);
        let entries = vec![
            applied(session, 0, start_op()),
            applied(session, 1, push_op(b"hello ")),
            applied(session, 2, push_op(b"world")),
            applied(session, 3, end_op()),
        ];
        let fold = fold_costream(entries);
        let segments = decode_binary_segments(&fold, session);
        assert_eq!(segments, vec![b"hello world".to_vec()]);
    }

    #[test]
    fn unterminated_chunk_yields_no_segment() {
        let acc = CoValueId(Digest([1u8; 32]));
        let session = SessionId::new(acc, 1);
        let entries = vec![applied(session, 0, start_op()), applied(session, 1, push_op(b"partial"))];
        let fold = fold_costream(entries);
        assert!(decode_binary_segments(&fold, session).is_empty());
    }
}
