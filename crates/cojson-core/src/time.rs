//! Wall-clock timestamps and the causal ordering tuple (§3).
//!
//! `MadeAt` is advisory only — it is never load-bearing for convergence,
//! only for the LWW tie-break and for `atTime` point-in-time views.

use crate::ids::SessionId;
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, as reported by the writer. Never used
/// for ordering on its own; see [`CausalKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MadeAt(pub i64);

impl MadeAt {
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        Self(millis)
    }
}

/// The deterministic tie-break key used to order transactions across
/// sessions: `(madeAt, sessionID, indexInSession)`. Not a vector clock —
/// concurrent writes are resolved by the CRDT fold, not by this key; it only
/// supplies a stable tie-break for LWW-style kinds (§3, S1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CausalKey {
    pub made_at: MadeAt,
    pub session: SessionId,
    pub index_in_session: u64,
}

impl CausalKey {
    pub fn new(made_at: MadeAt, session: SessionId, index_in_session: u64) -> Self {
        Self {
            made_at,
            session,
            index_in_session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Digest;
    use crate::ids::CoValueId;

    #[test]
    fn later_made_at_wins_ties_broken_by_session() {
        let acc = CoValueId(Digest([0u8; 32]));
        let s1 = SessionId::new(acc, 1);
        let s2 = SessionId::new(acc, 2);
        let a = CausalKey::new(MadeAt(100), s1, 0);
        let b = CausalKey::new(MadeAt(100), s2, 0);
        // session 2's textual form is lexicographically greater, so it wins
        // the tie per S1's tie-break rule.
        assert!(b > a);
    }

    #[test]
    fn made_at_dominates_when_distinct() {
        let acc = CoValueId(Digest([0u8; 32]));
        let s1 = SessionId::new(acc, 5);
        let s2 = SessionId::new(acc, 1);
        let a = CausalKey::new(MadeAt(50), s1, 0);
        let b = CausalKey::new(MadeAt(100), s2, 0);
        assert!(b > a);
    }
}
