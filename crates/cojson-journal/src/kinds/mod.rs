//! The four concrete CRDT value kinds (§4.6). Each module folds a sequence
//! of already-validated, already-decrypted change records into a
//! materialized view; none of them know about sessions, signatures, or
//! encryption — that is [`crate::core::CoValueCore`]'s job.

pub mod comap;
pub mod colist;
pub mod coplaintext;
pub mod costream;

use cojson_core::ids::TransactionId;
use cojson_core::time::CausalKey;

/// One change record, tagged with the causal position of the transaction it
/// came from and its index within that transaction's `changes` array (used
/// only to break ties between multiple ops in the same transaction, never
/// across transactions).
#[derive(Debug, Clone)]
pub struct Applied {
    pub id: TransactionId,
    pub causal_key: CausalKey,
    pub op_index: u32,
    pub op: serde_json::Value,
}

impl Applied {
    /// `(causal_key, op_index)`, the total order every kind's fold applies
    /// changes in.
    fn sort_key(&self) -> (CausalKey, u32) {
        (self.causal_key, self.op_index)
    }
}

pub fn sorted(mut applied: Vec<Applied>) -> Vec<Applied> {
    applied.sort_by_key(|a| a.sort_key());
    applied
}
