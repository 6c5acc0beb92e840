//! Append-only, hash-chained, signed per-(CoValue, session) transaction log
//! (§4.3).

use crate::transaction::Transaction;
use cojson_core::canonical;
use cojson_core::crypto::hash::{chain_extend, Digest};
use cojson_core::crypto::signing::{Ed25519Signature, SigningPublicKey};
use cojson_core::error::{CoJsonError, Result};
use cojson_core::ids::{CoValueId, SessionId};

/// The running chain hash before any transaction has been appended: bound
/// to the specific (CoValue, session) pair so a session's chain cannot be
/// replayed against a different CoValue or grafted onto another session.
fn genesis_hash(covalue: CoValueId, session: SessionId) -> Digest {
    cojson_core::crypto::hash::hash(format!("{covalue}:{session}").as_bytes())
}

/// One (CoValue, session)'s append-only log.
#[derive(Debug, Clone)]
pub struct SessionLog {
    covalue: CoValueId,
    session: SessionId,
    transactions: Vec<Transaction>,
    /// `chain_hashes[i]` is the hash after `transactions[i]` has been
    /// applied; `chain_hashes.len() == transactions.len()`.
    chain_hashes: Vec<Digest>,
    /// The latest verified trailing signature and the index (exclusive
    /// upper bound) of transactions it covers. Signatures are cumulative:
    /// a new one supersedes the last (§3 invariant 2).
    last_signature: Option<(u64, Ed25519Signature)>,
}

impl SessionLog {
    pub fn new(covalue: CoValueId, session: SessionId) -> Self {
        Self {
            covalue,
            session,
            transactions: Vec::new(),
            chain_hashes: Vec::new(),
            last_signature: None,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn len(&self) -> u64 {
        self.transactions.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// The number of transactions covered by a verified signature — the
    /// durable, trustworthy prefix of this log (§4.4 pt.1: "defer signature
    /// check until a batch endpoint is reached").
    pub fn verified_len(&self) -> u64 {
        self.last_signature.as_ref().map(|(n, _)| *n).unwrap_or(0)
    }

    pub fn current_hash(&self) -> Digest {
        self.chain_hashes
            .last()
            .copied()
            .unwrap_or_else(|| genesis_hash(self.covalue, self.session))
    }

    pub fn transactions_after(&self, index: u64) -> &[Transaction] {
        let start = (index as usize).min(self.transactions.len());
        &self.transactions[start..]
    }

    pub fn transaction_at(&self, index: u64) -> Option<&Transaction> {
        self.transactions.get(index as usize)
    }

    pub fn last_signature(&self) -> Option<Ed25519Signature> {
        self.last_signature.as_ref().map(|(_, sig)| *sig)
    }

    /// Compute the chain hash that would result from appending `txs`,
    /// without mutating the log — lets a writer derive the signature it
    /// needs to pass to [`Self::append_batch`] ahead of time.
    pub fn hash_after(&self, txs: &[Transaction]) -> Result<Digest> {
        let mut hash = self.current_hash();
        for tx in txs {
            let bytes = canonical::encode_serializable(tx)?;
            hash = chain_extend(&hash, &bytes);
        }
        Ok(hash)
    }

    /// Append a batch of transactions extending the chain from `from_index`,
    /// verifying the trailing signature over the final hash before
    /// committing anything (§4.8 pt.3: all-or-nothing per message).
    pub fn append_batch(
        &mut self,
        from_index: u64,
        new_transactions: Vec<Transaction>,
        signature: Ed25519Signature,
        verifying_key: &SigningPublicKey,
    ) -> Result<()> {
        if from_index != self.len() {
            return Err(CoJsonError::chain_broken(format!(
                "expected batch to start at index {}, got {from_index}",
                self.len()
            )));
        }
        if new_transactions.is_empty() {
            return Ok(());
        }

        let mut hash = self.current_hash();
        let mut new_hashes = Vec::with_capacity(new_transactions.len());
        for tx in &new_transactions {
            let bytes = canonical::encode_serializable(tx)?;
            hash = chain_extend(&hash, &bytes);
            new_hashes.push(hash);
        }

        if !verifying_key.verify(hash.as_bytes(), &signature) {
            return Err(CoJsonError::signature_invalid(format!(
                "trailing signature for session {} does not verify",
                self.session
            )));
        }

        let committed_len = self.len() + new_transactions.len() as u64;
        self.transactions.extend(new_transactions);
        self.chain_hashes.extend(new_hashes);
        self.last_signature = Some((committed_len, signature));
        Ok(())
    }

    /// Re-derive the chain hash from scratch and confirm the trailing
    /// signature verifies (§4.3 `verify()`).
    pub fn verify(&self, verifying_key: &SigningPublicKey) -> Result<()> {
        let mut hash = genesis_hash(self.covalue, self.session);
        for tx in &self.transactions {
            let bytes = canonical::encode_serializable(tx)?;
            hash = chain_extend(&hash, &bytes);
        }
        if hash != self.current_hash() {
            return Err(CoJsonError::chain_broken("recomputed hash does not match cached hash"));
        }
        match &self.last_signature {
            Some((_, sig)) if verifying_key.verify(hash.as_bytes(), sig) => Ok(()),
            Some(_) => Err(CoJsonError::signature_invalid("trailing signature does not verify")),
            None => Err(CoJsonError::signature_invalid("session log has no signature yet")),
        }
    }
}
