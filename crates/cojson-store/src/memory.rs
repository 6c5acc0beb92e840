//! In-memory reference `Storage` implementation (§4.9). The only backend
//! the teacher's own storage crate ships (its `redb` backend was dropped
//! before this spec existed), so this module keeps that same shape rather
//! than inventing a second concrete backend for tests.

use crate::{Storage, StoredCoValue, StoredSession};
use async_trait::async_trait;
use cojson_core::crypto::signing::Ed25519Signature;
use cojson_core::error::Result;
use cojson_core::ids::{CoValueId, SessionId};
use cojson_journal::{CoValueHeader, Transaction};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryStore {
    covalues: Mutex<HashMap<CoValueId, StoredCoValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn write_header(&self, covalue: CoValueId, header: &CoValueHeader) -> Result<()> {
        let mut guard = self.covalues.lock();
        guard.entry(covalue).or_insert_with(|| StoredCoValue {
            header: header.clone(),
            sessions: HashMap::new(),
        });
        Ok(())
    }

    async fn write_transactions(
        &self,
        covalue: CoValueId,
        session: SessionId,
        after_index: u64,
        txs: &[Transaction],
        last_signature: Ed25519Signature,
    ) -> Result<()> {
        let mut guard = self.covalues.lock();
        let stored = guard
            .get_mut(&covalue)
            .ok_or_else(|| cojson_core::error::CoJsonError::not_found(format!("covalue {covalue} has no header on file")))?;
        let entry = stored.sessions.entry(session).or_insert_with(|| StoredSession {
            transactions: Vec::new(),
            last_signature,
        });
        if after_index as usize != entry.transactions.len() {
            return Err(cojson_core::error::CoJsonError::storage(format!(
                "write at index {after_index} does not extend stored length {}",
                entry.transactions.len()
            )));
        }
        entry.transactions.extend_from_slice(txs);
        entry.last_signature = last_signature;
        Ok(())
    }

    async fn read_covalue(&self, covalue: CoValueId) -> Result<Option<StoredCoValue>> {
        Ok(self.covalues.lock().get(&covalue).cloned())
    }

    async fn list_covalues(&self) -> Result<Vec<CoValueId>> {
        Ok(self.covalues.lock().keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cojson_core::crypto::hash::hash;
    use cojson_core::crypto::signing::generate_signing_keypair;
    use cojson_core::ids::CoValueId as Id;
    use cojson_core::time::MadeAt;
    use cojson_journal::{CoValueType, Ruleset};
    use rand::rngs::OsRng;

    fn header() -> CoValueHeader {
        CoValueHeader::new(CoValueType::Comap, Ruleset::UnsafeAllowAll, serde_json::json!({}), 1, "u".into())
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let store = MemoryStore::new();
        let covalue = Id(hash(b"cv"));
        let account = Id(hash(b"acc"));
        let session = SessionId::new(account, 1);
        let kp = generate_signing_keypair(&mut OsRng);
        let sig = kp.secret.sign(b"placeholder");

        store.write_header(covalue, &header()).await.unwrap();
        let tx = Transaction::trusting(MadeAt(1), vec![serde_json::json!({"op": "set"})]);
        store.write_transactions(covalue, session, 0, &[tx], sig).await.unwrap();

        let stored = store.read_covalue(covalue).await.unwrap().unwrap();
        assert_eq!(stored.sessions[&session].transactions.len(), 1);
        assert_eq!(store.list_covalues().await.unwrap(), vec![covalue]);
    }

    #[tokio::test]
    async fn write_without_header_fails() {
        let store = MemoryStore::new();
        let covalue = Id(hash(b"cv"));
        let session = SessionId::new(Id(hash(b"acc")), 1);
        let kp = generate_signing_keypair(&mut OsRng);
        let sig = kp.secret.sign(b"x");
        let tx = Transaction::trusting(MadeAt(1), vec![]);
        assert!(store.write_transactions(covalue, session, 0, &[tx], sig).await.is_err());
    }
}
