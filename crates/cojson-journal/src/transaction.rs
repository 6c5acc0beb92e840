//! Transactions (§3): one atomic write to a CoValue from one session.
//!
//! `changes` holds either the plaintext JSON array of op records (when
//! `privacy` is `trusting`) or a single base64-encoded AEAD ciphertext
//! string sealing that same array (when `privacy` is `private`). Encoding it
//! this way keeps the wire/chain-hashed form a single JSON value per §3
//! while letting peers who cannot decrypt a given key epoch still hash-chain
//! and forward the transaction untouched (§4.4 pt.3).

use cojson_core::crypto::symmetric::SymmetricKey;
use cojson_core::crypto::{sealing::AeadNonce, symmetric};
use cojson_core::error::{CoJsonError, Result};
use cojson_core::ids::{KeyEpochId, TransactionId};
use cojson_core::time::MadeAt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Trusting,
    Private,
}

/// A transaction in its wire/stored form, exactly as it participates in the
/// chain hash (§4.3) and the signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "madeAt")]
    pub made_at: MadeAt,
    pub privacy: Privacy,
    /// A JSON array of op records when `trusting`, or a base64 ciphertext
    /// string sealing that array when `private`.
    pub changes: serde_json::Value,
    #[serde(rename = "keyUsed", skip_serializing_if = "Option::is_none")]
    pub key_used: Option<KeyEpochId>,
}

/// Derive a transaction's AEAD nonce deterministically from its position so
/// no extra field needs to be carried on the wire: the position is unique
/// per (CoValue, session) by construction of session logs.
fn nonce_for(id: TransactionId) -> AeadNonce {
    let digest = cojson_core::crypto::hash::hash(id.to_string().as_bytes());
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&digest.0[..12]);
    AeadNonce(nonce)
}

impl Transaction {
    pub fn trusting(made_at: MadeAt, changes: Vec<serde_json::Value>) -> Self {
        Self {
            made_at,
            privacy: Privacy::Trusting,
            changes: serde_json::Value::Array(changes),
            key_used: None,
        }
    }

    /// Seal `changes` under `key` (the group's active epoch) for this
    /// transaction's eventual position `id`.
    pub fn private(
        made_at: MadeAt,
        changes: &[serde_json::Value],
        key_used: KeyEpochId,
        key: &SymmetricKey,
        id: TransactionId,
    ) -> Result<Self> {
        let plaintext = serde_json::to_vec(&changes)
            .map_err(|e| CoJsonError::invalid(format!("changes not JSON-serializable: {e}")))?;
        let nonce = nonce_for(id);
        let ciphertext = symmetric::encrypt(key, &nonce, &plaintext)?;
        Ok(Self {
            made_at,
            privacy: Privacy::Private,
            changes: serde_json::Value::String(base64_encode(&ciphertext)),
            key_used: Some(key_used),
        })
    }

    pub fn is_private(&self) -> bool {
        matches!(self.privacy, Privacy::Private)
    }

    /// Decrypt this transaction's changes with `key`, assuming `id` is this
    /// transaction's position. Returns `None` if decryption fails (wrong
    /// key, tamper) — callers treat that as `KeyUnavailable`/`CryptoError`
    /// per §7, not as a hard error, since the transaction is still retained.
    pub fn decode_changes(&self, key: Option<&SymmetricKey>, id: TransactionId) -> Option<Vec<serde_json::Value>> {
        match self.privacy {
            Privacy::Trusting => self.changes.as_array().cloned(),
            Privacy::Private => {
                let key = key?;
                let ciphertext = base64_decode(self.changes.as_str()?)?;
                let nonce = nonce_for(id);
                let plaintext = symmetric::decrypt(key, &nonce, &ciphertext)?;
                serde_json::from_slice(&plaintext).ok()
            }
        }
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cojson_core::crypto::symmetric::SymmetricKey;
    use cojson_core::ids::{CoValueId, SessionId};
    use rand::rngs::OsRng;

    fn tx_id() -> TransactionId {
        let acc = CoValueId(cojson_core::crypto::hash::hash(b"acc"));
        TransactionId::new(SessionId::new(acc, 1), 0)
    }

    #[test]
    fn trusting_round_trips_changes() {
        let tx = Transaction::trusting(MadeAt(1), vec![serde_json::json!({"op": "set"})]);
        assert_eq!(
            tx.decode_changes(None, tx_id()).unwrap(),
            vec![serde_json::json!({"op": "set"})]
        );
    }

    #[test]
    fn private_round_trips_with_correct_key() {
        let key = SymmetricKey::generate(&mut OsRng);
        let id = tx_id();
        let tx = Transaction::private(
            MadeAt(1),
            &[serde_json::json!({"op": "set", "key": "k", "value": "v"})],
            KeyEpochId(0),
            &key,
            id,
        )
        .unwrap();
        assert!(tx.decode_changes(None, id).is_none());
        assert_eq!(
            tx.decode_changes(Some(&key), id).unwrap(),
            vec![serde_json::json!({"op": "set", "key": "k", "value": "v"})]
        );
    }

    #[test]
    fn private_fails_closed_with_wrong_key() {
        let key = SymmetricKey::generate(&mut OsRng);
        let wrong = SymmetricKey::generate(&mut OsRng);
        let id = tx_id();
        let tx = Transaction::private(MadeAt(1), &[serde_json::json!({"op": "set"})], KeyEpochId(0), &key, id)
            .unwrap();
        assert!(tx.decode_changes(Some(&wrong), id).is_none());
    }
}
