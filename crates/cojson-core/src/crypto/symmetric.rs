//! AEAD symmetric encryption for private transaction payloads, keyed by a
//! group's current key epoch.

use super::sealing::AeadNonce;
use crate::error::{CoJsonError, Result};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, KeyInit};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymmetricKey(pub [u8; 32]);

impl SymmetricKey {
    pub fn generate<R: rand_core::RngCore + rand_core::CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

pub fn encrypt(key: &SymmetricKey, nonce: &AeadNonce, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new((&key.0).into());
    cipher
        .encrypt(chacha20poly1305::Nonce::from_slice(&nonce.0), plaintext)
        .map_err(|_| CoJsonError::crypto("symmetric encrypt failed"))
}

/// Returns `None` on tamper, per the provider interface's "fails closed" contract.
pub fn decrypt(key: &SymmetricKey, nonce: &AeadNonce, ciphertext: &[u8]) -> Option<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new((&key.0).into());
    cipher
        .decrypt(chacha20poly1305::Nonce::from_slice(&nonce.0), ciphertext)
        .ok()
}
