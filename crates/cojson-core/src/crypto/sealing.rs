//! Authenticated asymmetric encryption ("sealing"), used only to wrap group
//! symmetric keys for individual members.
//!
//! X25519 key agreement derives a shared secret, HKDF-SHA256 stretches it
//! into a ChaCha20-Poly1305 key bound to both public keys and the nonce, and
//! the plaintext is sealed under that key. This gives the narrow
//! `seal`/`unseal` operation from the crypto provider interface without
//! pulling in a full HPKE implementation.

use crate::error::{CoJsonError, Result};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, KeyInit, Nonce};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealingSecretKey(pub [u8; 32]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SealingPublicKey(pub [u8; 32]);

impl SealingSecretKey {
    pub fn public_key(&self) -> SealingPublicKey {
        let secret = StaticSecret::from(self.0);
        SealingPublicKey(PublicKey::from(&secret).to_bytes())
    }
}

pub struct SealingKeypair {
    pub secret: SealingSecretKey,
    pub public: SealingPublicKey,
}

pub fn generate_sealing_keypair<R: rand_core::RngCore + rand_core::CryptoRng>(
    rng: &mut R,
) -> SealingKeypair {
    let secret = StaticSecret::random_from_rng(rng);
    let public = PublicKey::from(&secret);
    SealingKeypair {
        secret: SealingSecretKey(secret.to_bytes()),
        public: SealingPublicKey(public.to_bytes()),
    }
}

/// A 12-byte nonce for the AEAD layer underlying seal/unseal and symmetric
/// encrypt/decrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AeadNonce(pub [u8; 12]);

fn derive_seal_key(shared_secret: &[u8; 32], to_pk: &[u8; 32], nonce: &AeadNonce) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(&nonce.0), shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(&to_pk[..], &mut okm)
        .expect("32 bytes is a valid HKDF output length");
    okm
}

/// Seal `plaintext` so only the holder of `to_sk` (paired with `to_pk`) can
/// open it, authenticated as having come from `from_sk`.
pub fn seal(
    to_pk: &SealingPublicKey,
    from_sk: &SealingSecretKey,
    nonce: &AeadNonce,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let from_secret = StaticSecret::from(from_sk.0);
    let to_public = PublicKey::from(to_pk.0);
    let shared = from_secret.diffie_hellman(&to_public);
    let key_bytes = derive_seal_key(shared.as_bytes(), &to_pk.0, nonce);
    let cipher = ChaCha20Poly1305::new((&key_bytes).into());
    cipher
        .encrypt(Nonce::from_slice(&nonce.0), plaintext)
        .map_err(|_| CoJsonError::crypto("seal failed"))
}

/// Open a blob produced by [`seal`]. Returns `None` on tamper, per the
/// provider interface's "fails closed" contract.
pub fn unseal(
    from_pk: &SealingPublicKey,
    to_sk: &SealingSecretKey,
    nonce: &AeadNonce,
    ciphertext: &[u8],
) -> Option<Vec<u8>> {
    let to_secret = StaticSecret::from(to_sk.0);
    let from_public = PublicKey::from(from_pk.0);
    let shared = to_secret.diffie_hellman(&from_public);
    let to_pk = PublicKey::from(&to_secret).to_bytes();
    let key_bytes = derive_seal_key(shared.as_bytes(), &to_pk, nonce);
    let cipher = ChaCha20Poly1305::new((&key_bytes).into());
    cipher.decrypt(Nonce::from_slice(&nonce.0), ciphertext).ok()
}
