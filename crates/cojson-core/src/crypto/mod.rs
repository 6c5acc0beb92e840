//! The narrow crypto interface the rest of the engine is built against.
//!
//! The core never touches key material directly; every operation it needs
//! goes through [`CryptoProvider`]. [`DefaultCryptoProvider`] is the
//! reference implementation (BLAKE3 + Ed25519 + X25519/HKDF/ChaCha20-Poly1305),
//! but the trait is object-safe so an HSM-backed or WASM-targeted provider
//! can be substituted without touching `cojson-journal` or `cojson-sync`.

pub mod hash;
pub mod sealing;
pub mod signing;
pub mod symmetric;

pub use hash::{Digest, ShortDigest};
pub use sealing::{AeadNonce, SealingKeypair, SealingPublicKey, SealingSecretKey};
pub use signing::{Ed25519Signature, SigningKeypair, SigningPublicKey, SigningSecretKey};
pub use symmetric::SymmetricKey;

use crate::error::Result;
use rand::rngs::OsRng;

/// Operations the engine needs from a crypto backend. Every method is
/// deterministic given its inputs except keypair generation and
/// `random_bytes`, which draw from the provider's RNG.
pub trait CryptoProvider: Send + Sync {
    fn hash(&self, data: &[u8]) -> Digest;
    fn short_hash(&self, data: &[u8]) -> ShortDigest;

    fn signing_keypair(&self) -> SigningKeypair;
    fn sign(&self, sk: &SigningSecretKey, msg: &[u8]) -> Ed25519Signature;
    fn verify(&self, pk: &SigningPublicKey, msg: &[u8], sig: &Ed25519Signature) -> bool;

    fn sealing_keypair(&self) -> SealingKeypair;
    fn seal(
        &self,
        to_pk: &SealingPublicKey,
        from_sk: &SealingSecretKey,
        nonce: &AeadNonce,
        plaintext: &[u8],
    ) -> Result<Vec<u8>>;
    fn unseal(
        &self,
        from_pk: &SealingPublicKey,
        to_sk: &SealingSecretKey,
        nonce: &AeadNonce,
        ciphertext: &[u8],
    ) -> Option<Vec<u8>>;

    fn new_symmetric_key(&self) -> SymmetricKey;
    fn encrypt(&self, key: &SymmetricKey, nonce: &AeadNonce, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, key: &SymmetricKey, nonce: &AeadNonce, ciphertext: &[u8]) -> Option<Vec<u8>>;

    fn random_bytes(&self, n: usize) -> Vec<u8>;
}

/// The reference provider used when no other is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCryptoProvider;

impl CryptoProvider for DefaultCryptoProvider {
    fn hash(&self, data: &[u8]) -> Digest {
        hash::hash(data)
    }

    fn short_hash(&self, data: &[u8]) -> ShortDigest {
        hash::short_hash(data)
    }

    fn signing_keypair(&self) -> SigningKeypair {
        signing::generate_signing_keypair(&mut OsRng)
    }

    fn sign(&self, sk: &SigningSecretKey, msg: &[u8]) -> Ed25519Signature {
        sk.sign(msg)
    }

    fn verify(&self, pk: &SigningPublicKey, msg: &[u8], sig: &Ed25519Signature) -> bool {
        pk.verify(msg, sig)
    }

    fn sealing_keypair(&self) -> SealingKeypair {
        sealing::generate_sealing_keypair(&mut OsRng)
    }

    fn seal(
        &self,
        to_pk: &SealingPublicKey,
        from_sk: &SealingSecretKey,
        nonce: &AeadNonce,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        sealing::seal(to_pk, from_sk, nonce, plaintext)
    }

    fn unseal(
        &self,
        from_pk: &SealingPublicKey,
        to_sk: &SealingSecretKey,
        nonce: &AeadNonce,
        ciphertext: &[u8],
    ) -> Option<Vec<u8>> {
        sealing::unseal(from_pk, to_sk, nonce, ciphertext)
    }

    fn new_symmetric_key(&self) -> SymmetricKey {
        SymmetricKey::generate(&mut OsRng)
    }

    fn encrypt(&self, key: &SymmetricKey, nonce: &AeadNonce, plaintext: &[u8]) -> Result<Vec<u8>> {
        symmetric::encrypt(key, nonce, plaintext)
    }

    fn decrypt(&self, key: &SymmetricKey, nonce: &AeadNonce, ciphertext: &[u8]) -> Option<Vec<u8>> {
        symmetric::decrypt(key, nonce, ciphertext)
    }

    fn random_bytes(&self, n: usize) -> Vec<u8> {
        use rand::RngCore;
        let mut buf = vec![0u8; n];
        OsRng.fill_bytes(&mut buf);
        buf
    }
}
