//! Ed25519 signature types, used for account identity and session-log
//! trailing signatures.

use crate::error::{CoJsonError, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ed25519Signature(pub [u8; 64]);

impl Ed25519Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn try_from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| CoJsonError::crypto("signature must be exactly 64 bytes"))?;
        Ok(Self(arr))
    }
}

impl TryFrom<&[u8]> for Ed25519Signature {
    type Error = CoJsonError;

    fn try_from(value: &[u8]) -> Result<Self> {
        Self::try_from_slice(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningSecretKey(pub [u8; 32]);

impl SigningSecretKey {
    pub fn verifying_key(&self) -> Result<SigningPublicKey> {
        let sk = SigningKey::from_bytes(&self.0);
        Ok(SigningPublicKey(sk.verifying_key().to_bytes()))
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        let sk = SigningKey::from_bytes(&self.0);
        Ed25519Signature(sk.sign(message).to_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SigningPublicKey(pub [u8; 32]);

impl SigningPublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn try_from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoJsonError::crypto("verifying key must be exactly 32 bytes"))?;
        Ok(Self(arr))
    }

    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> bool {
        let Ok(vk) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let sig = Signature::from_bytes(&signature.0);
        vk.verify(message, &sig).is_ok()
    }
}

pub struct SigningKeypair {
    pub secret: SigningSecretKey,
    pub public: SigningPublicKey,
}

/// Generate a fresh signing keypair from the given RNG.
pub fn generate_signing_keypair<R: rand_core::RngCore + rand_core::CryptoRng>(
    rng: &mut R,
) -> SigningKeypair {
    let sk = SigningKey::generate(rng);
    SigningKeypair {
        secret: SigningSecretKey(sk.to_bytes()),
        public: SigningPublicKey(sk.verifying_key().to_bytes()),
    }
}
