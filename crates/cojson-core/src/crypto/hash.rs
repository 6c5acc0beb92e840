//! Pure synchronous hash trait for content and chain hashing.
//!
//! Hashing is deterministic and side-effect free, so — unlike signing and
//! sealing — it does not need to go through the [`CryptoProvider`](super::CryptoProvider)
//! trait object. A single compile-time-selected algorithm is used everywhere;
//! to change it, edit the `ALGORITHM` constant below.
//!
//! Current algorithm: **BLAKE3** (32-byte output).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte content hash, used both as a CoValue's ID-deriving header hash
/// and as a session's running chain hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bs58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_bs58())
    }
}

/// A truncated 16-byte digest used for cheap in-memory dedup keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShortDigest(pub [u8; 16]);

pub trait HashAlgorithm: Send + Sync + fmt::Debug {
    fn hash(&self, data: &[u8]) -> Digest;
    fn short_hash(&self, data: &[u8]) -> ShortDigest;
    fn hasher(&self) -> Box<dyn Hasher>;
}

/// Incremental hashing of multi-part data.
pub trait Hasher: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Digest;
}

#[derive(Debug, Clone, Copy)]
pub struct Blake3Algorithm;

impl HashAlgorithm for Blake3Algorithm {
    fn hash(&self, data: &[u8]) -> Digest {
        Digest(*blake3::hash(data).as_bytes())
    }

    fn short_hash(&self, data: &[u8]) -> ShortDigest {
        let full = blake3::hash(data);
        let mut out = [0u8; 16];
        out.copy_from_slice(&full.as_bytes()[..16]);
        ShortDigest(out)
    }

    fn hasher(&self) -> Box<dyn Hasher> {
        Box::new(Blake3Hasher(blake3::Hasher::new()))
    }
}

struct Blake3Hasher(blake3::Hasher);

impl Hasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> Digest {
        Digest(*self.0.finalize().as_bytes())
    }
}

/// The global hash algorithm used throughout the engine.
pub const ALGORITHM: Blake3Algorithm = Blake3Algorithm;

/// Hash bytes with the global algorithm.
#[inline]
pub fn hash(data: &[u8]) -> Digest {
    ALGORITHM.hash(data)
}

/// Truncated hash with the global algorithm.
#[inline]
pub fn short_hash(data: &[u8]) -> ShortDigest {
    ALGORITHM.short_hash(data)
}

/// Chain-extend a running hash with the canonical bytes of a new transaction:
/// `h_i = H(h_{i-1} || canonical(tx_i))`.
pub fn chain_extend(previous: &Digest, canonical_tx_bytes: &[u8]) -> Digest {
    let mut h = hasher();
    h.update(&previous.0);
    h.update(canonical_tx_bytes);
    h.finalize()
}

#[inline]
pub fn hasher() -> Box<dyn Hasher> {
    ALGORITHM.hasher()
}
