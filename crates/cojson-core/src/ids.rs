//! Typed, textually-stable identifiers (§4.2).
//!
//! Every ID wraps fixed-width bytes and round-trips through a `co_z...`
//! style base58 textual form. Session IDs carry the owning account's ID as a
//! prefix so a verifying key is locatable from the session ID alone.

use crate::crypto::Digest;
use crate::error::{CoJsonError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The ID of a CoValue: `co_z` + base58(header hash). Never changes once a
/// CoValue is created, since it is a hash of the immutable header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoValueId(pub Digest);

impl CoValueId {
    pub fn from_header_hash(digest: Digest) -> Self {
        Self(digest)
    }
}

impl fmt::Display for CoValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "co_z{}", self.0.to_bs58())
    }
}

impl std::str::FromStr for CoValueId {
    type Err = CoJsonError;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("co_z")
            .ok_or_else(|| CoJsonError::invalid("CoValue ID must start with co_z"))?;
        let bytes = bs58::decode(rest)
            .into_vec()
            .map_err(|e| CoJsonError::invalid(format!("bad base58 in CoValue ID: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoJsonError::invalid("CoValue ID hash must be 32 bytes"))?;
        Ok(Self(Digest(arr)))
    }
}

/// An account is itself a CoValue, so its ID is a `CoValueId`.
pub type AccountId = CoValueId;

/// A group is itself a CoValue, so its ID is a `CoValueId`.
pub type GroupId = CoValueId;

/// A single device/tab's single-writer append context: `<accountID>_session_z<counter>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    pub account: AccountId,
    pub counter: u64,
}

impl SessionId {
    pub fn new(account: AccountId, counter: u64) -> Self {
        Self { account, counter }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_session_z{}",
            self.account,
            bs58::encode(self.counter.to_be_bytes()).into_string()
        )
    }
}

impl std::str::FromStr for SessionId {
    type Err = CoJsonError;

    fn from_str(s: &str) -> Result<Self> {
        let (account_text, rest) = s
            .split_once("_session_z")
            .ok_or_else(|| CoJsonError::invalid("session ID must contain '_session_z'"))?;
        let account: AccountId = account_text.parse()?;
        let counter_bytes = bs58::decode(rest)
            .into_vec()
            .map_err(|e| CoJsonError::invalid(format!("bad base58 in session ID counter: {e}")))?;
        let arr: [u8; 8] = counter_bytes
            .try_into()
            .map_err(|_| CoJsonError::invalid("session ID counter must be 8 bytes"))?;
        Ok(Self::new(account, u64::from_be_bytes(arr)))
    }
}

impl PartialOrd for SessionId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SessionId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Lexicographic on the textual form, matching the tie-break rule in
        // §3's causal ordering and S1's "sessionID lexicographically greater
        // wins" rule.
        self.to_string().cmp(&other.to_string())
    }
}

/// A transaction's ID is its position: the session it was appended in, plus
/// its index within that session. This also serves as the RGA position
/// identifier for list/plaintext insertions (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    pub session: SessionId,
    pub index_in_session: u64,
}

impl TransactionId {
    pub fn new(session: SessionId, index_in_session: u64) -> Self {
        Self {
            session,
            index_in_session,
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session, self.index_in_session)
    }
}

/// The ID of a group key epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyEpochId(pub u64);

impl fmt::Display for KeyEpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key_z{}", self.0)
    }
}
