//! # cojson-store
//!
//! The pluggable storage interface (§4.9) plus two reference
//! implementations: an in-memory store for tests and short-lived nodes, and
//! an append-only file store matching the reference layout in §6.

#![forbid(unsafe_code)]

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use cojson_core::crypto::signing::Ed25519Signature;
use cojson_core::error::Result;
use cojson_core::ids::{CoValueId, SessionId};
use cojson_journal::{CoValueHeader, Transaction};
use std::collections::HashMap;

/// One session's durable state as read back from storage.
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub transactions: Vec<Transaction>,
    pub last_signature: Ed25519Signature,
}

/// A whole CoValue's durable state as read back from storage.
#[derive(Debug, Clone)]
pub struct StoredCoValue {
    pub header: CoValueHeader,
    pub sessions: HashMap<SessionId, StoredSession>,
}

/// Pluggable durability backend (§4.9). Expected to provide at least
/// monotonic durability: once a write returns success, a subsequent read
/// reflects it; crashes may lose not-yet-acknowledged writes but must not
/// lose a prefix of a session's log.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist `header` the first time a CoValue is created. Idempotent:
    /// writing the same header twice is a no-op, not an error.
    async fn write_header(&self, covalue: CoValueId, header: &CoValueHeader) -> Result<()>;

    /// Atomically append `txs` to `session`'s durable log, starting at
    /// `after_index`, recording `last_signature` as the new trailing
    /// signature (§4.3, §4.9).
    async fn write_transactions(
        &self,
        covalue: CoValueId,
        session: SessionId,
        after_index: u64,
        txs: &[Transaction],
        last_signature: Ed25519Signature,
    ) -> Result<()>;

    /// Stream back a CoValue's complete durable state, or `None` if it has
    /// never been written.
    async fn read_covalue(&self, covalue: CoValueId) -> Result<Option<StoredCoValue>>;

    /// Every CoValue ID this store holds, for startup repopulation.
    async fn list_covalues(&self) -> Result<Vec<CoValueId>>;
}
