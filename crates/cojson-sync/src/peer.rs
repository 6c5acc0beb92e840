//! Per-peer reconciliation state machine (§4.8): `KNOWN`/`CONTENT`/`LOAD`/
//! `DONE` over one duplex channel, including backpressure, missing-
//! dependency buffering, and the ack-timeout-driven pessimistic reset.
//!
//! Decision logic (what to send given what we now know) is kept as plain
//! synchronous functions; only applying `CONTENT` to a core and reading a
//! core's current session lengths touch the node's registry/storage.

use crate::node::Node;
use crate::wire::{Content, Done, Known, Load, SessionContent, SyncMessage};
use cojson_core::config::NodeConfig;
use cojson_core::error::Result;
use cojson_core::ids::{CoValueId, SessionId};
use cojson_journal::{Ruleset, Transaction};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// A session extension's fragments received so far, kept until the one
/// reaching `final_index` arrives and brings a trailing signature that
/// verifies over the whole accumulated run (§4.8 "Backpressure": only the
/// last fragment's signature is meaningful, since it is the sender's
/// original signature over the complete, unfragmented extension).
struct PendingFragment {
    from_index: u64,
    transactions: Vec<Transaction>,
}

/// What we currently believe a peer holds for one CoValue: a session-index
/// watermark per session, plus whether it has ever seen the header.
#[derive(Debug, Clone, Default)]
struct PeerKnownState {
    has_header: bool,
    sessions: HashMap<SessionId, u64>,
}

/// Decide, given our own session lengths and what the peer is now telling
/// us it has, which sessions we should push `CONTENT` for (we have more)
/// and which we should `LOAD` (we have less). Pure so it is directly
/// property-testable against arbitrary watermark pairs.
fn diff_known(local: &HashMap<SessionId, u64>, remote: &HashMap<SessionId, u64>) -> (Vec<SessionId>, Vec<SessionId>) {
    let mut push = Vec::new();
    let mut load = Vec::new();
    for (session, &local_len) in local {
        let remote_len = remote.get(session).copied().unwrap_or(0);
        if local_len > remote_len {
            push.push(*session);
        }
    }
    for (session, &remote_len) in remote {
        let local_len = local.get(session).copied().unwrap_or(0);
        if remote_len > local_len {
            load.push(*session);
        }
    }
    push.sort();
    load.sort();
    (push, load)
}

/// One peer's full sync state, owned by [`crate::node::Node`].
pub struct PeerSyncState {
    believed: HashMap<CoValueId, PeerKnownState>,
    outbound: VecDeque<SyncMessage>,
    /// `CONTENT` buffered because it named a session whose account/group
    /// dependency we do not yet have (§4.8 pt.3); re-applied once that
    /// dependency's own `CONTENT` lands.
    pending_on_dependency: HashMap<CoValueId, Vec<Content>>,
    /// Fragments of a session extension received so far, keyed on
    /// `(CoValueId, SessionId)`, awaiting the fragment that completes them.
    pending_fragments: HashMap<(CoValueId, SessionId), PendingFragment>,
    last_sent_at: HashMap<CoValueId, Instant>,
}

impl PeerSyncState {
    pub fn new() -> Self {
        Self {
            believed: HashMap::new(),
            outbound: VecDeque::new(),
            pending_on_dependency: HashMap::new(),
            pending_fragments: HashMap::new(),
            last_sent_at: HashMap::new(),
        }
    }

    /// Build the initial `KNOWN` burst for every CoValue this node currently
    /// has open (§4.8 pt.1). Only the open set, not the full storage set.
    pub fn hello(&mut self, config: &NodeConfig, open: &[(CoValueId, HashMap<SessionId, u64>)]) {
        for (id, sessions) in open {
            self.enqueue(config, SyncMessage::Known(Known { id: *id, header: None, sessions: sessions.clone() }));
        }
    }

    /// Handle an inbound `KNOWN`: update our belief of the peer's state,
    /// then emit `CONTENT` for everything we have that it doesn't and
    /// `LOAD` for everything it has that we don't (§4.8 pt.2).
    #[tracing::instrument(skip(self, node, known))]
    pub async fn handle_known(&mut self, node: &Arc<Node>, config: &NodeConfig, known: Known) -> Result<()> {
        let id = known.id;
        self.note_believed(id, &known.sessions);

        let Some(handle) = node.get(id) else {
            // We do not have this CoValue open at all; nothing to push,
            // and nothing to request until the application asks to load it.
            return Ok(());
        };
        let local_sessions: HashMap<SessionId, u64> = {
            let core = handle.lock();
            core.sessions().map(|(s, log)| (*s, log.len())).collect()
        };
        let (push, load) = diff_known(&local_sessions, &known.sessions);

        if !push.is_empty() {
            let content = build_content(&handle, id, &push, &known.sessions);
            self.enqueue_content(config, content);
        }
        if !load.is_empty() {
            let mut wanted = HashMap::new();
            for session in load {
                wanted.insert(session, known.sessions[&session]);
            }
            self.enqueue(config, SyncMessage::Load(Load { id, sessions: wanted }));
        }
        Ok(())
    }

    /// Handle an inbound `LOAD`: unconditionally push `CONTENT` for every
    /// session we have beyond what the peer named, regardless of our belief
    /// about the peer's state (a direct solicitation overrides it).
    #[tracing::instrument(skip(self, node, load))]
    pub async fn handle_load(&mut self, node: &Arc<Node>, config: &NodeConfig, load: Load) -> Result<()> {
        let Some(handle) = node.get(load.id) else {
            return Ok(());
        };
        let local_sessions: HashMap<SessionId, u64> = {
            let core = handle.lock();
            core.sessions().map(|(s, log)| (*s, log.len())).collect()
        };
        let (push, _) = diff_known(&local_sessions, &load.sessions);
        if !push.is_empty() {
            let content = build_content(&handle, load.id, &push, &load.sessions);
            self.enqueue_content(config, content);
        } else {
            self.enqueue(config, SyncMessage::Done(Done { id: load.id }));
        }
        Ok(())
    }

    /// Handle an inbound `CONTENT`: apply every named session's extension
    /// transactionally (§4.8 pt.3). A session whose account's verifying key
    /// is not yet resolvable surfaces as `UnknownDependency`; the whole
    /// message is buffered keyed by that dependency and a `LOAD` for it is
    /// queued, rather than partially applying the rest.
    #[tracing::instrument(skip(self, node, content))]
    pub async fn handle_content(&mut self, node: &Arc<Node>, config: &NodeConfig, content: Content) -> Result<()> {
        let id = content.id;
        let handle = match node.get(id) {
            Some(handle) => handle,
            None => {
                let Some(header) = content.header.clone() else {
                    self.buffer_on_dependency(config, id, content);
                    return Ok(());
                };
                node.create(header, Vec::new()).await?
            }
        };

        for (session, part) in content.new {
            let verifying_key = match node.verifying_key_for_session(session) {
                Some(key) => key,
                None => {
                    self.buffer_on_dependency(config, session.account, content_of_single(id, session, &part));
                    self.enqueue(config, SyncMessage::Load(Load { id: session.account, sessions: HashMap::new() }));
                    continue;
                }
            };
            let current_len = handle.lock().session_len(session);

            // Merge this fragment into any partial extension already
            // buffered for this session (§4.8 "Backpressure"): a fragmented
            // CONTENT's trailing signature only covers the complete,
            // unfragmented extension, so no individual fragment before the
            // last one verifies on its own.
            let key = (id, session);
            let pending = self.pending_fragments.remove(&key);
            let (from_index, mut transactions) = match pending {
                Some(p) => (p.from_index, p.transactions),
                None => (part.after_index, Vec::new()),
            };
            let expected_after_index = from_index + transactions.len() as u64;

            if from_index != current_len || part.after_index != expected_after_index {
                // Out of order relative to what we have, or doesn't
                // continue the fragment run we were accumulating; drop the
                // stale partial run and request from our own current
                // position instead of applying a gap.
                let mut wanted = HashMap::new();
                wanted.insert(session, current_len);
                self.enqueue(config, SyncMessage::Load(Load { id, sessions: wanted }));
                continue;
            }

            transactions.extend(part.transactions);
            let reached = from_index + transactions.len() as u64;

            if reached < part.final_index {
                self.pending_fragments.insert(key, PendingFragment { from_index, transactions });
                continue;
            }

            handle.lock().ingest_session_batch(
                session,
                from_index,
                transactions,
                part.last_signature,
                &verifying_key,
                node.as_ref(),
            )?;
            self.note_sent(id, session, reached);
        }

        self.replay_buffered(node, config, id).await?;
        Ok(())
    }

    pub fn handle_done(&mut self, _done: Done) {}

    /// Reset a peer's believed known state for `id` to empty, forcing a
    /// fresh `KNOWN` exchange on the next `hello` (§5 "resets the peer's
    /// tracked known state to empty (pessimistic)").
    pub fn reset_on_ack_timeout(&mut self, config: &NodeConfig, id: CoValueId, now: Instant) {
        let Some(sent_at) = self.last_sent_at.get(&id) else { return };
        if now.duration_since(*sent_at).as_millis() as u64 >= config.ack_timeout_millis {
            self.believed.remove(&id);
            self.last_sent_at.remove(&id);
        }
    }

    pub fn drain_outbound(&mut self) -> Vec<SyncMessage> {
        self.outbound.drain(..).collect()
    }

    /// Whether this peer's believed state already has `session` at least at
    /// `len` — used by [`Node`] to decide whether a just-ingested
    /// transaction still needs forwarding to this peer (§4.8 "Multiple
    /// peers").
    pub fn already_has(&self, id: CoValueId, session: SessionId, len: u64) -> bool {
        self.believed
            .get(&id)
            .and_then(|s| s.sessions.get(&session))
            .copied()
            .unwrap_or(0)
            >= len
    }

    /// Queue `content` for this peer, keeping only the sessions our belief
    /// says it doesn't already have — the per-peer half of forwarding a
    /// transaction learned from one peer on to every other (§4.8 "Multiple
    /// peers"). A no-op once every named session is already covered.
    pub fn offer_content(&mut self, config: &NodeConfig, content: Content) {
        let id = content.id;
        let needs_header = !self.believed.get(&id).map(|s| s.has_header).unwrap_or(false);
        let mut filtered = HashMap::new();
        for (session, part) in content.new {
            let reaches = part.after_index + part.transactions.len() as u64;
            if !self.already_has(id, session, reaches) {
                filtered.insert(session, part);
            }
        }
        if filtered.is_empty() {
            return;
        }
        let header = if needs_header { content.header } else { None };
        self.enqueue_content(config, Content { id, header, new: filtered });
    }

    fn note_believed(&mut self, id: CoValueId, sessions: &HashMap<SessionId, u64>) {
        let entry = self.believed.entry(id).or_default();
        entry.has_header = true;
        for (session, &len) in sessions {
            let slot = entry.sessions.entry(*session).or_insert(0);
            if len > *slot {
                *slot = len;
            }
        }
    }

    fn note_sent(&mut self, id: CoValueId, session: SessionId, len: u64) {
        let entry = self.believed.entry(id).or_default();
        let slot = entry.sessions.entry(session).or_insert(0);
        if len > *slot {
            *slot = len;
        }
    }

    fn buffer_on_dependency(&mut self, config: &NodeConfig, dependency: CoValueId, content: Content) {
        self.pending_on_dependency.entry(dependency).or_default().push(content);
        self.enqueue(config, SyncMessage::Load(Load { id: dependency, sessions: HashMap::new() }));
    }

    async fn replay_buffered(&mut self, node: &Arc<Node>, config: &NodeConfig, landed: CoValueId) -> Result<()> {
        let Some(buffered) = self.pending_on_dependency.remove(&landed) else {
            return Ok(());
        };
        for content in buffered {
            Box::pin(self.handle_content(node, config, content)).await?;
        }
        Ok(())
    }

    /// Enqueue an outbound message, applying backpressure once the queue
    /// passes `sync_high_water_mark`: queued `KNOWN`s for the same ID
    /// coalesce to the latest, and `CONTENT` is split into fragments of at
    /// most `content_fragment_size` transactions (§4.8 "Backpressure").
    fn enqueue(&mut self, config: &NodeConfig, msg: SyncMessage) {
        if self.outbound.len() < config.sync_high_water_mark {
            self.outbound.push_back(msg);
            return;
        }
        match msg {
            SyncMessage::Known(known) => {
                if let Some(slot) = self.outbound.iter_mut().find(|existing| {
                    matches!(existing, SyncMessage::Known(k) if k.id == known.id)
                }) {
                    *slot = SyncMessage::Known(known);
                } else {
                    self.outbound.push_back(SyncMessage::Known(known));
                }
            }
            other => self.outbound.push_back(other),
        }
    }

    fn enqueue_content(&mut self, config: &NodeConfig, content: Content) {
        let id = content.id;
        self.last_sent_at.insert(id, Instant::now());
        if self.outbound.len() < config.sync_high_water_mark {
            self.enqueue(config, SyncMessage::Content(content));
            return;
        }
        for (session, part) in content.new {
            let fragments = fragment_session(part, config.content_fragment_size);
            for fragment in fragments {
                let mut new = HashMap::new();
                new.insert(session, fragment);
                self.enqueue(
                    config,
                    SyncMessage::Content(Content { id, header: content.header.clone(), new }),
                );
            }
        }
    }
}

impl Default for PeerSyncState {
    fn default() -> Self {
        Self::new()
    }
}

fn build_content(
    handle: &crate::node::CoValueHandle,
    id: CoValueId,
    sessions: &[SessionId],
    peer_known: &HashMap<SessionId, u64>,
) -> Content {
    let core = handle.lock();
    let mut new = HashMap::new();
    for session in sessions {
        let after_index = peer_known.get(session).copied().unwrap_or(0);
        let Some(log) = core.session_log(*session) else { continue };
        let transactions = log.transactions_after(after_index).to_vec();
        if transactions.is_empty() {
            continue;
        }
        let Some(last_signature) = log.last_signature() else { continue };
        let final_index = after_index + transactions.len() as u64;
        new.insert(
            *session,
            SessionContent {
                after_index,
                transactions,
                last_signature,
                final_index,
            },
        );
    }
    let header = if peer_known.is_empty() { Some(core.header().clone()) } else { None };
    Content { id, header, new }
}

fn content_of_single(id: CoValueId, session: SessionId, part: &SessionContent) -> Content {
    let mut new = HashMap::new();
    new.insert(session, part.clone());
    Content { id, header: None, new }
}

/// Split one session extension into fragments of at most `fragment_size`
/// transactions each (§4.8 "Backpressure"). Every fragment carries the same
/// `final_index` — the length the *complete* extension reaches — and the
/// same `last_signature`, since that signature is the sender's one signature
/// over the whole extension and cannot be decomposed per fragment; only the
/// fragment whose own reach equals `final_index` is verifiable on its own,
/// and [`PeerSyncState::handle_content`] buffers the earlier ones until it
/// arrives.
fn fragment_session(part: SessionContent, fragment_size: usize) -> Vec<SessionContent> {
    if part.transactions.len() <= fragment_size {
        return vec![part];
    }
    let final_index = part.final_index;
    part.transactions
        .chunks(fragment_size)
        .enumerate()
        .map(|(i, chunk)| SessionContent {
            after_index: part.after_index + (i * fragment_size) as u64,
            transactions: chunk.to_vec(),
            last_signature: part.last_signature,
            final_index,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_known_finds_both_directions() {
        let acc = cojson_core::ids::CoValueId(cojson_core::crypto::hash::hash(b"acc"));
        let s1 = SessionId::new(acc, 1);
        let s2 = SessionId::new(acc, 2);
        let mut local = HashMap::new();
        local.insert(s1, 5);
        let mut remote = HashMap::new();
        remote.insert(s1, 2);
        remote.insert(s2, 3);

        let (push, load) = diff_known(&local, &remote);
        assert_eq!(push, vec![s1]);
        assert_eq!(load, vec![s2]);
    }

    #[test]
    fn fragment_session_splits_on_boundary() {
        let sig = cojson_core::crypto::signing::Ed25519Signature([0u8; 64]);
        let part = SessionContent {
            after_index: 0,
            transactions: vec![
                cojson_journal::Transaction::trusting(cojson_core::time::MadeAt(1), vec![]),
                cojson_journal::Transaction::trusting(cojson_core::time::MadeAt(2), vec![]),
                cojson_journal::Transaction::trusting(cojson_core::time::MadeAt(3), vec![]),
            ],
            last_signature: sig,
            final_index: 3,
        };
        let fragments = fragment_session(part, 2);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].transactions.len(), 2);
        assert_eq!(fragments[1].after_index, 2);
        assert_eq!(fragments[1].transactions.len(), 1);
        assert!(fragments.iter().all(|f| f.final_index == 3));
    }

    /// Reproduces the fragmentation bug directly: feeding the fragments
    /// `fragment_session` produces through `handle_content` one at a time
    /// must reconstruct the original session, not fail signature/chain
    /// checks on the earlier fragments (§4.8 "Backpressure").
    #[tokio::test]
    async fn fragmented_content_reassembles_through_handle_content() {
        use crate::node::{AccountIdentity, Node};
        use cojson_core::crypto::hash::hash;
        use cojson_core::crypto::DefaultCryptoProvider;
        use cojson_core::ids::CoValueId as Id;
        use cojson_journal::CoValueType;
        use cojson_store::MemoryStore;

        let crypto = DefaultCryptoProvider;
        let writer_account = Id(hash(b"fragment-writer"));
        let writer_identity = AccountIdentity::generate(&crypto, writer_account, 1);
        let writer_session = writer_identity.session;
        let writer = Node::new(writer_identity, Arc::new(MemoryStore::new()), NodeConfig::default());
        let writer_account_handle = writer.bootstrap_account(Id(hash(b"profile"))).await.unwrap();

        let header = cojson_journal::CoValueHeader::new(
            CoValueType::Comap,
            Ruleset::UnsafeAllowAll,
            serde_json::json!({}),
            1,
            "fragment-test".into(),
        );
        let handle = writer.create(header, Vec::new()).await.unwrap();
        let id = handle.lock().id();
        let content_header = handle.lock().header().clone();
        for i in 0..5u32 {
            writer
                .write(&handle, vec![serde_json::json!({"op": "set", "key": format!("k{i}"), "value": i})])
                .await
                .unwrap();
        }

        let full = {
            let core = handle.lock();
            let log = core.session_log(writer_session).expect("writer session must exist after create");
            let transactions = log.transactions_after(0).to_vec();
            let last_signature = log.last_signature().expect("each write() call signs its batch");
            SessionContent {
                after_index: 0,
                final_index: transactions.len() as u64,
                transactions,
                last_signature,
            }
        };

        let fragments = fragment_session(full, 2);
        assert!(fragments.len() > 1, "test setup should produce more than one fragment");

        let reader_account = Id(hash(b"fragment-reader"));
        let reader_identity = AccountIdentity::generate(&crypto, reader_account, 1);
        let reader = Node::new(reader_identity, Arc::new(MemoryStore::new()), NodeConfig::default());
        reader.adopt(writer_account_handle);

        let mut state = PeerSyncState::new();
        let config = NodeConfig::default();

        for fragment in fragments {
            let mut new = HashMap::new();
            new.insert(writer_session, fragment);
            let content = Content { id, header: Some(content_header.clone()), new };
            state.handle_content(&reader, &config, content).await.unwrap();
        }

        let reader_handle = reader.get(id).expect("reader must have created the CoValue from the header");
        assert_eq!(reader_handle.lock().session_len(writer_session), 5);
    }

    #[test]
    fn already_has_reflects_noted_state() {
        let mut state = PeerSyncState::new();
        let acc = cojson_core::ids::CoValueId(cojson_core::crypto::hash::hash(b"acc"));
        let id = cojson_core::ids::CoValueId(cojson_core::crypto::hash::hash(b"cv"));
        let session = SessionId::new(acc, 1);
        assert!(!state.already_has(id, session, 1));
        state.note_sent(id, session, 3);
        assert!(state.already_has(id, session, 3));
        assert!(!state.already_has(id, session, 4));
    }
}
