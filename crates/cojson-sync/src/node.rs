//! The process-wide node: the CoValueCore registry, load/create, and the
//! `GroupResolver` wiring that lets a core validate transactions against a
//! group it does not itself own (§4.7).
//!
//! Cores are kept behind a weak-reference registry (§9 "Cyclic references"):
//! the registry never holds a strong reference to a core, only the handles
//! callers are holding do. Once the last handle for a CoValue drops, the
//! weak entry starts returning `None` and the next `load` repopulates it
//! from storage.

use crate::peer::PeerSyncState;
use cojson_authorization::Role;
use cojson_core::config::NodeConfig;
use cojson_core::crypto::sealing::{SealingKeypair, SealingSecretKey};
use cojson_core::crypto::signing::{SigningKeypair, SigningPublicKey};
use cojson_core::crypto::symmetric::SymmetricKey;
use cojson_core::crypto::{CryptoProvider, DefaultCryptoProvider};
use cojson_core::error::{CoJsonError, Result};
use cojson_core::ids::{AccountId, CoValueId, GroupId, KeyEpochId, SessionId};
use cojson_core::time::{CausalKey, MadeAt};
use cojson_journal::core::GroupResolver;
use cojson_journal::{AccountContent, CoValueCore, CoValueHeader, CoValueType, Ruleset, Transaction};
use cojson_store::Storage;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

/// A shared, lockable handle to one CoValue's complete state. The registry
/// stores only a [`Weak`] pointer to this; callers that want a CoValue kept
/// alive hold their own clone.
pub type CoValueHandle = Arc<Mutex<CoValueCore>>;

/// This node's own account identity: the keys every transaction it writes
/// is signed/sealed under, and the session it writes through.
pub struct AccountIdentity {
    pub account: AccountId,
    pub signing: SigningKeypair,
    pub sealing: SealingKeypair,
    pub session: SessionId,
}

impl AccountIdentity {
    /// A fresh, unregistered identity — used for `Node::bootstrap_account`
    /// or tests that do not need a pre-existing account CoValue.
    pub fn generate(crypto: &dyn CryptoProvider, account: AccountId, session_counter: u64) -> Self {
        Self {
            account,
            signing: crypto.signing_keypair(),
            sealing: crypto.sealing_keypair(),
            session: SessionId::new(account, session_counter),
        }
    }
}

#[derive(Default)]
struct Registry {
    cores: HashMap<CoValueId, Weak<Mutex<CoValueCore>>>,
}

impl Registry {
    fn get(&self, id: CoValueId) -> Option<CoValueHandle> {
        self.cores.get(&id).and_then(Weak::upgrade)
    }

    fn insert(&mut self, id: CoValueId, handle: &CoValueHandle) {
        self.cores.insert(id, Arc::downgrade(handle));
    }
}

thread_local! {
    /// Groups currently being resolved on this thread, guarding against a
    /// cyclic `parentGroup` chain turning [`Node::effective_role`]'s
    /// recursion into infinite regress (§9's cyclic-reference note, applied
    /// to group inheritance rather than CoValue references).
    static RESOLVING: RefCell<HashSet<GroupId>> = RefCell::new(HashSet::new());
}

/// Process-wide state: one CoValueCore registry, one storage backend, one
/// local identity (§4.7). Always held behind an `Arc` since the
/// `GroupResolver` closures `CoValueCore` calls back into need a stable
/// address to recurse through.
pub struct Node {
    identity: AccountIdentity,
    storage: Arc<dyn Storage>,
    crypto: Arc<dyn CryptoProvider>,
    config: NodeConfig,
    registry: Mutex<Registry>,
    peers: Mutex<HashMap<String, PeerSyncState>>,
}

impl Node {
    pub fn new(identity: AccountIdentity, storage: Arc<dyn Storage>, config: NodeConfig) -> Arc<Self> {
        Self::with_crypto(identity, storage, config, Arc::new(DefaultCryptoProvider))
    }

    /// As [`Self::new`], substituting a non-default [`CryptoProvider`] — the
    /// seam the provider's own doc comment advertises ("an HSM-backed or
    /// WASM-targeted provider can be substituted without touching
    /// `cojson-journal` or `cojson-sync`").
    pub fn with_crypto(
        identity: AccountIdentity,
        storage: Arc<dyn Storage>,
        config: NodeConfig,
        crypto: Arc<dyn CryptoProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity,
            storage,
            crypto,
            config,
            registry: Mutex::new(Registry::default()),
            peers: Mutex::new(HashMap::new()),
        })
    }

    pub fn account_id(&self) -> AccountId {
        self.identity.account
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn identity(&self) -> &AccountIdentity {
        &self.identity
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Register a duplex peer under `peer_id`, starting its `KNOWN`
    /// exchange empty (§4.8 pt.1 happens once the caller drives
    /// [`crate::peer::PeerSyncState`] over the peer's byte stream).
    pub fn add_peer(&self, peer_id: impl Into<String>) {
        let peer_id = peer_id.into();
        self.peers
            .lock()
            .entry(peer_id)
            .or_insert_with(PeerSyncState::new);
    }

    pub fn remove_peer(&self, peer_id: &str) {
        self.peers.lock().remove(peer_id);
    }

    /// Route one inbound message from `from_peer` through its
    /// [`PeerSyncState`], then offer any `CONTENT` it carried to every
    /// other registered peer (§4.8 "Multiple peers": a transaction learned
    /// from one peer is forwarded to all peers that do not yet have it).
    /// Returns the messages `from_peer` should now be sent.
    pub async fn dispatch_peer_message(
        self: &Arc<Self>,
        from_peer: &str,
        msg: crate::wire::SyncMessage,
    ) -> Result<Vec<crate::wire::SyncMessage>> {
        use crate::wire::SyncMessage;

        let forwardable = match &msg {
            SyncMessage::Content(content) => Some(content.clone()),
            _ => None,
        };

        match msg {
            SyncMessage::Known(known) => self.handle_known_for(from_peer, known).await?,
            SyncMessage::Content(content) => self.handle_content_for(from_peer, content).await?,
            SyncMessage::Load(load) => self.handle_load_for(from_peer, load).await?,
            SyncMessage::Done(done) => {
                let mut peers = self.peers.lock();
                peers.entry(from_peer.to_string()).or_insert_with(PeerSyncState::new).handle_done(done);
            }
        }

        if let Some(content) = forwardable {
            let mut peers = self.peers.lock();
            for (peer_id, state) in peers.iter_mut() {
                if peer_id != from_peer {
                    state.offer_content(&self.config, content.clone());
                }
            }
        }

        Ok(self.peers.lock().get_mut(from_peer).map(|s| s.drain_outbound()).unwrap_or_default())
    }

    async fn handle_known_for(self: &Arc<Self>, peer_id: &str, known: crate::wire::Known) -> Result<()> {
        let config = self.config.clone();
        let mut state = {
            let mut peers = self.peers.lock();
            peers.remove(peer_id).unwrap_or_else(PeerSyncState::new)
        };
        let result = state.handle_known(self, &config, known).await;
        self.peers.lock().insert(peer_id.to_string(), state);
        result
    }

    async fn handle_content_for(self: &Arc<Self>, peer_id: &str, content: crate::wire::Content) -> Result<()> {
        let config = self.config.clone();
        let mut state = {
            let mut peers = self.peers.lock();
            peers.remove(peer_id).unwrap_or_else(PeerSyncState::new)
        };
        let result = state.handle_content(self, &config, content).await;
        self.peers.lock().insert(peer_id.to_string(), state);
        result
    }

    async fn handle_load_for(self: &Arc<Self>, peer_id: &str, load: crate::wire::Load) -> Result<()> {
        let config = self.config.clone();
        let mut state = {
            let mut peers = self.peers.lock();
            peers.remove(peer_id).unwrap_or_else(PeerSyncState::new)
        };
        let result = state.handle_load(self, &config, load).await;
        self.peers.lock().insert(peer_id.to_string(), state);
        result
    }

    /// Release this node's registry. Handles already held by callers are
    /// unaffected; their cores simply stop being discoverable by `load`
    /// (§4.7 `close()`).
    pub fn close(&self) {
        self.registry.lock().cores.clear();
        self.peers.lock().clear();
    }

    /// Resolve a CoValue's handle, materializing it from storage the first
    /// time and from the weak cache afterward (§4.7 `load(id) → handle`).
    #[tracing::instrument(skip(self))]
    pub async fn load(self: &Arc<Self>, id: CoValueId) -> Result<CoValueHandle> {
        if let Some(handle) = self.registry.lock().get(id) {
            return Ok(handle);
        }

        let Some(stored) = self.storage.read_covalue(id).await? else {
            return Err(CoJsonError::unknown_dependency(format!("{id} has no stored header")));
        };

        let mut core = CoValueCore::new(stored.header)?;
        for (session, log) in stored.sessions {
            core.ingest_session_batch(
                session,
                0,
                log.transactions,
                log.last_signature,
                &self.verifying_key_for(session)?,
                self.as_ref(),
            )?;
        }

        let handle: CoValueHandle = Arc::new(Mutex::new(core));
        self.registry.lock().insert(id, &handle);
        Ok(handle)
    }

    /// As [`Self::load`], but returns the existing in-memory handle without
    /// touching storage if one is already registered.
    pub fn get(&self, id: CoValueId) -> Option<CoValueHandle> {
        self.registry.lock().get(id)
    }

    /// Register a CoValue obtained through some already-trusted channel
    /// (an invite link, a prior introduction) into this node's own
    /// registry. Ordinary session sync can only resolve a signer's
    /// verifying key once that signer's own account CoValue is already
    /// registered here (see [`Self::verifying_key_for`]), so a newly met
    /// peer's account has to arrive this way before its sessions can be
    /// verified over the wire.
    pub fn adopt(&self, handle: CoValueHandle) -> CoValueId {
        let id = handle.lock().id();
        self.registry.lock().insert(id, &handle);
        id
    }

    /// Create a new CoValue, persist its header, and — if `initial_changes`
    /// is non-empty — append one trusting transaction from this node's own
    /// identity in the same batch (§4.7 `create(header, initialTransactions)
    /// → handle`, §4.5 account/group bootstrapping).
    #[tracing::instrument(skip(self, initial_changes))]
    pub async fn create(
        self: &Arc<Self>,
        header: CoValueHeader,
        initial_changes: Vec<serde_json::Value>,
    ) -> Result<CoValueHandle> {
        let mut core = CoValueCore::new(header.clone())?;
        let id = core.id();
        self.storage.write_header(id, &header).await?;

        if !initial_changes.is_empty() {
            let tx = Transaction::trusting(MadeAt::now(), initial_changes);
            let txs = vec![tx];
            let hash = core.next_batch_hash(self.identity.session, &txs)?;
            let signature = self.identity.signing.secret.sign(hash.as_bytes());
            self.storage
                .write_transactions(id, self.identity.session, 0, &txs, signature)
                .await?;
            core.ingest_session_batch(self.identity.session, 0, txs, signature, &self.identity.signing.public, self.as_ref())?;
        }

        let handle: CoValueHandle = Arc::new(Mutex::new(core));
        self.registry.lock().insert(id, &handle);
        Ok(handle)
    }

    /// Create this node's own account CoValue: a self-governing (`group`
    /// ruleset) CoMap carrying a self-admin grant plus its public keys and
    /// profile reference (§3 "Account", §4.5 bootstrapping).
    pub async fn bootstrap_account(self: &Arc<Self>, profile: CoValueId) -> Result<CoValueHandle> {
        let header = CoValueHeader::new(
            CoValueType::Account,
            Ruleset::Group,
            serde_json::json!({}),
            MadeAt::now().0,
            bs58_random_uniqueness(self.crypto.as_ref()),
        );
        let changes = cojson_journal::account::initial_account_changes(
            self.identity.account,
            &self.identity.signing.public,
            &self.identity.sealing.public,
            profile,
        );
        self.create(header, changes).await
    }

    /// Append a batch of `changes` to this CoValue from this node's own
    /// identity/session, persisting to storage before ingesting locally so
    /// a crash between the two never leaves storage ahead of the in-memory
    /// view (§4.9's monotonic-durability contract).
    #[tracing::instrument(skip(self, handle, changes))]
    pub async fn write(self: &Arc<Self>, handle: &CoValueHandle, changes: Vec<serde_json::Value>) -> Result<()> {
        let tx = Transaction::trusting(MadeAt::now(), changes);
        let txs = vec![tx];
        let (id, from_index, hash) = {
            let core = handle.lock();
            let from_index = core.session_len(self.identity.session);
            let hash = core.next_batch_hash(self.identity.session, &txs)?;
            (core.id(), from_index, hash)
        };
        let signature = self.identity.signing.secret.sign(hash.as_bytes());
        self.storage
            .write_transactions(id, self.identity.session, from_index, &txs, signature)
            .await?;
        handle
            .lock()
            .ingest_session_batch(self.identity.session, from_index, txs, signature, &self.identity.signing.public, self.as_ref())?;
        Ok(())
    }

    /// Look up the verifying key for whichever account owns `session`, by
    /// loading that account's own CoValue (§4.2 "a verifying key is
    /// locatable from the session ID alone"). Falls back to the session's
    /// signature itself being self-describing only once the account CoValue
    /// is loaded; an account not yet known locally surfaces as
    /// `UnknownDependency`, the same disposition §7 gives any other missing
    /// header.
    fn verifying_key_for(&self, session: SessionId) -> Result<SigningPublicKey> {
        let handle = self
            .registry
            .lock()
            .get(session.account)
            .ok_or_else(|| CoJsonError::unknown_dependency(format!("account {} not loaded", session.account)))?;
        let core = handle.lock();
        let content = AccountContent::new(core.view().as_map().ok_or_else(|| {
            CoJsonError::invalid(format!("account {} view is not a map", session.account))
        })?);
        content
            .signing_public_key()
            .ok_or_else(|| CoJsonError::invalid(format!("account {} has no signing key set", session.account)))
    }

    /// As [`Self::verifying_key_for`], but surfaced to [`crate::peer`] as an
    /// `Option`: there, a not-yet-loaded signer account is an ordinary
    /// "buffer this and `LOAD` the dependency" case, not a hard error.
    pub(crate) fn verifying_key_for_session(&self, session: SessionId) -> Option<SigningPublicKey> {
        self.verifying_key_for(session).ok()
    }
}

fn bs58_random_uniqueness(crypto: &dyn CryptoProvider) -> String {
    bs58::encode(crypto.random_bytes(16)).into_string()
}

impl GroupResolver for Node {
    fn effective_role(&self, group: GroupId, account: AccountId, cutoff: CausalKey) -> Role {
        let already_resolving = RESOLVING.with(|r| !r.borrow_mut().insert(group));
        if already_resolving {
            return Role::Revoked;
        }
        let result = (|| {
            let Some(handle) = self.registry.lock().get(group) else {
                return Role::Revoked;
            };
            let core = handle.lock();
            if !matches!(core.header().ruleset, Ruleset::Group) {
                return Role::Revoked;
            }
            let entries = core.as_group_entries(self);
            let fold = cojson_authorization::fold_group(&entries, Some(cutoff));
            cojson_authorization::effective_role_with_inheritance(&fold, account, |parent| {
                Some(self.effective_role(parent, account, cutoff))
            })
        })();
        RESOLVING.with(|r| {
            r.borrow_mut().remove(&group);
        });
        result
    }

    fn read_key(&self, group: GroupId, epoch: KeyEpochId) -> Option<SymmetricKey> {
        let handle = self.registry.lock().get(group)?;
        let core = handle.lock();
        let entries = core.as_group_entries(self);
        let fold = cojson_authorization::fold_group(&entries, None);
        let blob_value = fold.sealed_key_for(self.identity.account, epoch.0)?;
        let blob: cojson_authorization::SealedKeyBlob = serde_json::from_value(blob_value.clone()).ok()?;
        cojson_authorization::unseal_key_for_member(&blob, group, epoch, self.identity.account, &self.sealing_secret())
    }
}

impl Node {
    fn sealing_secret(&self) -> SealingSecretKey {
        self.identity.sealing.secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cojson_core::crypto::hash::hash;
    use cojson_core::ids::CoValueId as Id;
    use cojson_store::MemoryStore;

    fn node_with_fresh_identity() -> Arc<Node> {
        let crypto = DefaultCryptoProvider;
        let account = Id(hash(b"node-account"));
        let identity = AccountIdentity::generate(&crypto, account, 1);
        Node::new(identity, Arc::new(MemoryStore::new()), NodeConfig::default())
    }

    #[tokio::test]
    async fn create_then_load_round_trips_from_storage() {
        let node = node_with_fresh_identity();
        let header = CoValueHeader::new(
            CoValueType::Comap,
            Ruleset::UnsafeAllowAll,
            serde_json::json!({}),
            1,
            "u".into(),
        );
        let handle = node
            .create(header, vec![serde_json::json!({"op": "set", "key": "a", "value": 1})])
            .await
            .unwrap();
        let id = handle.lock().id();

        node.close();
        let reloaded = node.load(id).await;
        // Reloading needs the writer's own account CoValue to recover a
        // verifying key; a freshly generated test identity never persisted
        // one, so this is expected to surface as an unknown dependency
        // rather than to silently accept an unverifiable session.
        assert!(reloaded.is_err());
        assert_eq!(handle.lock().view().as_map().unwrap().get("a"), Some(&serde_json::json!(1)));
    }

    #[tokio::test]
    async fn bootstrap_account_grants_self_admin() {
        let node = node_with_fresh_identity();
        let profile = Id(hash(b"profile"));
        let handle = node.bootstrap_account(profile).await.unwrap();
        let core = handle.lock();
        let map = core.view().as_map().unwrap();
        assert_eq!(map.get(&node.account_id().to_string()), Some(&serde_json::json!("admin")));
        let content = AccountContent::new(map);
        assert_eq!(content.signing_public_key(), Some(node.identity().signing.public));
    }

    #[test]
    fn effective_role_is_revoked_for_unloaded_group() {
        let node = node_with_fresh_identity();
        let group = Id(hash(b"nope"));
        let account = Id(hash(b"whoever"));
        let cutoff = CausalKey::new(MadeAt(1), SessionId::new(account, 1), 0);
        assert_eq!(node.effective_role(group, account, cutoff), Role::Revoked);
    }
}
