//! `CoValueCore`: owns one CoValue's complete state (§4.4).
//!
//! Ingest appends to the relevant session log (all-or-nothing, §4.3),
//! validates each newly committed transaction against the governing
//! group's permissions (§4.5), decrypts private payloads, folds the
//! authorized/decrypted subset into a materialized view, and notifies
//! subscribers synchronously.

use crate::header::{CoValueHeader, CoValueType, Ruleset};
use crate::kinds::{colist, comap, coplaintext, costream, Applied};
use crate::session_log::SessionLog;
use crate::transaction::Transaction;
use cojson_authorization::Role;
use cojson_core::crypto::signing::{Ed25519Signature, SigningPublicKey};
use cojson_core::crypto::symmetric::SymmetricKey;
use cojson_core::error::Result;
use cojson_core::ids::{AccountId, CoValueId, GroupId, KeyEpochId, SessionId, TransactionId};
use cojson_core::time::{CausalKey, MadeAt};
use std::collections::HashMap;
use std::sync::Arc;

/// The materialized view of a CoValue, tagged by kind (§1 "Dynamic dispatch
/// across CoValue kinds").
pub enum View {
    Map(comap::CoMapFold),
    List(colist::CoListFold),
    Stream(costream::CoStreamFold),
    PlainText(coplaintext::CoPlainTextFold),
}

impl View {
    pub fn as_map(&self) -> Option<&comap::CoMapFold> {
        match self {
            View::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&colist::CoListFold> {
        match self {
            View::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&costream::CoStreamFold> {
        match self {
            View::Stream(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_plaintext(&self) -> Option<&coplaintext::CoPlainTextFold> {
        match self {
            View::PlainText(p) => Some(p),
            _ => None,
        }
    }
}

/// Supplied by the node/registry layer (§4.7): resolves a governing group's
/// effective role for an account at a causal position, and a group's
/// sealed symmetric key for a given epoch. Kept out of `cojson-journal`'s
/// own dependency graph on the registry to avoid a cycle — `CoValueCore`
/// only needs this narrow capability, not the whole node.
pub trait GroupResolver {
    fn effective_role(&self, group: GroupId, account: AccountId, cutoff: CausalKey) -> Role;
    fn read_key(&self, group: GroupId, epoch: KeyEpochId) -> Option<SymmetricKey>;
}

/// A resolver for CoValues whose ruleset is `unsafeAllowAll` (account
/// bootstrapping, §4.5): every account may always write, and there is
/// never a private transaction to decrypt.
pub struct AllowAllResolver;

impl GroupResolver for AllowAllResolver {
    fn effective_role(&self, _group: GroupId, _account: AccountId, _cutoff: CausalKey) -> Role {
        Role::Admin
    }

    fn read_key(&self, _group: GroupId, _epoch: KeyEpochId) -> Option<SymmetricKey> {
        None
    }
}

type Listener = Arc<dyn Fn(&View) + Send + Sync>;

pub struct CoValueCore {
    id: CoValueId,
    header: CoValueHeader,
    sessions: HashMap<SessionId, SessionLog>,
    cache: Option<View>,
    dirty: bool,
    subscribers: Vec<(u64, Listener)>,
    next_subscriber_id: u64,
}

fn empty_view(ty: CoValueType) -> View {
    match ty {
        CoValueType::Comap | CoValueType::Account | CoValueType::Group => View::Map(comap::fold_comap(Vec::new())),
        CoValueType::Colist => View::List(colist::fold_colist(Vec::new())),
        CoValueType::Costream => View::Stream(costream::fold_costream(Vec::new())),
        CoValueType::Coplaintext => View::PlainText(coplaintext::fold_coplaintext(Vec::new())),
    }
}

fn required_role(header: &CoValueHeader) -> Role {
    // Self-governing CoValues (groups and accounts) require admin to change
    // their own membership map; everything else just needs write access
    // (§4.4 pt.2).
    if matches!(header.ruleset, Ruleset::Group) {
        Role::Admin
    } else {
        Role::Writer
    }
}

impl CoValueCore {
    pub fn new(header: CoValueHeader) -> Result<Self> {
        let id = header.id()?;
        let ty = header.ty;
        Ok(Self {
            id,
            header,
            sessions: HashMap::new(),
            cache: Some(empty_view(ty)),
            dirty: false,
            subscribers: Vec::new(),
            next_subscriber_id: 0,
        })
    }

    pub fn id(&self) -> CoValueId {
        self.id
    }

    pub fn header(&self) -> &CoValueHeader {
        &self.header
    }

    /// A session's current length, or 0 if the session has never written.
    /// Writers use this to compute the `from_index` of their next batch.
    pub fn session_len(&self, session: SessionId) -> u64 {
        self.sessions.get(&session).map(|log| log.len()).unwrap_or(0)
    }

    pub fn session_log(&self, session: SessionId) -> Option<&SessionLog> {
        self.sessions.get(&session)
    }

    /// The chain hash a writer must sign to append `pending` to `session`,
    /// whether or not that session has ever written before (§4.3). Lets a
    /// writer derive its signature ahead of calling
    /// [`Self::ingest_session_batch`].
    pub fn next_batch_hash(&self, session: SessionId, pending: &[Transaction]) -> Result<cojson_core::crypto::hash::Digest> {
        match self.sessions.get(&session) {
            Some(log) => log.hash_after(pending),
            None => SessionLog::new(self.id, session).hash_after(pending),
        }
    }

    pub fn sessions(&self) -> impl Iterator<Item = (&SessionId, &SessionLog)> {
        self.sessions.iter()
    }

    /// The group a transaction's permissions are checked against: this
    /// CoValue itself when self-governing, the referenced group when
    /// `ownedByGroup`, or `None` for `unsafeAllowAll` (§4.5).
    pub fn governing_group(&self) -> Option<GroupId> {
        match &self.header.ruleset {
            Ruleset::Group => Some(self.id),
            Ruleset::OwnedByGroup { group } => Some(*group),
            Ruleset::UnsafeAllowAll => None,
        }
    }

    /// Append a batch of transactions to `session`'s log (§4.3, §4.4 pt.1)
    /// and refresh the materialized view. All-or-nothing at the chain/
    /// signature level; authorization and decryption are evaluated
    /// per-transaction and may exclude individual transactions from the
    /// view without failing the ingest (§4.4 pt.3, pt.4).
    #[tracing::instrument(skip_all, fields(covalue = %self.id, session = %session))]
    pub fn ingest_session_batch(
        &mut self,
        session: SessionId,
        from_index: u64,
        transactions: Vec<Transaction>,
        signature: Ed25519Signature,
        verifying_key: &SigningPublicKey,
        resolver: &dyn GroupResolver,
    ) -> Result<()> {
        let covalue_id = self.id;
        let log = self
            .sessions
            .entry(session)
            .or_insert_with(|| SessionLog::new(covalue_id, session));
        log.append_batch(from_index, transactions, signature, verifying_key)?;
        self.dirty = true;
        self.recompute(resolver);
        Ok(())
    }

    /// Force a recompute and notification even if nothing was just
    /// ingested — used when a referenced group's own state changes and
    /// this CoValue's previously-unauthorized or undecryptable
    /// transactions might now resolve (§4.4 pt.3 "unlocks retroactively").
    pub fn invalidate_and_recompute(&mut self, resolver: &dyn GroupResolver) {
        self.dirty = true;
        self.recompute(resolver);
    }

    /// A group CoValue validates its own membership changes against its own
    /// prior content (§4.5, §1 "a capability system whose state is itself a
    /// CoValue whose rules are interpreted while validating other
    /// CoValues"). Calling back into the resolver for a self-governing
    /// group's own ID would re-enter this same core's lock, so this case is
    /// handled here directly: transactions are processed in causal order,
    /// each checked against an incrementally-grown fold of the entries
    /// already accepted before it.
    fn collect_applied(&self, resolver: &dyn GroupResolver, time_cutoff: Option<MadeAt>) -> Vec<Applied> {
        let group = self.governing_group();
        let required = required_role(&self.header);
        let is_self_group = matches!(self.header.ruleset, Ruleset::Group);

        struct Candidate<'a> {
            session: SessionId,
            causal_key: CausalKey,
            tx_id: TransactionId,
            tx: &'a Transaction,
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for (session, log) in &self.sessions {
            for index in 0..log.len() {
                let tx = log.transaction_at(index).expect("index within len");
                if let Some(cutoff) = time_cutoff {
                    if tx.made_at > cutoff {
                        continue;
                    }
                }
                candidates.push(Candidate {
                    session: *session,
                    causal_key: CausalKey::new(tx.made_at, *session, index),
                    tx_id: TransactionId::new(*session, index),
                    tx,
                });
            }
        }
        candidates.sort_by_key(|c| c.causal_key);

        let mut applied = Vec::new();
        let mut self_entries: Vec<cojson_authorization::GroupEntry> = Vec::new();

        for c in candidates {
            let role = if is_self_group {
                let fold = cojson_authorization::fold_group(&self_entries, None);
                cojson_authorization::effective_role_with_inheritance(&fold, c.session.account, |parent| {
                    Some(resolver.effective_role(parent, c.session.account, c.causal_key))
                })
            } else {
                match group {
                    Some(g) => resolver.effective_role(g, c.session.account, c.causal_key),
                    None => Role::Admin,
                }
            };
            let authorized = if required == Role::Admin { role.can_admin() } else { role.can_write() };
            // A self-governing group/account has no admin until its first
            // transaction grants one; that transaction is trusted
            // unconditionally, the same way a genesis block needs no prior
            // block to authorize it (§4.5 account/group bootstrapping).
            let is_founding_transaction = is_self_group && self_entries.is_empty();

            let key = c.tx.key_used.and_then(|epoch| group.and_then(|g| resolver.read_key(g, epoch)));
            let Some(changes) = c.tx.decode_changes(key.as_ref(), c.tx_id) else {
                continue; // KeyUnavailable or tamper: retained, excluded from the view.
            };

            let passed = authorized
                || is_founding_transaction
                || (is_self_group && self.recognizes_invite_redemption(&self_entries, c.session.account, &changes));
            if !passed {
                continue;
            }

            for (op_index, op) in changes.into_iter().enumerate() {
                if is_self_group {
                    if let Some((key, Some(value))) = comap::extract_key_value(&op) {
                        self_entries.push(cojson_authorization::GroupEntry {
                            key,
                            value,
                            causal_key: c.causal_key,
                        });
                    }
                }
                applied.push(Applied {
                    id: c.tx_id,
                    causal_key: c.causal_key,
                    op_index: op_index as u32,
                    op,
                });
            }
        }
        applied
    }

    /// Whether `changes` is exactly the self-insertion swap an invite
    /// redemption is allowed to make for `redeemer`, against any invite
    /// currently recorded in `entries` (§4.5).
    fn recognizes_invite_redemption(
        &self,
        entries: &[cojson_authorization::GroupEntry],
        redeemer: AccountId,
        changes: &[serde_json::Value],
    ) -> bool {
        let fold = cojson_authorization::fold_group(entries, None);
        let group_changes: Vec<cojson_authorization::GroupChange> = changes
            .iter()
            .filter_map(|op| {
                let (key, value) = comap::extract_key_value(op)?;
                let role = value.as_ref().and_then(|v| v.as_str()).and_then(|s| s.parse().ok());
                Some(cojson_authorization::GroupChange { key, value_is_role: role })
            })
            .collect();
        entries.iter().any(|e| {
            matches!(
                cojson_authorization::GroupKey::parse(&e.key),
                cojson_authorization::GroupKey::Invite { secret, role: invite_role }
                    if cojson_authorization::recognize_invite_redemption(&fold, redeemer, &secret, &group_changes)
                        == Some(invite_role.parse().unwrap_or(Role::Revoked))
            )
        })
    }

    fn recompute(&mut self, resolver: &dyn GroupResolver) {
        if !self.dirty {
            return;
        }
        let applied = self.collect_applied(resolver, None);
        self.cache = Some(self.fold(applied));
        self.dirty = false;
        self.notify();
    }

    fn fold(&self, applied: Vec<Applied>) -> View {
        match self.header.ty {
            CoValueType::Comap | CoValueType::Account | CoValueType::Group => View::Map(comap::fold_comap(applied)),
            CoValueType::Colist => View::List(colist::fold_colist(applied)),
            CoValueType::Costream => View::Stream(costream::fold_costream(applied)),
            CoValueType::Coplaintext => View::PlainText(coplaintext::fold_coplaintext(applied)),
        }
    }

    /// The live materialized view (§4.4 pt.4). Always `Some` after
    /// construction; recomputed lazily by ingest, never by this getter.
    pub fn view(&self) -> &View {
        self.cache.as_ref().expect("view initialized at construction")
    }

    /// A read-only view ignoring any transaction with `madeAt > t` (§4.4
    /// pt.6). Independent of the live cache; no consistency guarantee
    /// with it.
    pub fn at_time(&self, t: MadeAt, resolver: &dyn GroupResolver) -> View {
        let applied = self.collect_applied(resolver, Some(t));
        self.fold(applied)
    }

    /// This CoValue's group content reinterpreted as raw group-permission
    /// entries (§4.5), for feeding `cojson_authorization::fold_group`.
    /// Only meaningful when `header.ruleset` is `Group`.
    pub fn as_group_entries(&self, resolver: &dyn GroupResolver) -> Vec<cojson_authorization::GroupEntry> {
        let applied = self.collect_applied(resolver, None);
        comap::to_group_entries(&applied)
    }

    /// Register a listener invoked synchronously after every committed
    /// batch, in insertion order (§4.4 pt.5). Each `notify()` call takes a
    /// snapshot of currently-registered listeners before invoking any of
    /// them, so a listener that unsubscribes (itself or another) mid-
    /// delivery only affects the *next* notification, never the one
    /// already in flight.
    pub fn subscribe(&mut self, listener: impl Fn(&View) + Send + Sync + 'static) -> u64 {
        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        self.subscribers.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: u64) {
        self.subscribers.retain(|(sid, _)| *sid != id);
    }

    fn notify(&self) {
        let Some(view) = &self.cache else { return };
        let snapshot: Vec<Listener> = self.subscribers.iter().map(|(_, cb)| cb.clone()).collect();
        for cb in snapshot {
            cb(view);
        }
    }
}

impl std::fmt::Debug for CoValueCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoValueCore")
            .field("id", &self.id)
            .field("ty", &self.header.ty)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
