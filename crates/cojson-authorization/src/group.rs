//! The group fold: effective role and key-epoch resolution (§4.5).
//!
//! A group's content is an ordinary CoMap, so its raw state is a sequence of
//! `set`/`del` entries each stamped with the causal key of the transaction
//! that wrote them (§3). This module does not depend on `cojson-journal`'s
//! concrete `CoMap` type to avoid a circular crate dependency (the journal
//! crate consults this module while validating transactions against a
//! group); instead it folds a caller-supplied slice of [`GroupEntry`]
//! values, which `cojson-journal` produces from its own CoMap session logs.

use crate::principal::{GroupKey, Principal};
use crate::role::Role;
use cojson_core::ids::{AccountId, GroupId};
use cojson_core::time::CausalKey;
use serde_json::Value;
use std::collections::HashMap;

/// One raw `set` entry from a group's CoMap content, as folded input.
#[derive(Debug, Clone)]
pub struct GroupEntry {
    pub key: String,
    pub value: Value,
    pub causal_key: CausalKey,
}

/// The result of folding a group's entries up to some causal cutoff: a
/// last-writer-wins snapshot of every recognized key (§4.5).
#[derive(Debug, Default)]
pub struct GroupFold {
    roles: HashMap<String, (Role, CausalKey)>,
    sealed_keys: HashMap<(AccountId, u64), (Value, CausalKey)>,
    read_key: Option<(u64, CausalKey)>,
    parent_groups: Vec<GroupId>,
    invites: HashMap<(String, String), CausalKey>,
}

/// Fold a group's raw entries (§4.5's "fold the group's transactions up to
/// that point in causal order; LWW per key"). `cutoff` restricts the fold to
/// entries whose causal key is `<= cutoff`, realizing "effective role as of
/// this transaction's position" (§4.4 pt.2); pass `None` to fold everything
/// currently known (used for the live materialized view).
pub fn fold_group(entries: &[GroupEntry], cutoff: Option<CausalKey>) -> GroupFold {
    let mut fold = GroupFold::default();
    let mut ordered: Vec<&GroupEntry> = entries
        .iter()
        .filter(|e| cutoff.map(|c| e.causal_key <= c).unwrap_or(true))
        .collect();
    ordered.sort_by_key(|e| e.causal_key);

    for entry in ordered {
        match GroupKey::parse(&entry.key) {
            GroupKey::RoleGrant(principal) => {
                let Some(role) = entry
                    .value
                    .as_str()
                    .and_then(|s| s.parse::<Role>().ok())
                else {
                    continue;
                };
                let slot = fold.roles.entry(principal.as_key()).or_insert((role, entry.causal_key));
                if entry.causal_key >= slot.1 {
                    *slot = (role, entry.causal_key);
                }
            }
            GroupKey::SealedKey { account, epoch } => {
                let slot = fold
                    .sealed_keys
                    .entry((account, epoch))
                    .or_insert((entry.value.clone(), entry.causal_key));
                if entry.causal_key >= slot.1 {
                    *slot = (entry.value.clone(), entry.causal_key);
                }
            }
            GroupKey::ReadKey => {
                let Some(epoch) = entry.value.as_u64() else {
                    continue;
                };
                match fold.read_key {
                    Some((_, prev)) if prev > entry.causal_key => {}
                    _ => fold.read_key = Some((epoch, entry.causal_key)),
                }
            }
            GroupKey::ParentGroup(parent) => {
                if !fold.parent_groups.contains(&parent) {
                    fold.parent_groups.push(parent);
                }
            }
            GroupKey::Invite { secret, role } => {
                fold.invites
                    .entry((secret, role))
                    .and_modify(|c| {
                        if entry.causal_key > *c {
                            *c = entry.causal_key;
                        }
                    })
                    .or_insert(entry.causal_key);
            }
            GroupKey::Other => {}
        }
    }
    fold
}

impl GroupFold {
    /// The role directly granted to `account`, ignoring `everyone` and
    /// parent-group inheritance.
    pub fn direct_role(&self, account: AccountId) -> Option<Role> {
        self.roles.get(&account.to_string()).map(|(r, _)| *r)
    }

    pub fn everyone_role(&self) -> Option<Role> {
        self.roles.get("everyone").map(|(r, _)| *r)
    }

    /// The currently active read key epoch, if one has been set.
    pub fn read_key_epoch(&self) -> Option<u64> {
        self.read_key.map(|(e, _)| e)
    }

    pub fn sealed_key_for(&self, account: AccountId, epoch: u64) -> Option<&Value> {
        self.sealed_keys.get(&(account, epoch)).map(|(v, _)| v)
    }

    pub fn parent_groups(&self) -> &[GroupId] {
        &self.parent_groups
    }

    pub fn has_invite(&self, secret: &str, role: &str) -> bool {
        self.invites.contains_key(&(secret.to_string(), role.to_string()))
    }
}

/// Resolve an account's effective role in a single (non-inheriting) group
/// fold: the maximum of its direct grant and the `everyone` grant, since a
/// public grant can only add rights, never subtract them.
pub fn direct_effective_role(fold: &GroupFold, account: AccountId) -> Role {
    let direct = fold.direct_role(account).unwrap_or(Role::Revoked);
    let everyone = fold.everyone_role().unwrap_or(Role::Revoked);
    direct.max(everyone)
}

/// Resolve an account's effective role including parent-group inheritance
/// (§4.5). When this group has multiple declared parents, the account's
/// inherited role is the best (max) of what each parent grants — membership
/// via any one parent is sufficient, mirroring OR-combination of group
/// membership. When this group also has a direct override for the account,
/// the final role is `min(inherited, override)` per §4.5's intersection
/// rule; without a direct override the inherited role applies as-is.
///
/// `resolve_parent` looks up a parent group's already-folded effective role
/// for the same account; the caller is expected to recurse through
/// `cojson-journal`'s group cache, which also guards against cycles.
pub fn effective_role_with_inheritance(
    fold: &GroupFold,
    account: AccountId,
    resolve_parent: impl Fn(GroupId) -> Option<Role>,
) -> Role {
    let direct_override = fold.direct_role(account);
    let inherited = fold
        .parent_groups()
        .iter()
        .filter_map(|p| resolve_parent(*p))
        .max();

    let own_everyone = fold.everyone_role().unwrap_or(Role::Revoked);
    match (direct_override, inherited) {
        (Some(direct), Some(parent_role)) => crate::role::min_role(direct, parent_role).max(own_everyone),
        (Some(direct), None) => direct.max(own_everyone),
        (None, Some(parent_role)) => parent_role.max(own_everyone),
        (None, None) => own_everyone,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cojson_core::crypto::Digest;
    use cojson_core::ids::{CoValueId, SessionId};

    fn acc(byte: u8) -> AccountId {
        CoValueId(Digest([byte; 32]))
    }

    fn ck(session_account: u8, counter: u64, idx: u64, made_at: i64) -> CausalKey {
        let session = SessionId::new(acc(session_account), counter);
        CausalKey::new(cojson_core::time::MadeAt(made_at), session, idx)
    }

    #[test]
    fn last_writer_wins_per_key() {
        let a = acc(1);
        let entries = vec![
            GroupEntry { key: a.to_string(), value: "reader".into(), causal_key: ck(9, 1, 0, 1) },
            GroupEntry { key: a.to_string(), value: "writer".into(), causal_key: ck(9, 1, 1, 2) },
        ];
        let fold = fold_group(&entries, None);
        assert_eq!(fold.direct_role(a), Some(Role::Writer));
    }

    #[test]
    fn cutoff_restricts_to_earlier_entries() {
        let a = acc(1);
        let first = ck(9, 1, 0, 1);
        let second = ck(9, 1, 1, 2);
        let entries = vec![
            GroupEntry { key: a.to_string(), value: "reader".into(), causal_key: first },
            GroupEntry { key: a.to_string(), value: "admin".into(), causal_key: second },
        ];
        let fold = fold_group(&entries, Some(first));
        assert_eq!(fold.direct_role(a), Some(Role::Reader));
    }

    #[test]
    fn everyone_grant_widens_access() {
        let a = acc(1);
        let entries = vec![GroupEntry {
            key: "everyone".to_string(),
            value: "reader".into(),
            causal_key: ck(9, 1, 0, 1),
        }];
        let fold = fold_group(&entries, None);
        assert_eq!(direct_effective_role(&fold, a), Role::Reader);
    }

    #[test]
    fn inheritance_takes_min_of_override_and_parent() {
        let a = acc(1);
        let parent: GroupId = acc(200);
        let entries = vec![
            GroupEntry { key: a.to_string(), value: "admin".into(), causal_key: ck(9, 1, 0, 1) },
            GroupEntry {
                key: crate::principal::parent_group_entry_key(parent),
                value: true.into(),
                causal_key: ck(9, 1, 1, 2),
            },
        ];
        let fold = fold_group(&entries, None);
        let role = effective_role_with_inheritance(&fold, a, |_| Some(Role::Reader));
        assert_eq!(role, Role::Reader);
    }

    #[test]
    fn inheritance_without_override_uses_parent_role() {
        let a = acc(1);
        let parent: GroupId = acc(200);
        let entries = vec![GroupEntry {
            key: crate::principal::parent_group_entry_key(parent),
            value: true.into(),
            causal_key: ck(9, 1, 0, 1),
        }];
        let fold = fold_group(&entries, None);
        let role = effective_role_with_inheritance(&fold, a, |_| Some(Role::Writer));
        assert_eq!(role, Role::Writer);
    }

    #[test]
    fn read_key_tracks_latest_epoch() {
        let entries = vec![
            GroupEntry { key: "readKey".to_string(), value: 0.into(), causal_key: ck(9, 1, 0, 1) },
            GroupEntry { key: "readKey".to_string(), value: 1.into(), causal_key: ck(9, 1, 1, 2) },
        ];
        let fold = fold_group(&entries, None);
        assert_eq!(fold.read_key_epoch(), Some(1));
    }
}
