//! Principals a group can grant a role to, and the recognized key patterns
//! in a group's content map (§4.5).

use cojson_core::ids::AccountId;
use serde::{Deserialize, Serialize};

/// Who a role grant applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Principal {
    Account(AccountId),
    /// The `everyone` public grant.
    Everyone,
}

impl Principal {
    pub fn as_key(&self) -> String {
        match self {
            Principal::Account(id) => id.to_string(),
            Principal::Everyone => "everyone".to_string(),
        }
    }
}

/// A recognized key in a group's CoMap content, as classified per §4.5's
/// key-pattern table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupKey {
    /// `<accountID>` or `everyone` — a role grant.
    RoleGrant(Principal),
    /// `<accountID>_<epochID>` — a sealed key-epoch blob for that account.
    SealedKey { account: AccountId, epoch: u64 },
    /// `readKey` — the currently active epoch ID.
    ReadKey,
    /// `parentGroup_<parentGroupID>` — inheritance marker.
    ParentGroup(cojson_core::ids::GroupId),
    /// `inviteSecret_<secret>_<role>` — a well-known invite principal.
    Invite { secret: String, role: String },
    /// Anything else is opaque group metadata and ignored by the fold.
    Other,
}

impl GroupKey {
    pub fn parse(key: &str) -> GroupKey {
        if key == "readKey" {
            return GroupKey::ReadKey;
        }
        if key == "everyone" {
            return GroupKey::RoleGrant(Principal::Everyone);
        }
        if let Some(rest) = key.strip_prefix("parentGroup_") {
            if let Ok(id) = rest.parse() {
                return GroupKey::ParentGroup(id);
            }
        }
        if let Some(rest) = key.strip_prefix("inviteSecret_") {
            if let Some((secret, role)) = rest.rsplit_once('_') {
                return GroupKey::Invite {
                    secret: secret.to_string(),
                    role: role.to_string(),
                };
            }
        }
        // `<accountID>_<epochID>` — account IDs are `co_z...`, so split on
        // the last underscore-delimited numeric suffix.
        if let Some((maybe_account, maybe_epoch)) = key.rsplit_once('_') {
            if let (Ok(account), Ok(epoch)) = (maybe_account.parse(), maybe_epoch.parse()) {
                return GroupKey::SealedKey { account, epoch };
            }
        }
        if let Ok(account) = key.parse() {
            return GroupKey::RoleGrant(Principal::Account(account));
        }
        GroupKey::Other
    }
}

pub fn sealed_key_entry_key(account: AccountId, epoch: u64) -> String {
    format!("{account}_{epoch}")
}

pub fn parent_group_entry_key(parent: cojson_core::ids::GroupId) -> String {
    format!("parentGroup_{parent}")
}

pub fn invite_entry_key(secret: &str, role: &str) -> String {
    format!("inviteSecret_{secret}_{role}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cojson_core::crypto::Digest;

    #[test]
    fn parses_everyone_and_read_key() {
        assert_eq!(GroupKey::parse("everyone"), GroupKey::RoleGrant(Principal::Everyone));
        assert_eq!(GroupKey::parse("readKey"), GroupKey::ReadKey);
    }

    #[test]
    fn parses_sealed_key_entry() {
        let acc: AccountId = cojson_core::ids::CoValueId(Digest([9u8; 32]));
        let key = sealed_key_entry_key(acc, 3);
        assert_eq!(GroupKey::parse(&key), GroupKey::SealedKey { account: acc, epoch: 3 });
    }

    #[test]
    fn parses_plain_account_grant() {
        let acc: AccountId = cojson_core::ids::CoValueId(Digest([4u8; 32]));
        assert_eq!(
            GroupKey::parse(&acc.to_string()),
            GroupKey::RoleGrant(Principal::Account(acc))
        );
    }

    #[test]
    fn parses_invite_entry() {
        let key = invite_entry_key("s3cr3t", "writer");
        assert_eq!(
            GroupKey::parse(&key),
            GroupKey::Invite { secret: "s3cr3t".to_string(), role: "writer".to_string() }
        );
    }
}
