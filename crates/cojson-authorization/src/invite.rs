//! Invite redemption (§4.5): holding an invite secret lets a new account
//! swap itself in for the well-known invite principal in a single
//! admin-equivalent transaction scoped to self-insertion only.

use crate::group::GroupFold;
use crate::principal::invite_entry_key;
use crate::role::Role;
use cojson_core::ids::AccountId;

/// One group-content change, as the journal's CoMap fold sees it, shaped
/// enough to recognize an invite self-swap.
#[derive(Debug, Clone)]
pub struct GroupChange {
    pub key: String,
    pub value_is_role: Option<Role>,
}

/// Returns `Some(role)` if `changes` is exactly the self-insertion swap an
/// invite redemption is allowed to make: the redeeming account grants
/// itself `role` and does not touch any other principal's entry.
///
/// Per §4.5 this is the *only* membership change a non-admin signer may
/// make; any other key in the same transaction disqualifies it.
pub fn recognize_invite_redemption(
    fold: &GroupFold,
    redeemer: AccountId,
    secret: &str,
    changes: &[GroupChange],
) -> Option<Role> {
    let redeemer_key = redeemer.to_string();
    let mut granted_role = None;
    for change in changes {
        if change.key != redeemer_key {
            return None;
        }
        granted_role = change.value_is_role;
    }
    let role = granted_role?;
    if fold.has_invite(secret, &role.to_string()) {
        Some(role)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{fold_group, GroupEntry};
    use crate::principal::invite_entry_key;
    use cojson_core::crypto::Digest;
    use cojson_core::ids::{CoValueId, SessionId};
    use cojson_core::time::{CausalKey, MadeAt};

    fn acc(byte: u8) -> AccountId {
        CoValueId(Digest([byte; 32]))
    }

    fn ck() -> CausalKey {
        CausalKey::new(MadeAt(1), SessionId::new(acc(9), 1), 0)
    }

    #[test]
    fn recognizes_valid_self_swap() {
        let entries = vec![GroupEntry {
            key: invite_entry_key("s3cret", "writer"),
            value: true.into(),
            causal_key: ck(),
        }];
        let fold = fold_group(&entries, None);
        let redeemer = acc(5);
        let changes = vec![GroupChange {
            key: redeemer.to_string(),
            value_is_role: Some(Role::Writer),
        }];
        assert_eq!(
            recognize_invite_redemption(&fold, redeemer, "s3cret", &changes),
            Some(Role::Writer)
        );
    }

    #[test]
    fn rejects_changes_touching_other_principals() {
        let entries = vec![GroupEntry {
            key: invite_entry_key("s3cret", "writer"),
            value: true.into(),
            causal_key: ck(),
        }];
        let fold = fold_group(&entries, None);
        let redeemer = acc(5);
        let other = acc(6);
        let changes = vec![
            GroupChange { key: redeemer.to_string(), value_is_role: Some(Role::Writer) },
            GroupChange { key: other.to_string(), value_is_role: Some(Role::Admin) },
        ];
        assert_eq!(recognize_invite_redemption(&fold, redeemer, "s3cret", &changes), None);
    }

    #[test]
    fn rejects_unknown_secret() {
        let fold = fold_group(&[], None);
        let redeemer = acc(5);
        let changes = vec![GroupChange { key: redeemer.to_string(), value_is_role: Some(Role::Writer) }];
        assert_eq!(recognize_invite_redemption(&fold, redeemer, "nope", &changes), None);
    }
}
