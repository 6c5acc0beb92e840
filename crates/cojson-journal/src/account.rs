//! Account CoValue content (§3 "Account's content includes the account's
//! public signing/encrypting keys and profile reference"). An account is
//! just a CoMap with `group` ruleset and a small set of well-known keys;
//! this module only names those keys and reads/builds them, the same way
//! [`crate::kinds::comap`] already reads ordinary CoMap content.

use crate::kinds::comap::CoMapFold;
use cojson_core::crypto::sealing::SealingPublicKey;
use cojson_core::crypto::signing::SigningPublicKey;
use cojson_core::ids::{AccountId, CoValueId};

pub const SIGNING_KEY_FIELD: &str = "signingKey";
pub const SEALING_KEY_FIELD: &str = "sealingKey";
pub const PROFILE_FIELD: &str = "profile";

/// Read-only view over an account CoValue's folded CoMap content.
pub struct AccountContent<'a> {
    fold: &'a CoMapFold,
}

impl<'a> AccountContent<'a> {
    pub fn new(fold: &'a CoMapFold) -> Self {
        Self { fold }
    }

    pub fn signing_public_key(&self) -> Option<SigningPublicKey> {
        let encoded = self.fold.get(SIGNING_KEY_FIELD)?.as_str()?;
        let bytes = bs58::decode(encoded).into_vec().ok()?;
        SigningPublicKey::try_from_slice(&bytes).ok()
    }

    pub fn sealing_public_key(&self) -> Option<SealingPublicKey> {
        let encoded = self.fold.get(SEALING_KEY_FIELD)?.as_str()?;
        let bytes = bs58::decode(encoded).into_vec().ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(SealingPublicKey(arr))
    }

    pub fn profile(&self) -> Option<CoValueId> {
        self.fold.get(PROFILE_FIELD)?.as_str()?.parse().ok()
    }
}

/// The `set` ops a freshly created account's bootstrap transaction writes
/// (§3, §4.5): a self-granted `admin` role (an account is its own permission
/// root, so without this its second transaction would have no admin to
/// authorize it — the founding-transaction exemption only covers the first),
/// its own public keys, and a reference to its profile CoValue.
pub fn initial_account_changes(
    account: AccountId,
    signing_pk: &SigningPublicKey,
    sealing_pk: &SealingPublicKey,
    profile: CoValueId,
) -> Vec<serde_json::Value> {
    vec![
        serde_json::json!({
            "op": "set",
            "key": account.to_string(),
            "value": "admin",
        }),
        serde_json::json!({
            "op": "set",
            "key": SIGNING_KEY_FIELD,
            "value": bs58::encode(signing_pk.as_bytes()).into_string(),
        }),
        serde_json::json!({
            "op": "set",
            "key": SEALING_KEY_FIELD,
            "value": bs58::encode(sealing_pk.0).into_string(),
        }),
        serde_json::json!({
            "op": "set",
            "key": PROFILE_FIELD,
            "value": profile.to_string(),
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::{comap::fold_comap, Applied};
    use cojson_core::crypto::hash::hash;
    use cojson_core::crypto::sealing::generate_sealing_keypair;
    use cojson_core::crypto::signing::generate_signing_keypair;
    use cojson_core::ids::{SessionId, TransactionId};
    use cojson_core::time::{CausalKey, MadeAt};
    use rand::rngs::OsRng;

    #[test]
    fn round_trips_through_comap_fold() {
        let signing = generate_signing_keypair(&mut OsRng);
        let sealing = generate_sealing_keypair(&mut OsRng);
        let profile = CoValueId(hash(b"profile"));
        let account = CoValueId(hash(b"account"));
        let changes = initial_account_changes(account, &signing.public, &sealing.public, profile);

        let session = SessionId::new(account, 1);
        let tx_id = TransactionId::new(session, 0);
        let causal_key = CausalKey::new(MadeAt(1), session, 0);
        let applied: Vec<Applied> = changes
            .into_iter()
            .enumerate()
            .map(|(i, op)| Applied {
                id: tx_id,
                causal_key,
                op_index: i as u32,
                op,
            })
            .collect();
        let fold = fold_comap(applied);
        let content = AccountContent::new(&fold);

        assert_eq!(content.signing_public_key(), Some(signing.public));
        assert_eq!(content.sealing_public_key(), Some(sealing.public));
        assert_eq!(content.profile(), Some(profile));
    }
}
