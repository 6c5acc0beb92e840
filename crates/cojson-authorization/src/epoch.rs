//! Key-epoch sealing (§4.5): wraps a group's current symmetric read key for
//! one member's account under that member's sealing public key. The result
//! is the JSON value stored at a group's `<accountID>_<epochID>` entry
//! ([`cojson_core::ids::KeyEpochId`] on the wire, `u64` once it reaches
//! [`crate::group::GroupFold`]).
//!
//! The AEAD nonce is derived deterministically from `(group, epoch, member)`
//! rather than carried on the blob, mirroring how `cojson-journal`'s
//! transaction encoding derives its nonce from the transaction's position
//! instead of storing one explicitly.

use crate::role::Role;
use cojson_core::crypto::sealing::{seal, unseal, AeadNonce, SealingPublicKey, SealingSecretKey};
use cojson_core::crypto::symmetric::SymmetricKey;
use cojson_core::error::Result;
use cojson_core::ids::{AccountId, GroupId, KeyEpochId};
use serde::{Deserialize, Serialize};

/// The sealed form of one epoch's symmetric key, addressed to a single
/// member. This is the value half of a group's `<accountID>_<epochID>`
/// CoMap entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedKeyBlob {
    /// The admin's sealing public key the blob was sealed from, needed by
    /// the member to re-derive the shared secret on unseal.
    pub sealer: SealingPublicKey,
    pub ciphertext: String,
}

fn nonce_for(group: GroupId, epoch: KeyEpochId, member: AccountId) -> AeadNonce {
    let digest = cojson_core::crypto::hash::hash(format!("{group}:{epoch}:{member}").as_bytes());
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&digest.0[..12]);
    AeadNonce(nonce)
}

/// Seal `key` for `member`, as an admin holding `admin_sk` performing a key
/// rotation or adding a new member to the current epoch.
pub fn seal_key_for_member(
    key: &SymmetricKey,
    group: GroupId,
    epoch: KeyEpochId,
    member: AccountId,
    member_pk: &SealingPublicKey,
    admin_sk: &SealingSecretKey,
) -> Result<SealedKeyBlob> {
    let nonce = nonce_for(group, epoch, member);
    let ciphertext = seal(member_pk, admin_sk, &nonce, &key.0)?;
    Ok(SealedKeyBlob {
        sealer: admin_sk.public_key(),
        ciphertext: base64_encode(&ciphertext),
    })
}

/// Recover the epoch's symmetric key from a blob addressed to `member`.
/// Returns `None` on tamper or a malformed blob, per the engine's
/// fail-closed convention for decryption.
pub fn unseal_key_for_member(
    blob: &SealedKeyBlob,
    group: GroupId,
    epoch: KeyEpochId,
    member: AccountId,
    member_sk: &SealingSecretKey,
) -> Option<SymmetricKey> {
    let nonce = nonce_for(group, epoch, member);
    let ciphertext = base64_decode(&blob.ciphertext)?;
    let plaintext = unseal(&blob.sealer, member_sk, &nonce, &ciphertext)?;
    let bytes: [u8; 32] = plaintext.try_into().ok()?;
    Some(SymmetricKey(bytes))
}

/// Build the group-content `set` ops a key rotation writes: a fresh sealed
/// blob for every current member plus the new `readKey` pointer (§4.5 "key
/// rotation... seals a new symmetric key for every current member").
pub fn rotate_key_changes(
    new_key: &SymmetricKey,
    group: GroupId,
    new_epoch: KeyEpochId,
    admin_sk: &SealingSecretKey,
    members: &[(AccountId, SealingPublicKey, Role)],
) -> Result<Vec<serde_json::Value>> {
    let mut ops = Vec::with_capacity(members.len() + 1);
    for (account, sealing_pk, role) in members {
        if matches!(role, Role::Revoked) {
            continue;
        }
        let blob = seal_key_for_member(new_key, group, new_epoch, *account, sealing_pk, admin_sk)?;
        ops.push(serde_json::json!({
            "op": "set",
            "key": crate::principal::sealed_key_entry_key(*account, new_epoch.0),
            "value": serde_json::to_value(&blob).map_err(|e| cojson_core::error::CoJsonError::invalid(e.to_string()))?,
        }));
    }
    ops.push(serde_json::json!({"op": "set", "key": "readKey", "value": new_epoch.0}));
    Ok(ops)
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cojson_core::crypto::hash::hash;
    use cojson_core::crypto::sealing::generate_sealing_keypair;
    use rand::rngs::OsRng;

    fn group_id() -> GroupId {
        GroupId(hash(b"group"))
    }

    fn account(byte: u8) -> AccountId {
        AccountId(cojson_core::crypto::Digest([byte; 32]))
    }

    #[test]
    fn seal_then_unseal_round_trips() {
        let admin = generate_sealing_keypair(&mut OsRng);
        let member = generate_sealing_keypair(&mut OsRng);
        let key = SymmetricKey::generate(&mut OsRng);
        let epoch = KeyEpochId(1);
        let blob = seal_key_for_member(&key, group_id(), epoch, account(1), &member.public, &admin.secret).unwrap();
        let recovered = unseal_key_for_member(&blob, group_id(), epoch, account(1), &member.secret).unwrap();
        assert_eq!(recovered, key);
    }

    #[test]
    fn unseal_fails_for_wrong_member() {
        let admin = generate_sealing_keypair(&mut OsRng);
        let member = generate_sealing_keypair(&mut OsRng);
        let other = generate_sealing_keypair(&mut OsRng);
        let key = SymmetricKey::generate(&mut OsRng);
        let epoch = KeyEpochId(1);
        let blob = seal_key_for_member(&key, group_id(), epoch, account(1), &member.public, &admin.secret).unwrap();
        assert!(unseal_key_for_member(&blob, group_id(), epoch, account(1), &other.secret).is_none());
    }

    #[test]
    fn rotate_key_changes_skips_revoked_members() {
        let admin = generate_sealing_keypair(&mut OsRng);
        let member = generate_sealing_keypair(&mut OsRng);
        let key = SymmetricKey::generate(&mut OsRng);
        let members = vec![
            (account(1), member.public, Role::Writer),
            (account(2), generate_sealing_keypair(&mut OsRng).public, Role::Revoked),
        ];
        let ops = rotate_key_changes(&key, group_id(), KeyEpochId(2), &admin.secret, &members).unwrap();
        // one sealed-key op for the writer, plus the readKey pointer.
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1]["key"], "readKey");
    }
}
