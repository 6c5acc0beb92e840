//! CoValue headers (§3): the immutable, hashed part of a CoValue.

use cojson_core::canonical;
use cojson_core::ids::{CoValueId, GroupId};
use serde::{Deserialize, Serialize};

/// The concrete CRDT kind a CoValue implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoValueType {
    Comap,
    Colist,
    Costream,
    Coplaintext,
    Account,
    Group,
}

/// How permissions are evaluated for a CoValue (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Ruleset {
    /// This CoValue IS the permission root (groups and accounts).
    #[serde(rename = "group")]
    Group,
    /// Permissions are delegated to the referenced group.
    #[serde(rename = "ownedByGroup")]
    OwnedByGroup { group: GroupId },
    /// Public, used only for account bootstrapping.
    #[serde(rename = "unsafeAllowAll")]
    UnsafeAllowAll,
}

/// The immutable header whose hash becomes the CoValue's ID (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoValueHeader {
    #[serde(rename = "type")]
    pub ty: CoValueType,
    pub ruleset: Ruleset,
    pub meta: serde_json::Value,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    pub uniqueness: String,
}

impl CoValueHeader {
    pub fn new(
        ty: CoValueType,
        ruleset: Ruleset,
        meta: serde_json::Value,
        created_at: i64,
        uniqueness: String,
    ) -> Self {
        Self {
            ty,
            ruleset,
            meta,
            created_at,
            uniqueness,
        }
    }

    /// Derive this header's content hash, which becomes the CoValue's ID.
    pub fn id(&self) -> cojson_core::Result<CoValueId> {
        let bytes = canonical::encode_serializable(self)?;
        Ok(CoValueId::from_header_hash(cojson_core::crypto::hash::hash(&bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_fields_same_id() {
        let h1 = CoValueHeader::new(
            CoValueType::Comap,
            Ruleset::Group,
            serde_json::json!({}),
            1000,
            "abc".into(),
        );
        let h2 = h1.clone();
        assert_eq!(h1.id().unwrap(), h2.id().unwrap());
    }

    #[test]
    fn different_uniqueness_different_id() {
        let h1 = CoValueHeader::new(
            CoValueType::Comap,
            Ruleset::Group,
            serde_json::json!({}),
            1000,
            "abc".into(),
        );
        let h2 = CoValueHeader::new(
            CoValueType::Comap,
            Ruleset::Group,
            serde_json::json!({}),
            1000,
            "xyz".into(),
        );
        assert_ne!(h1.id().unwrap(), h2.id().unwrap());
    }
}
