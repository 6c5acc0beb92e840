//! The four peer sync message kinds (§4.8), sent as newline-delimited
//! canonical JSON over any ordered reliable byte stream (§6).

use cojson_core::crypto::signing::Ed25519Signature;
use cojson_core::ids::{CoValueId, SessionId};
use cojson_journal::{CoValueHeader, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `#[serde(with = "session_map")]` helper: `SessionId` serializes as an
/// ordinary two-field struct, and `serde_json`'s map-key serializer only
/// accepts primitive keys, so a `HashMap<SessionId, _>` cannot go through
/// `serde`'s derived map support directly. This re-keys it on `SessionId`'s
/// textual form instead, the same pattern `cojson_store::file`'s
/// `last_signatures: HashMap<String, Ed25519Signature>` sidecar field
/// already uses.
mod session_map {
    use cojson_core::ids::SessionId;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S, V>(map: &HashMap<SessionId, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let stringified: HashMap<String, &V> = map.iter().map(|(k, v)| (k.to_string(), v)).collect();
        stringified.serialize(serializer)
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<HashMap<SessionId, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        let stringified: HashMap<String, V> = HashMap::deserialize(deserializer)?;
        stringified
            .into_iter()
            .map(|(k, v)| k.parse::<SessionId>().map(|session| (session, v)).map_err(D::Error::custom))
            .collect()
    }
}

/// "I have these sessions up to these indices."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Known {
    pub id: CoValueId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<CoValueHeader>,
    #[serde(with = "session_map")]
    pub sessions: HashMap<SessionId, u64>,
}

/// One session's extension delivered by a `CONTENT` message. `final_index`
/// is the session length this extension reaches once it is *completely*
/// applied — equal to `after_index + transactions.len()` unless backpressure
/// split the extension into several fragments (§4.8 "Backpressure"), in
/// which case every fragment carries the same `final_index` and only the
/// one whose own reach equals it carries a trailing signature that verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContent {
    #[serde(rename = "afterIndex")]
    pub after_index: u64,
    pub transactions: Vec<Transaction>,
    #[serde(rename = "lastSignature")]
    pub last_signature: Ed25519Signature,
    #[serde(rename = "finalIndex")]
    pub final_index: u64,
}

/// Delivers transactions extending known state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub id: CoValueId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<CoValueHeader>,
    #[serde(with = "session_map")]
    pub new: HashMap<SessionId, SessionContent>,
}

/// "Please send me anything beyond this."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Load {
    pub id: CoValueId,
    #[serde(with = "session_map")]
    pub sessions: HashMap<SessionId, u64>,
}

/// "I have no more to send right now."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Done {
    pub id: CoValueId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    #[serde(rename = "known")]
    Known(Known),
    #[serde(rename = "content")]
    Content(Content),
    #[serde(rename = "load")]
    Load(Load),
    #[serde(rename = "done")]
    Done(Done),
}

impl SyncMessage {
    pub fn covalue_id(&self) -> CoValueId {
        match self {
            SyncMessage::Known(m) => m.id,
            SyncMessage::Content(m) => m.id,
            SyncMessage::Load(m) => m.id,
            SyncMessage::Done(m) => m.id,
        }
    }

    /// Serialize as one newline-delimited canonical JSON line (§6). Uses
    /// the engine's own canonical encoder, not `serde_json`'s default
    /// output, so peers hashing/signing wire bytes agree byte-for-byte.
    pub fn to_wire_line(&self) -> cojson_core::error::Result<Vec<u8>> {
        let mut bytes = cojson_core::canonical::encode_serializable(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn from_wire_line(line: &[u8]) -> cojson_core::error::Result<Self> {
        serde_json::from_slice(line)
            .map_err(|e| cojson_core::error::CoJsonError::invalid(format!("malformed sync message: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_line() {
        let msg = SyncMessage::Done(Done {
            id: CoValueId(cojson_core::crypto::hash::hash(b"cv")),
        });
        let line = msg.to_wire_line().unwrap();
        assert!(line.ends_with(b"\n"));
        let parsed = SyncMessage::from_wire_line(&line[..line.len() - 1]).unwrap();
        assert_eq!(parsed.covalue_id(), msg.covalue_id());
    }

    fn sample_session() -> SessionId {
        let account = CoValueId(cojson_core::crypto::hash::hash(b"acc"));
        SessionId::new(account, 1)
    }

    /// `Known`/`Load`'s `sessions` map is keyed on `SessionId`, which
    /// serializes as a struct, not a string — this must go through
    /// `to_wire_line`'s `serde_json::to_value` step without the "key must be
    /// a string" error that a bare derived `HashMap<SessionId, _>` would hit.
    #[test]
    fn known_with_nonempty_sessions_round_trips_through_wire_line() {
        let session = sample_session();
        let mut sessions = HashMap::new();
        sessions.insert(session, 7u64);
        let msg = SyncMessage::Known(Known {
            id: CoValueId(cojson_core::crypto::hash::hash(b"cv")),
            header: None,
            sessions,
        });
        let line = msg.to_wire_line().unwrap();
        let parsed = SyncMessage::from_wire_line(&line[..line.len() - 1]).unwrap();
        match parsed {
            SyncMessage::Known(known) => assert_eq!(known.sessions.get(&session), Some(&7)),
            other => panic!("expected Known, got {other:?}"),
        }
    }

    #[test]
    fn content_with_nonempty_sessions_round_trips_through_wire_line() {
        let session = sample_session();
        let mut new = HashMap::new();
        new.insert(
            session,
            SessionContent {
                after_index: 0,
                transactions: vec![],
                last_signature: Ed25519Signature([1u8; 64]),
                final_index: 0,
            },
        );
        let msg = SyncMessage::Content(Content {
            id: CoValueId(cojson_core::crypto::hash::hash(b"cv")),
            header: None,
            new,
        });
        let line = msg.to_wire_line().unwrap();
        let parsed = SyncMessage::from_wire_line(&line[..line.len() - 1]).unwrap();
        match parsed {
            SyncMessage::Content(content) => assert!(content.new.contains_key(&session)),
            other => panic!("expected Content, got {other:?}"),
        }
    }
}
