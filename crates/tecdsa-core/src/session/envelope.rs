//! Wire envelope for phase payloads
//!
//! An envelope is addressed to one party and serializes as
//! `{"phase": "triples", "msgs_1": {"wait_0": {"0": ...}}}`.

use crate::keygen::RcvdKeyshareMessages;
use crate::presign::RcvdPresignMessages;
use crate::protocol::Mailbox;
use crate::sign::RcvdSignMessages;
use crate::triples::RcvdTriplesMessages;
use crate::types::{Phase, Role};
use serde::{
    de::Error as _, ser::SerializeMap, Deserialize, Deserializer, Serialize, Serializer,
};
use std::collections::BTreeMap;

/// Payloads of one phase, in that phase's inbox layout
#[derive(Debug, Clone)]
pub enum PhaseMessage {
    Keygen(RcvdKeyshareMessages),
    Triples(RcvdTriplesMessages),
    Presign(RcvdPresignMessages),
    Sign(RcvdSignMessages),
}

impl PhaseMessage {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseMessage::Keygen(_) => Phase::Keygen,
            PhaseMessage::Triples(_) => Phase::Triples,
            PhaseMessage::Presign(_) => Phase::Presign,
            PhaseMessage::Sign(_) => Phase::Sign,
        }
    }

    /// Wire names of the slots carried
    pub fn slot_names(&self) -> Vec<String> {
        fn names<M: Mailbox>(m: &M) -> Vec<String> {
            m.slots().iter().map(|s| s.to_string()).collect()
        }
        match self {
            PhaseMessage::Keygen(m) => names(m),
            PhaseMessage::Triples(m) => names(m),
            PhaseMessage::Presign(m) => names(m),
            PhaseMessage::Sign(m) => names(m),
        }
    }

    fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            PhaseMessage::Keygen(m) => serde_json::to_value(m),
            PhaseMessage::Triples(m) => serde_json::to_value(m),
            PhaseMessage::Presign(m) => serde_json::to_value(m),
            PhaseMessage::Sign(m) => serde_json::to_value(m),
        }
    }

    fn from_value(phase: Phase, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match phase {
            Phase::Keygen => PhaseMessage::Keygen(serde_json::from_value(value)?),
            Phase::Triples => PhaseMessage::Triples(serde_json::from_value(value)?),
            Phase::Presign => PhaseMessage::Presign(serde_json::from_value(value)?),
            Phase::Sign => PhaseMessage::Sign(serde_json::from_value(value)?),
        })
    }
}

macro_rules! phase_message_from {
    ($($inbox:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$inbox> for PhaseMessage {
                fn from(inbox: $inbox) -> Self {
                    PhaseMessage::$variant(inbox)
                }
            }
        )+
    };
}

phase_message_from! {
    RcvdKeyshareMessages => Keygen,
    RcvdTriplesMessages => Triples,
    RcvdPresignMessages => Presign,
    RcvdSignMessages => Sign,
}

/// Payloads addressed to one party
#[derive(Debug, Clone)]
pub struct Envelope {
    pub to: Role,
    pub message: PhaseMessage,
}

impl Envelope {
    pub fn new(to: Role, message: impl Into<PhaseMessage>) -> Self {
        Self {
            to,
            message: message.into(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.message.phase()
    }
}

fn msgs_key(role: Role) -> String {
    format!("msgs_{}", role.index())
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let body = self.message.to_value().map_err(serde::ser::Error::custom)?;
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("phase", &self.phase())?;
        map.serialize_entry(&msgs_key(self.to), &body)?;
        map.end()
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    phase: Phase,
    #[serde(flatten)]
    rest: BTreeMap<String, serde_json::Value>,
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawEnvelope::deserialize(deserializer)?;
        if raw.rest.len() != 1 {
            return Err(D::Error::custom(format!(
                "expected exactly one addressee, got {}",
                raw.rest.len()
            )));
        }
        let (field, body) = raw
            .rest
            .into_iter()
            .next()
            .ok_or_else(|| D::Error::custom("missing addressee"))?;
        let index: u32 = field
            .strip_prefix("msgs_")
            .ok_or_else(|| D::Error::custom(format!("unknown field {field}")))?
            .parse()
            .map_err(D::Error::custom)?;
        let to = Role::from_index(index).map_err(D::Error::custom)?;
        let message = PhaseMessage::from_value(raw.phase, body).map_err(D::Error::custom)?;
        Ok(Envelope { to, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::RcvdSignMessages;
    use crate::types::{FromPeer, WireScalar};
    use k256::Scalar;

    fn sign_envelope() -> Envelope {
        Envelope::new(
            Role::Client,
            RcvdSignMessages {
                wait_0: Some(FromPeer::new(Role::Server, WireScalar(Scalar::ONE))),
            },
        )
    }

    #[test]
    fn test_wire_layout() {
        let json = serde_json::to_value(sign_envelope()).unwrap();
        assert_eq!(json["phase"], "sign");
        assert_eq!(
            json["msgs_1"]["wait_0"]["0"],
            format!("{}1", "0".repeat(63))
        );
        assert!(json.get("msgs_0").is_none());
    }

    #[test]
    fn test_parse_back() {
        let text = serde_json::to_string(&sign_envelope()).unwrap();
        let parsed: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.to, Role::Client);
        assert_eq!(parsed.phase(), Phase::Sign);
        assert_eq!(parsed.message.slot_names(), vec!["wait_0".to_string()]);
    }

    #[test]
    fn test_rejects_bad_addressee() {
        let two = r#"{"phase":"sign","msgs_0":{},"msgs_1":{}}"#;
        assert!(serde_json::from_str::<Envelope>(two).is_err());
        let unknown = r#"{"phase":"sign","msgs_7":{}}"#;
        assert!(serde_json::from_str::<Envelope>(unknown).is_err());
        let wrong_phase = r#"{"phase":"sign","msgs_1":{"wait_3":{"0":"00"}}}"#;
        // unknown slots are ignored by the inbox, so the result is empty
        let parsed: Envelope = serde_json::from_str(wrong_phase).unwrap();
        assert!(parsed.message.slot_names().is_empty());
    }
}
