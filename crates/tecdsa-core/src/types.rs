//! Core types shared by every phase

use crate::{Error, Result};
use k256::{
    elliptic_curve::{
        sec1::{FromEncodedPoint, ToEncodedPoint},
        PrimeField,
    },
    AffinePoint, EncodedPoint, ProjectivePoint, Scalar,
};
use serde::{
    de::Error as _, ser::SerializeMap, Deserialize, Deserializer, Serialize, Serializer,
};
use std::{collections::BTreeMap, fmt};

/// One of the two parties of a session.
///
/// The server is participant 0 and the client participant 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// Both roles in participant order
    pub const BOTH: [Role; 2] = [Role::Server, Role::Client];

    /// Participant index used on the wire
    pub fn index(self) -> u32 {
        match self {
            Role::Server => 0,
            Role::Client => 1,
        }
    }

    /// Role for a wire participant index
    pub fn from_index(index: u32) -> Result<Self> {
        match index {
            0 => Ok(Role::Server),
            1 => Ok(Role::Client),
            other => Err(Error::UnexpectedMessage(format!(
                "unknown participant index {other}"
            ))),
        }
    }

    /// The other party
    pub fn peer(self) -> Role {
        match self {
            Role::Server => Role::Client,
            Role::Client => Role::Server,
        }
    }

    /// Evaluation point of this party's polynomial shares (index + 1)
    pub fn scalar(self) -> Scalar {
        Scalar::from(u64::from(self.index()) + 1)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// Protocol phase a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Keygen,
    Triples,
    Presign,
    Sign,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Keygen => "keygen",
            Phase::Triples => "triples",
            Phase::Presign => "presign",
            Phase::Sign => "sign",
        };
        f.write_str(name)
    }
}

/// Identifier of the wallet owner
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Identifier shared by both parties for one phase run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Fresh random session id
    pub fn random() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry key of a protocol session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: UserId,
    pub session_id: SessionId,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            session_id: SessionId(session_id.into()),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.session_id)
    }
}

/// A payload tagged with the party that produced it.
///
/// On the wire this is a one-entry map keyed by the sender's participant index,
/// e.g. `{"1": payload}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromPeer<T> {
    pub from: Role,
    pub payload: T,
}

impl<T> FromPeer<T> {
    pub fn new(from: Role, payload: T) -> Self {
        Self { from, payload }
    }
}

impl<T: Serialize> Serialize for FromPeer<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.from.index().to_string(), &self.payload)?;
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FromPeer<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let map: BTreeMap<String, T> = BTreeMap::deserialize(deserializer)?;
        if map.len() != 1 {
            return Err(D::Error::custom(format!(
                "expected exactly one sender, got {}",
                map.len()
            )));
        }
        let (index, payload) = map
            .into_iter()
            .next()
            .ok_or_else(|| D::Error::custom("empty sender map"))?;
        let index: u32 = index.parse().map_err(D::Error::custom)?;
        let from = Role::from_index(index).map_err(D::Error::custom)?;
        Ok(FromPeer { from, payload })
    }
}

/// Decode a canonical 32-byte big-endian scalar
pub fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::Deserialization(format!("invalid scalar length {}", bytes.len())))?;
    Option::<Scalar>::from(Scalar::from_repr(array.into()))
        .ok_or_else(|| Error::Deserialization("scalar out of range".into()))
}

/// Decode a SEC1 point, accepting the identity encoding
pub fn point_from_bytes(bytes: &[u8]) -> Result<ProjectivePoint> {
    let encoded =
        EncodedPoint::from_bytes(bytes).map_err(|e| Error::Deserialization(e.to_string()))?;
    let affine: AffinePoint = Option::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or_else(|| Error::Deserialization("invalid curve point".into()))?;
    Ok(ProjectivePoint::from(affine))
}

/// SEC1 compressed encoding (a single zero byte for the identity)
pub fn point_to_bytes(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

/// Scalar on the wire: 32-byte big-endian hex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireScalar(pub Scalar);

impl Serialize for WireScalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        scalar_hex::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for WireScalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        scalar_hex::deserialize(deserializer).map(WireScalar)
    }
}

/// Point on the wire: SEC1 compressed hex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WirePoint(pub ProjectivePoint);

impl Serialize for WirePoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        point_hex::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for WirePoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        point_hex::deserialize(deserializer).map(WirePoint)
    }
}

pub(crate) mod scalar_hex {
    use k256::Scalar;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(scalar: &Scalar, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(scalar.to_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Scalar, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(text).map_err(D::Error::custom)?;
        super::scalar_from_bytes(&bytes).map_err(D::Error::custom)
    }
}

pub(crate) mod point_hex {
    use k256::ProjectivePoint;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        point: &ProjectivePoint,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(super::point_to_bytes(point)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<ProjectivePoint, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(text).map_err(D::Error::custom)?;
        super::point_from_bytes(&bytes).map_err(D::Error::custom)
    }
}

pub(crate) mod hex32 {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(text).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected 32 bytes"))
    }
}
