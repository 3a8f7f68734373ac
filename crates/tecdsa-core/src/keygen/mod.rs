//! Distributed Key Generation module
//!
//! Two-party Feldman-style DKG with hash commitments and Schnorr proofs.
//! Each party ends with a Shamir share of the secret key and the common
//! public key; neither learns the other's share.

mod dealer;
mod dkg;
mod messages;

pub use dealer::{combine_shares, deal_key_shares};
pub use dkg::KeygenParty;
pub use messages::*;

use crate::types::{point_hex, point_to_bytes, scalar_hex};
use crate::{Error, Result};
use k256::{ecdsa::VerifyingKey, ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// The only threshold two parties can run
pub const KEYGEN_THRESHOLD: usize = 2;

/// Result of a completed keygen for one party
#[derive(Clone, Serialize, Deserialize)]
pub struct KeygenOutput {
    /// This party's Shamir share of the secret key
    #[serde(with = "scalar_hex")]
    pub private_share: Scalar,
    /// Common public key
    #[serde(with = "point_hex")]
    pub public_key: ProjectivePoint,
}

impl KeygenOutput {
    /// SEC1 compressed public key
    pub fn public_key_bytes(&self) -> Vec<u8> {
        point_to_bytes(&self.public_key)
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_affine(self.public_key.to_affine())
            .map_err(|e| Error::Internal(format!("invalid public key: {e}")))
    }
}

impl fmt::Debug for KeygenOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeygenOutput")
            .field("private_share", &"<redacted>")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish()
    }
}

impl Drop for KeygenOutput {
    fn drop(&mut self) {
        self.private_share.zeroize();
    }
}
