//! Distributed Signature Generation (DSG) module
//!
//! One round on top of a presignature: each party publishes
//! `s_i = m·λk_i + r·λσ_i` and both combine and verify the result.

mod dsg;
mod messages;

pub use dsg::SignParty;
pub use messages::*;

use crate::types::{point_hex, scalar_hex};
use crate::{Error, Result};
use k256::{
    ecdsa::{signature::hazmat::PrehashVerifier, RecoveryId, Signature, VerifyingKey},
    elliptic_curve::{bigint::U256, ops::Reduce, point::AffineCoordinates, PrimeField},
    ProjectivePoint, Scalar,
};
use serde::{Deserialize, Serialize};

/// x-coordinate of `point` reduced mod n
pub(crate) fn x_coordinate(point: &ProjectivePoint) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&point.to_affine().x())
}

/// Combined ECDSA signature `(R, s)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullSignature {
    #[serde(with = "point_hex")]
    pub big_r: ProjectivePoint,
    #[serde(with = "scalar_hex")]
    pub s: Scalar,
}

impl FullSignature {
    /// `r`: x-coordinate of `R` reduced mod n
    pub fn r(&self) -> Scalar {
        x_coordinate(&self.big_r)
    }

    pub fn to_signature(&self) -> Result<Signature> {
        Signature::from_scalars(self.r().to_bytes(), self.s.to_bytes())
            .map_err(|_| Error::SignatureCombinationInvalid)
    }

    /// Convert to DER format
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.to_signature()?.to_der().as_bytes().to_vec())
    }

    /// Convert to bytes (r || s)
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r().to_bytes());
        bytes[32..].copy_from_slice(&self.s.to_bytes());
        bytes
    }

    /// Standard ECDSA verification of a 32-byte prehash
    pub fn verify(&self, public_key: &ProjectivePoint, digest: &[u8; 32]) -> bool {
        let Ok(key) = VerifyingKey::from_affine(public_key.to_affine()) else {
            return false;
        };
        match self.to_signature() {
            Ok(sig) => key.verify_prehash(digest, &sig).is_ok(),
            Err(_) => false,
        }
    }
}

/// Result of a sign run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignOutput {
    pub signature: FullSignature,
    /// `s` was negated during low-s normalization
    pub is_high: bool,
}

impl SignOutput {
    /// Recovery id matching the normalized signature
    pub fn recovery_id(&self) -> RecoveryId {
        let affine = self.signature.big_r.to_affine();
        let y_odd = bool::from(affine.y_is_odd()) ^ self.is_high;
        let x = affine.x();
        let x_reduced = bool::from(Scalar::from_repr(x).is_none());
        RecoveryId::new(y_odd, x_reduced)
    }

    /// `r || s || v` with `v` the raw recovery id
    pub fn to_recoverable(&self) -> [u8; 65] {
        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&self.signature.to_bytes());
        bytes[64] = self.recovery_id().to_byte();
        bytes
    }
}
