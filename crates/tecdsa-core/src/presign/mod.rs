//! Presignature generation
//!
//! Turns a keygen output and two unused triples into a nonce commitment `R`
//! and shares `(k, sigma)` that let a single later round produce an ECDSA
//! signature once the message digest is known.

mod messages;
mod rounds;

pub use messages::*;
pub use rounds::PresignParty;

#[cfg(test)]
pub(crate) use rounds::tests::run_presign;

use crate::types::{point_hex, point_to_bytes, scalar_hex};
use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// One party's presignature
#[derive(Clone, Serialize, Deserialize)]
pub struct PresignOutput {
    /// Nonce commitment, common to both parties
    #[serde(with = "point_hex")]
    pub big_r: ProjectivePoint,
    /// Share of the inverse nonce
    #[serde(with = "scalar_hex")]
    pub k: Scalar,
    /// Share of `k·x`
    #[serde(with = "scalar_hex")]
    pub sigma: Scalar,
}

impl fmt::Debug for PresignOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresignOutput")
            .field("big_r", &hex::encode(point_to_bytes(&self.big_r)))
            .field("k", &"<redacted>")
            .field("sigma", &"<redacted>")
            .finish()
    }
}

impl Drop for PresignOutput {
    fn drop(&mut self) {
        self.k.zeroize();
        self.sigma.zeroize();
    }
}
