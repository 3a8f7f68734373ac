//! Schnorr proofs
//!
//! `DlogProof` proves knowledge of `x` with `X = x·G`.
//! `DlogEqProof` proves `X0 = x·G` and `X1 = x·H` for the same `x`.

use super::transcript::{append_point, challenge};
use crate::types::scalar_hex;
use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use merlin::Transcript;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};

/// Proof of knowledge of a discrete logarithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlogProof {
    #[serde(with = "scalar_hex")]
    pub e: Scalar,
    #[serde(with = "scalar_hex")]
    pub s: Scalar,
}

impl DlogProof {
    pub fn prove(
        rng: &mut impl CryptoRngCore,
        transcript: &mut Transcript,
        x: &Scalar,
        big_x: &ProjectivePoint,
    ) -> Self {
        let k = Scalar::random(&mut *rng);
        let big_k = ProjectivePoint::GENERATOR * k;

        append_point(transcript, b"statement", big_x);
        append_point(transcript, b"big_k", &big_k);
        let e = challenge(transcript);

        Self { e, s: k + e * x }
    }

    pub fn verify(&self, transcript: &mut Transcript, big_x: &ProjectivePoint) -> bool {
        let big_k = ProjectivePoint::GENERATOR * self.s - *big_x * self.e;

        append_point(transcript, b"statement", big_x);
        append_point(transcript, b"big_k", &big_k);
        challenge(transcript) == self.e
    }
}

/// Proof that two points share a discrete logarithm w.r.t. `G` and `H`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlogEqProof {
    #[serde(with = "scalar_hex")]
    pub e: Scalar,
    #[serde(with = "scalar_hex")]
    pub s: Scalar,
}

impl DlogEqProof {
    pub fn prove(
        rng: &mut impl CryptoRngCore,
        transcript: &mut Transcript,
        x: &Scalar,
        big_h: &ProjectivePoint,
        big_x0: &ProjectivePoint,
        big_x1: &ProjectivePoint,
    ) -> Self {
        let k = Scalar::random(&mut *rng);
        let big_k0 = ProjectivePoint::GENERATOR * k;
        let big_k1 = *big_h * k;

        append_eq_statement(transcript, big_h, big_x0, big_x1);
        append_point(transcript, b"big_k0", &big_k0);
        append_point(transcript, b"big_k1", &big_k1);
        let e = challenge(transcript);

        Self { e, s: k + e * x }
    }

    pub fn verify(
        &self,
        transcript: &mut Transcript,
        big_h: &ProjectivePoint,
        big_x0: &ProjectivePoint,
        big_x1: &ProjectivePoint,
    ) -> bool {
        let big_k0 = ProjectivePoint::GENERATOR * self.s - *big_x0 * self.e;
        let big_k1 = *big_h * self.s - *big_x1 * self.e;

        append_eq_statement(transcript, big_h, big_x0, big_x1);
        append_point(transcript, b"big_k0", &big_k0);
        append_point(transcript, b"big_k1", &big_k1);
        challenge(transcript) == self.e
    }
}

fn append_eq_statement(
    transcript: &mut Transcript,
    big_h: &ProjectivePoint,
    big_x0: &ProjectivePoint,
    big_x1: &ProjectivePoint,
) {
    append_point(transcript, b"big_h", big_h);
    append_point(transcript, b"statement0", big_x0);
    append_point(transcript, b"statement1", big_x1);
}
