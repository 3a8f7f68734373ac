//! Cryptographic building blocks shared by the protocol phases
//!
//! - Hash commitments and confirmation digests
//! - Fiat-Shamir transcripts
//! - Schnorr proofs of discrete log and discrete-log equality
//! - Scalar polynomials and their group commitments

pub mod commit;
pub mod polynomial;
pub mod proofs;
pub mod transcript;

pub use commit::{commit, confirmation, Commitment, Digest, Randomizer};
pub use polynomial::{lagrange_at_zero, GroupPolynomial, Polynomial};
pub use proofs::{DlogEqProof, DlogProof};
pub use transcript::ProtocolTranscript;

use k256::{
    elliptic_curve::{bigint::U256, ops::Reduce},
    Scalar,
};

/// Reduce 32 uniformly random bytes to a scalar
pub(crate) fn scalar_from_wide(bytes: [u8; 32]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&bytes.into())
}
