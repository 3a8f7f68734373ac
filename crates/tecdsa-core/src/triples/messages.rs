//! Triples wire messages
//!
//! Per-triple values travel as parallel arrays indexed by batch position.

use crate::crypto::{Commitment, Digest, DlogEqProof, DlogProof, GroupPolynomial, Randomizer};
use crate::oblivious::{BitMatrix, ExtensionCheck, Seed};
use crate::protocol::mailbox;
use crate::types::{WirePoint, WireScalar};
use crate::{Error, Result};
use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};

/// Round-3 reveal of the committed polynomials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriplesReveal {
    pub big_e_i_v: Vec<GroupPolynomial>,
    pub big_f_i_v: Vec<GroupPolynomial>,
    pub big_l_i_v: Vec<GroupPolynomial>,
    pub my_randomizers: Vec<Randomizer>,
    pub my_phi_proof0v: Vec<DlogProof>,
    pub my_phi_proof1v: Vec<DlogProof>,
}

/// Round-4 private shares `e_i(peer)`, `f_i(peer)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriplesShares {
    pub a_i_j_v: Vec<WireScalar>,
    pub b_i_j_v: Vec<WireScalar>,
}

/// Round-5 contributions `C_i = e_i(0)·F(0)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriplesProducts {
    pub big_c_i_points: Vec<WirePoint>,
    pub my_phi_proofs: Vec<DlogEqProof>,
}

/// Round-10 contributions `Ĉ_i = l0·G`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriplesHatProducts {
    pub hat_big_c_i_points: Vec<WirePoint>,
    pub my_phi_proofs: Vec<DlogProof>,
}

/// Round-10 private shares `l_i(peer)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriplesCShares {
    pub c_i_j_v: Vec<WireScalar>,
}

/// MtA sender ciphertexts for `e(0)` and `f(0)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MtaCiphertexts {
    pub c1_v: Vec<Vec<(WireScalar, WireScalar)>>,
    pub c2_v: Vec<Vec<(WireScalar, WireScalar)>>,
}

/// MtA receiver answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MtaAnswers {
    pub chi1_seed_1_v: Vec<(WireScalar, Seed)>,
    pub chi1_seed_2_v: Vec<(WireScalar, Seed)>,
}

mailbox! {
    /// Triples payloads received from the peer
    pub struct RcvdTriplesMessages, slots TriplesSlot {
        wait_0: Vec<Commitment> => Wait0,
        wait_1: Vec<Digest> => Wait1,
        wait_2: TriplesReveal => Wait2,
        wait_3: TriplesShares => Wait3,
        wait_4: TriplesProducts => Wait4,
        wait_5: TriplesHatProducts => Wait5,
        wait_6: TriplesCShares => Wait6,
        batch_random_ot_wait_0: Vec<Vec<WirePoint>> => BatchRandomOt,
        correlated_ot_wait_0: Vec<BitMatrix> => CorrelatedOt,
        random_ot_extension_wait_0: Vec<Seed> => RandomOtExtensionSeed,
        random_ot_extension_wait_1: Vec<ExtensionCheck> => RandomOtExtensionCheck,
        mta_wait_0: MtaCiphertexts => MtaCiphertexts,
        mta_wait_1: MtaAnswers => MtaAnswers,
    }
}

/// Check that a per-triple array covers the whole batch
pub(crate) fn batch_len<T>(v: Vec<T>, expected: usize, field: &str) -> Result<Vec<T>> {
    if v.len() != expected {
        return Err(Error::Malformed(format!(
            "{field} has {} entries, expected {expected}",
            v.len()
        )));
    }
    Ok(v)
}

/// Same as [`batch_len`] for OT payloads, where a mismatch is a desync
pub(crate) fn ot_batch_len<T>(v: Vec<T>, expected: usize, field: &str) -> Result<Vec<T>> {
    batch_len(v, expected, field).map_err(|e| match e {
        Error::Malformed(m) => Error::OtDesync(m),
        other => other,
    })
}

/// One triple's slice of a [`TriplesReveal`]
pub(crate) struct RevealLane {
    pub big_e: GroupPolynomial,
    pub big_f: GroupPolynomial,
    pub big_l: GroupPolynomial,
    pub randomizer: Randomizer,
    pub proof_e: DlogProof,
    pub proof_f: DlogProof,
}

impl TriplesReveal {
    pub(crate) fn into_lanes(self, n: usize) -> Result<Vec<RevealLane>> {
        let big_e = batch_len(self.big_e_i_v, n, "big_e_i_v")?;
        let big_f = batch_len(self.big_f_i_v, n, "big_f_i_v")?;
        let big_l = batch_len(self.big_l_i_v, n, "big_l_i_v")?;
        let randomizers = batch_len(self.my_randomizers, n, "my_randomizers")?;
        let proofs_e = batch_len(self.my_phi_proof0v, n, "my_phi_proof0v")?;
        let proofs_f = batch_len(self.my_phi_proof1v, n, "my_phi_proof1v")?;

        Ok(big_e
            .into_iter()
            .zip(big_f)
            .zip(big_l)
            .zip(randomizers)
            .zip(proofs_e.into_iter().zip(proofs_f))
            .map(|((((big_e, big_f), big_l), randomizer), (proof_e, proof_f))| RevealLane {
                big_e,
                big_f,
                big_l,
                randomizer,
                proof_e,
                proof_f,
            })
            .collect())
    }
}

impl TriplesShares {
    pub(crate) fn into_lanes(self, n: usize) -> Result<Vec<(Scalar, Scalar)>> {
        let a = batch_len(self.a_i_j_v, n, "a_i_j_v")?;
        let b = batch_len(self.b_i_j_v, n, "b_i_j_v")?;
        Ok(a.into_iter().zip(b).map(|(a, b)| (a.0, b.0)).collect())
    }
}

impl TriplesProducts {
    pub(crate) fn into_lanes(self, n: usize) -> Result<Vec<(ProjectivePoint, DlogEqProof)>> {
        let points = batch_len(self.big_c_i_points, n, "big_c_i_points")?;
        let proofs = batch_len(self.my_phi_proofs, n, "my_phi_proofs")?;
        Ok(points.into_iter().map(|p| p.0).zip(proofs).collect())
    }
}

impl TriplesHatProducts {
    pub(crate) fn into_lanes(self, n: usize) -> Result<Vec<(ProjectivePoint, DlogProof)>> {
        let points = batch_len(self.hat_big_c_i_points, n, "hat_big_c_i_points")?;
        let proofs = batch_len(self.my_phi_proofs, n, "my_phi_proofs")?;
        Ok(points.into_iter().map(|p| p.0).zip(proofs).collect())
    }
}

impl TriplesCShares {
    pub(crate) fn into_lanes(self, n: usize) -> Result<Vec<Scalar>> {
        Ok(batch_len(self.c_i_j_v, n, "c_i_j_v")?
            .into_iter()
            .map(|c| c.0)
            .collect())
    }
}

type Ciphertexts = Vec<(Scalar, Scalar)>;

fn unwrap_pairs(v: Vec<(WireScalar, WireScalar)>) -> Ciphertexts {
    v.into_iter().map(|(c0, c1)| (c0.0, c1.0)).collect()
}

impl MtaCiphertexts {
    pub(crate) fn new(lanes: Vec<(Ciphertexts, Ciphertexts)>) -> Self {
        let wrap = |v: Ciphertexts| -> Vec<(WireScalar, WireScalar)> {
            v.into_iter()
                .map(|(c0, c1)| (WireScalar(c0), WireScalar(c1)))
                .collect()
        };
        let (c1_v, c2_v) = lanes
            .into_iter()
            .map(|(c1, c2)| (wrap(c1), wrap(c2)))
            .unzip();
        Self { c1_v, c2_v }
    }

    pub(crate) fn into_lanes(self, n: usize) -> Result<Vec<(Ciphertexts, Ciphertexts)>> {
        let c1 = ot_batch_len(self.c1_v, n, "c1_v")?;
        let c2 = ot_batch_len(self.c2_v, n, "c2_v")?;
        Ok(c1
            .into_iter()
            .zip(c2)
            .map(|(c1, c2)| (unwrap_pairs(c1), unwrap_pairs(c2)))
            .collect())
    }
}

impl MtaAnswers {
    pub(crate) fn new(lanes: Vec<((Scalar, Seed), (Scalar, Seed))>) -> Self {
        let (chi1_seed_1_v, chi1_seed_2_v) = lanes
            .into_iter()
            .map(|((chi1, seed1), (chi2, seed2))| {
                ((WireScalar(chi1), seed1), (WireScalar(chi2), seed2))
            })
            .unzip();
        Self {
            chi1_seed_1_v,
            chi1_seed_2_v,
        }
    }

    #[allow(clippy::type_complexity)]
    pub(crate) fn into_lanes(self, n: usize) -> Result<Vec<((Scalar, Seed), (Scalar, Seed))>> {
        let one = ot_batch_len(self.chi1_seed_1_v, n, "chi1_seed_1_v")?;
        let two = ot_batch_len(self.chi1_seed_2_v, n, "chi1_seed_2_v")?;
        Ok(one
            .into_iter()
            .zip(two)
            .map(|((chi1, seed1), (chi2, seed2))| ((chi1.0, seed1), (chi2.0, seed2)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Mailbox;
    use crate::types::{FromPeer, Role};

    #[test]
    fn test_ot_slot_names() {
        assert_eq!(TriplesSlot::BatchRandomOt.to_string(), "batch_random_ot_wait_0");
        assert_eq!(TriplesSlot::MtaAnswers.to_string(), "mta_wait_1");
        assert_eq!(RcvdTriplesMessages::ALL.len(), 13);
    }

    #[test]
    fn test_shares_field_names() {
        let msg = RcvdTriplesMessages {
            wait_6: Some(FromPeer::new(
                Role::Client,
                TriplesCShares {
                    c_i_j_v: Vec::new(),
                },
            )),
            ..Default::default()
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json["wait_6"]["1"]["c_i_j_v"].is_array());
    }

    #[test]
    fn test_length_checks() {
        assert!(batch_len(vec![1, 2], 2, "x").is_ok());
        assert!(matches!(batch_len(vec![1], 2, "x"), Err(Error::Malformed(_))));
        assert!(matches!(ot_batch_len(vec![1], 2, "x"), Err(Error::OtDesync(_))));
    }

    #[test]
    fn test_uneven_reveal_is_malformed() {
        let reveal = TriplesReveal {
            big_e_i_v: Vec::new(),
            big_f_i_v: Vec::new(),
            big_l_i_v: Vec::new(),
            my_randomizers: vec![Randomizer([0u8; 32])],
            my_phi_proof0v: Vec::new(),
            my_phi_proof1v: Vec::new(),
        };
        assert!(matches!(reveal.into_lanes(0), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_short_mta_answers_desync() {
        let answers = MtaAnswers::new(vec![(
            (Scalar::ONE, Seed([1u8; 32])),
            (Scalar::ONE, Seed([2u8; 32])),
        )]);
        assert!(matches!(answers.into_lanes(2), Err(Error::OtDesync(_))));
    }
}
