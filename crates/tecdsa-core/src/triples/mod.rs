//! Beaver triple generation
//!
//! Both parties end with Shamir shares of `(a, b, c = a·b)` for every triple
//! plus the public commitments `A = a·G`, `B = b·G`, `C = c·G`. The product is
//! computed with OT-based MtA: the server leads the base OTs and receives in
//! the MtA, the client follows and sends.
//!
//! `triples_count` counts presign-ready pairs, so a batch holds
//! `2 × triples_count` triples. Triple `2k` and `2k + 1` form pair `k`.

mod generation;
mod messages;
mod multiplication;

pub use generation::TriplesParty;
pub use messages::*;

use crate::types::{point_hex, scalar_hex, Role};
use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Threshold of every generated triple
pub const TRIPLE_THRESHOLD: usize = 2;

/// Public part of a triple, identical on both sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriplePub {
    #[serde(with = "point_hex")]
    pub big_a: ProjectivePoint,
    #[serde(with = "point_hex")]
    pub big_b: ProjectivePoint,
    #[serde(with = "point_hex")]
    pub big_c: ProjectivePoint,
    pub participants: Vec<u32>,
    pub threshold: usize,
}

impl TriplePub {
    pub(crate) fn new(big_a: ProjectivePoint, big_b: ProjectivePoint, big_c: ProjectivePoint) -> Self {
        Self {
            big_a,
            big_b,
            big_c,
            participants: Role::BOTH.iter().map(|r| r.index()).collect(),
            threshold: TRIPLE_THRESHOLD,
        }
    }
}

/// This party's shares of one triple
#[derive(Clone, Serialize, Deserialize)]
pub struct TripleShare {
    #[serde(with = "scalar_hex")]
    pub a: Scalar,
    #[serde(with = "scalar_hex")]
    pub b: Scalar,
    #[serde(with = "scalar_hex")]
    pub c: Scalar,
}

impl fmt::Debug for TripleShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TripleShare(<redacted>)")
    }
}

impl Drop for TripleShare {
    fn drop(&mut self) {
        self.a.zeroize();
        self.b.zeroize();
        self.c.zeroize();
    }
}

/// One surviving triple of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedTriple {
    /// Position in the batch
    pub index: usize,
    pub public: TriplePub,
    pub share: TripleShare,
}

/// Result of a triples run for one party
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriplesOutput {
    pub triples: Vec<GeneratedTriple>,
    /// Batch positions whose checks failed
    pub dropped: Vec<usize>,
}

impl TriplesOutput {
    /// Pairs `(2k, 2k + 1)` where both triples survived
    pub fn pairs(&self) -> Vec<(&GeneratedTriple, &GeneratedTriple)> {
        self.triples
            .iter()
            .filter(|t| t.index % 2 == 0)
            .filter_map(|first| {
                self.triples
                    .iter()
                    .find(|t| t.index == first.index + 1)
                    .map(|second| (first, second))
            })
            .collect()
    }
}

/// Rebuild `(a, b, c)` from both parties' shares of the same triple
#[cfg(test)]
pub(crate) fn combine_triple(server: &TripleShare, client: &TripleShare) -> (Scalar, Scalar, Scalar) {
    use crate::crypto::lagrange_at_zero;
    let (ls, lc) = (lagrange_at_zero(Role::Server), lagrange_at_zero(Role::Client));
    (
        ls * server.a + lc * client.a,
        ls * server.b + lc * client.b,
        ls * server.c + lc * client.c,
    )
}

/// Dealer-generated triple as `(server, client)` views, for tests of later phases
#[cfg(test)]
pub(crate) fn deal_triple() -> ((TriplePub, TripleShare), (TriplePub, TripleShare)) {
    use crate::crypto::Polynomial;
    use k256::elliptic_curve::Field;
    use rand::rngs::OsRng;

    let mut rng = OsRng;
    let (a, b) = (Scalar::random(&mut rng), Scalar::random(&mut rng));
    let polys = [a, b, a * b].map(|s| Polynomial::with_constant(&mut rng, s, TRIPLE_THRESHOLD));
    let public = TriplePub::new(
        ProjectivePoint::GENERATOR * a,
        ProjectivePoint::GENERATOR * b,
        ProjectivePoint::GENERATOR * (a * b),
    );
    let share_for = |role: Role| TripleShare {
        a: polys[0].evaluate_at(role),
        b: polys[1].evaluate_at(role),
        c: polys[2].evaluate_at(role),
    };
    (
        (public.clone(), share_for(Role::Server)),
        (public, share_for(Role::Client)),
    )
}
