//! Triples round machine
//!
//! Rounds 1-5 share `e`, `f`, `l` polynomials per triple and publish
//! `C_i = e_i(0)·F(0)`. Rounds 6-9 run the OT lanes that give each party an
//! additive share `l0` of `e(0)·f(0)`. Rounds 10-11 re-share `l0` and check
//! it against `C`.

use super::messages::{
    batch_len, ot_batch_len, MtaAnswers, MtaCiphertexts, RcvdTriplesMessages, TriplesCShares,
    TriplesHatProducts, TriplesProducts, TriplesReveal, TriplesShares, TriplesSlot,
};
use super::multiplication::OtLane;
use super::{GeneratedTriple, TriplePub, TripleShare, TriplesOutput, TRIPLE_THRESHOLD};
use crate::crypto::{
    commit, confirmation, Commitment, Digest, DlogEqProof, DlogProof, GroupPolynomial,
    Polynomial, ProtocolTranscript, Randomizer,
};
use crate::oblivious::{BitMatrix, Seed, SECURITY_PARAMETER};
use crate::protocol::{take, Protocol, Transition};
use crate::types::{FromPeer, Phase, Role, WirePoint, WireScalar};
use crate::{Error, Result};
use k256::{ProjectivePoint, Scalar};
use merlin::Transcript;
use rand::rngs::OsRng;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

const TRANSCRIPT_LABEL: &[u8] = b"triples";
const PROOF_E_LABEL: &[u8] = b"dlog0";
const PROOF_F_LABEL: &[u8] = b"dlog1";
const PROOF_C_LABEL: &[u8] = b"dlogeq0";
const PROOF_HAT_C_LABEL: &[u8] = b"dlog2";

type Step = (TriplesState, Transition<RcvdTriplesMessages, TriplesOutput>);

/// One triple of the batch
struct Lane<S> {
    index: usize,
    dropped: bool,
    state: S,
}

impl<S> Lane<S> {
    fn map<T>(self, f: impl FnOnce(S) -> T) -> Lane<T> {
        Lane {
            index: self.index,
            dropped: self.dropped,
            state: f(self.state),
        }
    }

    fn step<T, U>(self, f: impl FnOnce(S) -> Result<(T, U)>) -> Result<(Lane<T>, U)> {
        let (state, out) = f(self.state)?;
        Ok((
            Lane {
                index: self.index,
                dropped: self.dropped,
                state,
            },
            out,
        ))
    }

    fn drop_triple(&mut self, reason: &str) {
        if !self.dropped {
            warn!(triple = self.index, reason, "Dropping triple");
        }
        self.dropped = true;
    }
}

/// Round-1 polynomials and their commitment
struct Dealt {
    e: Polynomial,
    f: Polynomial,
    l: Polynomial,
    big_e: GroupPolynomial,
    big_f: GroupPolynomial,
    big_l: GroupPolynomial,
    commitment: Commitment,
    randomizer: Randomizer,
}

struct Agreed {
    dealt: Dealt,
    peer_commitment: Commitment,
    confirmation: Digest,
}

/// Summed public polynomials after the reveal
struct Opened {
    agreed: Agreed,
    big_e: GroupPolynomial,
    big_f: GroupPolynomial,
    big_l: GroupPolynomial,
    peer_big_e0: ProjectivePoint,
}

/// Shares of `a` and `b` plus this party's `C_i`
struct Shared {
    opened: Opened,
    a: Zeroizing<Scalar>,
    b: Zeroizing<Scalar>,
    big_c_i: ProjectivePoint,
}

struct Multiplying {
    shared: Shared,
    big_c: ProjectivePoint,
    ot: OtLane,
}

impl Multiplying {
    fn sid(&self) -> Digest {
        self.shared.opened.agreed.confirmation
    }

    fn e0(&self) -> Scalar {
        self.shared.opened.agreed.dealt.e.constant()
    }

    fn f0(&self) -> Scalar {
        self.shared.opened.agreed.dealt.f.constant()
    }

    fn advance<T>(self, f: impl FnOnce(OtLane) -> Result<(OtLane, T)>) -> Result<(Self, T)> {
        let Multiplying { shared, big_c, ot } = self;
        let (ot, out) = f(ot)?;
        Ok((Multiplying { shared, big_c, ot }, out))
    }
}

/// `l` re-shared with `l(0) = l0`
struct Closing {
    shared: Shared,
    big_c: ProjectivePoint,
    hat_big_c_i: ProjectivePoint,
}

enum TriplesState {
    /// Round 1 sent the commitments
    Committed(Vec<Lane<Dealt>>),
    /// Round 2 sent the confirmations
    Confirmed(Vec<Lane<Agreed>>),
    /// Round 3 revealed the polynomials
    Revealed(Vec<Lane<Agreed>>),
    /// Round 4 sent the shares of `e`, `f`
    Opened(Vec<Lane<Opened>>),
    /// Round 5 sent `C_i`
    Shared(Vec<Lane<Shared>>),
    /// Rounds 6-9: OT lanes in flight
    Multiplying(Vec<Lane<Multiplying>>),
    /// Round 10 sent `Ĉ_i` and the shares of `l`
    Closing(Vec<Lane<Closing>>),
    Done,
}

/// One party's triples run
pub struct TriplesParty {
    role: Role,
    batch: usize,
    transcript: ProtocolTranscript,
    completed: u8,
    state: TriplesState,
}

fn commitment_message(
    owner: Role,
    big_e: &GroupPolynomial,
    big_f: &GroupPolynomial,
    big_l: &GroupPolynomial,
) -> Vec<u8> {
    let mut message = vec![owner.index() as u8];
    big_e.encode_into(&mut message);
    big_f.encode_into(&mut message);
    big_l.encode_into(&mut message);
    message
}

fn outgoing(build: impl FnOnce(&mut RcvdTriplesMessages)) -> RcvdTriplesMessages {
    let mut msg = RcvdTriplesMessages::default();
    build(&mut msg);
    msg
}

impl TriplesParty {
    /// Round 1: sample `e`, `f`, `l` for `2 × pairs` triples and commit.
    pub fn new(role: Role, pairs: usize) -> Result<(Self, RcvdTriplesMessages)> {
        if pairs == 0 {
            return Err(Error::InvalidConfig(
                "triples_count must be at least 1".into(),
            ));
        }
        let batch = 2 * pairs;
        let mut rng = OsRng;

        let lanes: Vec<Lane<Dealt>> = (0..batch)
            .map(|index| {
                let e = Polynomial::random(&mut rng, TRIPLE_THRESHOLD);
                let f = Polynomial::random(&mut rng, TRIPLE_THRESHOLD);
                let mut l = Polynomial::random(&mut rng, TRIPLE_THRESHOLD);
                l.set_constant(Scalar::ZERO);
                let (big_e, big_f, big_l) = (e.commit(), f.commit(), l.commit());
                let (commitment, randomizer) =
                    commit(&mut rng, &commitment_message(role, &big_e, &big_f, &big_l));
                Lane {
                    index,
                    dropped: false,
                    state: Dealt {
                        e,
                        f,
                        l,
                        big_e,
                        big_f,
                        big_l,
                        commitment,
                        randomizer,
                    },
                }
            })
            .collect();

        info!(%role, batch, "Starting triples generation");
        let commitments: Vec<Commitment> = lanes.iter().map(|l| l.state.commitment).collect();
        let msg = outgoing(|m| m.wait_0 = Some(FromPeer::new(role, commitments)));

        Ok((
            Self {
                role,
                batch,
                transcript: ProtocolTranscript::new(TRANSCRIPT_LABEL, TRIPLE_THRESHOLD),
                completed: 1,
                state: TriplesState::Committed(lanes),
            },
            msg,
        ))
    }

    /// Number of triples in the batch
    pub fn batch_size(&self) -> usize {
        self.batch
    }

    fn leads(&self) -> bool {
        self.role == Role::Server
    }

    /// Proof transcript for one triple, bound to its confirmation
    fn lane_transcript(
        &self,
        label: &'static [u8],
        prover: Role,
        index: usize,
        confirmation: &Digest,
    ) -> Transcript {
        let mut t = self.transcript.fork(label, prover, index as u64);
        t.append_message(b"confirmation", &confirmation.0);
        t
    }

    fn send(
        &self,
        build: impl FnOnce(&mut RcvdTriplesMessages, Role),
    ) -> Transition<RcvdTriplesMessages, TriplesOutput> {
        let role = self.role;
        Transition::Sent(Some(outgoing(|m| build(m, role))))
    }

    fn round2(&self, lanes: Vec<Lane<Dealt>>, peer: Vec<Commitment>) -> Result<Step> {
        let peer = batch_len(peer, self.batch, "wait_0")?;
        let role = self.role;
        let lanes: Vec<Lane<Agreed>> = lanes
            .into_iter()
            .zip(peer)
            .map(|(lane, peer_commitment)| {
                lane.map(|dealt| {
                    let ordered = match role {
                        Role::Server => [dealt.commitment, peer_commitment],
                        Role::Client => [peer_commitment, dealt.commitment],
                    };
                    Agreed {
                        confirmation: confirmation(&ordered),
                        dealt,
                        peer_commitment,
                    }
                })
            })
            .collect();

        let digests: Vec<Digest> = lanes.iter().map(|l| l.state.confirmation).collect();
        let transition = self.send(|m, role| m.wait_1 = Some(FromPeer::new(role, digests)));
        Ok((TriplesState::Confirmed(lanes), transition))
    }

    fn round3(&self, lanes: Vec<Lane<Agreed>>, peer: Vec<Digest>) -> Result<Step> {
        let peer = batch_len(peer, self.batch, "wait_1")?;
        for (lane, digest) in lanes.iter().zip(&peer) {
            if !digest.ct_matches(&lane.state.confirmation) {
                return Err(Error::CommitmentVerificationFailed(format!(
                    "triple {}: confirmation digests differ",
                    lane.index
                )));
            }
        }

        let mut rng = OsRng;
        let mut reveal = TriplesReveal {
            big_e_i_v: Vec::with_capacity(self.batch),
            big_f_i_v: Vec::with_capacity(self.batch),
            big_l_i_v: Vec::with_capacity(self.batch),
            my_randomizers: Vec::with_capacity(self.batch),
            my_phi_proof0v: Vec::with_capacity(self.batch),
            my_phi_proof1v: Vec::with_capacity(self.batch),
        };
        for lane in &lanes {
            let agreed = &lane.state;
            let dealt = &agreed.dealt;
            reveal.big_e_i_v.push(dealt.big_e.clone());
            reveal.big_f_i_v.push(dealt.big_f.clone());
            reveal.big_l_i_v.push(dealt.big_l.clone());
            reveal.my_randomizers.push(dealt.randomizer);
            reveal.my_phi_proof0v.push(DlogProof::prove(
                &mut rng,
                &mut self.lane_transcript(PROOF_E_LABEL, self.role, lane.index, &agreed.confirmation),
                &dealt.e.constant(),
                &dealt.big_e.constant(),
            ));
            reveal.my_phi_proof1v.push(DlogProof::prove(
                &mut rng,
                &mut self.lane_transcript(PROOF_F_LABEL, self.role, lane.index, &agreed.confirmation),
                &dealt.f.constant(),
                &dealt.big_f.constant(),
            ));
        }

        let transition = self.send(|m, role| m.wait_2 = Some(FromPeer::new(role, reveal)));
        Ok((TriplesState::Revealed(lanes), transition))
    }

    fn round4(&self, lanes: Vec<Lane<Agreed>>, reveal: TriplesReveal) -> Result<Step> {
        let peer_role = self.role.peer();
        let reveals = reveal.into_lanes(self.batch)?;

        let mut opened = Vec::with_capacity(self.batch);
        let mut shares = TriplesShares {
            a_i_j_v: Vec::with_capacity(self.batch),
            b_i_j_v: Vec::with_capacity(self.batch),
        };
        for (mut lane, peer) in lanes.into_iter().zip(reveals) {
            let message = commitment_message(peer_role, &peer.big_e, &peer.big_f, &peer.big_l);
            if !lane.state.peer_commitment.check(&message, &peer.randomizer) {
                return Err(Error::CommitmentVerificationFailed(format!(
                    "triple {}: reveal does not open the round 1 commitment",
                    lane.index
                )));
            }
            for poly in [&peer.big_e, &peer.big_f, &peer.big_l] {
                if poly.len() != TRIPLE_THRESHOLD {
                    return Err(Error::Malformed(format!(
                        "triple {}: polynomial has {} coefficients, expected {}",
                        lane.index,
                        poly.len(),
                        TRIPLE_THRESHOLD
                    )));
                }
            }

            let confirmation = lane.state.confirmation;
            if peer.big_l.constant() != ProjectivePoint::IDENTITY {
                lane.drop_triple("peer L(0) is not the identity");
            }
            if !peer.proof_e.verify(
                &mut self.lane_transcript(PROOF_E_LABEL, peer_role, lane.index, &confirmation),
                &peer.big_e.constant(),
            ) {
                lane.drop_triple("dlog proof for E(0)");
            }
            if !peer.proof_f.verify(
                &mut self.lane_transcript(PROOF_F_LABEL, peer_role, lane.index, &confirmation),
                &peer.big_f.constant(),
            ) {
                lane.drop_triple("dlog proof for F(0)");
            }

            let dealt = &lane.state.dealt;
            let big_e = dealt.big_e.add(&peer.big_e)?;
            let big_f = dealt.big_f.add(&peer.big_f)?;
            let big_l = dealt.big_l.add(&peer.big_l)?;
            shares.a_i_j_v.push(WireScalar(dealt.e.evaluate_at(peer_role)));
            shares.b_i_j_v.push(WireScalar(dealt.f.evaluate_at(peer_role)));

            opened.push(lane.map(|agreed| Opened {
                agreed,
                big_e,
                big_f,
                big_l,
                peer_big_e0: peer.big_e.constant(),
            }));
        }

        let transition = self.send(|m, role| m.wait_3 = Some(FromPeer::new(role, shares)));
        Ok((TriplesState::Opened(opened), transition))
    }

    fn round5(&self, lanes: Vec<Lane<Opened>>, shares: TriplesShares) -> Result<Step> {
        let mut rng = OsRng;
        let peer_shares = shares.into_lanes(self.batch)?;

        let mut shared = Vec::with_capacity(self.batch);
        let mut products = TriplesProducts {
            big_c_i_points: Vec::with_capacity(self.batch),
            my_phi_proofs: Vec::with_capacity(self.batch),
        };
        for (mut lane, (a_j, b_j)) in lanes.into_iter().zip(peer_shares) {
            let opened = &lane.state;
            let dealt = &opened.agreed.dealt;
            let a = dealt.e.evaluate_at(self.role) + a_j;
            let b = dealt.f.evaluate_at(self.role) + b_j;
            let e_ok = opened.big_e.evaluate_at(self.role) == ProjectivePoint::GENERATOR * a;
            let f_ok = opened.big_f.evaluate_at(self.role) == ProjectivePoint::GENERATOR * b;

            let e0 = dealt.e.constant();
            let big_f0 = opened.big_f.constant();
            let big_c_i = big_f0 * e0;
            let proof = DlogEqProof::prove(
                &mut rng,
                &mut self.lane_transcript(
                    PROOF_C_LABEL,
                    self.role,
                    lane.index,
                    &opened.agreed.confirmation,
                ),
                &e0,
                &big_f0,
                &dealt.big_e.constant(),
                &big_c_i,
            );
            products.big_c_i_points.push(WirePoint(big_c_i));
            products.my_phi_proofs.push(proof);

            if !e_ok {
                lane.drop_triple("share of e is off the committed polynomial");
            }
            if !f_ok {
                lane.drop_triple("share of f is off the committed polynomial");
            }
            shared.push(lane.map(|opened| Shared {
                opened,
                a: Zeroizing::new(a),
                b: Zeroizing::new(b),
                big_c_i,
            }));
        }

        let transition = self.send(|m, role| m.wait_4 = Some(FromPeer::new(role, products)));
        Ok((TriplesState::Shared(shared), transition))
    }

    /// Round 6: check the peer's `C_i`, then open the base OTs
    fn round6(
        &self,
        lanes: Vec<Lane<Shared>>,
        products: TriplesProducts,
        offer: Option<Vec<Vec<WirePoint>>>,
    ) -> Result<Step> {
        let mut rng = OsRng;
        let peer_role = self.role.peer();
        let peer_products = products.into_lanes(self.batch)?;

        let offered_ys = match offer {
            Some(outer) => {
                let mut outer = ot_batch_len(outer, 1, "batch_random_ot_wait_0")?;
                let ys = outer.pop().unwrap_or_default();
                Some(ot_batch_len(ys, self.batch, "batch_random_ot_wait_0[0]")?)
            }
            None if self.leads() => None,
            None => {
                return Err(Error::Internal(
                    "follower reached round 6 without the leader's offer".into(),
                ))
            }
        };

        let mut multiplying = Vec::with_capacity(self.batch);
        let mut per_lane_points = Vec::with_capacity(self.batch);
        for (i, (mut lane, (peer_c, proof))) in lanes.into_iter().zip(peer_products).enumerate() {
            let opened = &lane.state.opened;
            if !proof.verify(
                &mut self.lane_transcript(
                    PROOF_C_LABEL,
                    peer_role,
                    lane.index,
                    &opened.agreed.confirmation,
                ),
                &opened.big_f.constant(),
                &opened.peer_big_e0,
                &peer_c,
            ) {
                lane.drop_triple("dlogeq proof for C_i");
            }
            let big_c = lane.state.big_c_i + peer_c;

            let (ot, points) = match &offered_ys {
                None => {
                    let (ot, big_y) = OtLane::offer(&mut rng);
                    (ot, vec![big_y])
                }
                Some(ys) => OtLane::choose(&mut rng, &ys[i].0),
            };
            per_lane_points.push(points);
            multiplying.push(lane.map(|shared| Multiplying { shared, big_c, ot }));
        }

        // leader: one Y per triple; follower: 128 X points per triple, bit-major
        let wire: Vec<Vec<WirePoint>> = if self.leads() {
            vec![per_lane_points
                .into_iter()
                .flatten()
                .map(WirePoint)
                .collect()]
        } else {
            let mut columns = vec![Vec::with_capacity(self.batch); SECURITY_PARAMETER];
            for points in per_lane_points {
                for (column, x) in columns.iter_mut().zip(points) {
                    column.push(WirePoint(x));
                }
            }
            columns
        };

        let transition =
            self.send(|m, role| m.batch_random_ot_wait_0 = Some(FromPeer::new(role, wire)));
        Ok((TriplesState::Multiplying(multiplying), transition))
    }

    /// Leader round 7: base keys, then the correction matrix per triple
    fn leader_round7(
        &self,
        lanes: Vec<Lane<Multiplying>>,
        answer: Vec<Vec<WirePoint>>,
    ) -> Result<Step> {
        let mut rng = OsRng;
        let columns = ot_batch_len(answer, SECURITY_PARAMETER, "batch_random_ot_wait_0")?;
        let columns = columns
            .into_iter()
            .map(|c| ot_batch_len(c, self.batch, "batch_random_ot_wait_0 column"))
            .collect::<Result<Vec<_>>>()?;

        let mut next = Vec::with_capacity(self.batch);
        let mut matrices: Vec<BitMatrix> = Vec::with_capacity(self.batch);
        for (i, lane) in lanes.into_iter().enumerate() {
            let big_xs: Vec<ProjectivePoint> = columns.iter().map(|c| c[i].0).collect();
            let sid = lane.state.sid();
            let (lane, u) =
                lane.step(|m| m.advance(|ot| ot.correlate(&mut rng, sid, &big_xs)))?;
            matrices.push(u);
            next.push(lane);
        }

        let transition =
            self.send(|m, role| m.correlated_ot_wait_0 = Some(FromPeer::new(role, matrices)));
        Ok((TriplesState::Multiplying(next), transition))
    }

    /// Follower round 7: correction matrices in, check seeds out
    fn follower_round7(
        &self,
        lanes: Vec<Lane<Multiplying>>,
        matrices: Vec<BitMatrix>,
    ) -> Result<Step> {
        let mut rng = OsRng;
        let matrices = ot_batch_len(matrices, self.batch, "correlated_ot_wait_0")?;

        let mut next = Vec::with_capacity(self.batch);
        let mut seeds: Vec<Seed> = Vec::with_capacity(self.batch);
        for (lane, u) in lanes.into_iter().zip(&matrices) {
            let sid = lane.state.sid();
            let (lane, seed) = lane.step(|m| m.advance(|ot| ot.correct(&mut rng, sid, u)))?;
            seeds.push(seed);
            next.push(lane);
        }

        let transition =
            self.send(|m, role| m.random_ot_extension_wait_0 = Some(FromPeer::new(role, seeds)));
        Ok((TriplesState::Multiplying(next), transition))
    }

    /// Leader round 8: check values for the follower
    fn leader_round8(&self, lanes: Vec<Lane<Multiplying>>, seeds: Vec<Seed>) -> Result<Step> {
        let seeds = ot_batch_len(seeds, self.batch, "random_ot_extension_wait_0")?;

        let mut next = Vec::with_capacity(self.batch);
        let mut checks = Vec::with_capacity(self.batch);
        for (lane, seed) in lanes.into_iter().zip(&seeds) {
            let (lane, check) = lane.step(|m| m.advance(|ot| ot.extend(seed)))?;
            checks.push(check);
            next.push(lane);
        }

        let transition =
            self.send(|m, role| m.random_ot_extension_wait_1 = Some(FromPeer::new(role, checks)));
        Ok((TriplesState::Multiplying(next), transition))
    }

    /// Follower round 8: verify the extension and start both MtAs
    fn follower_round8(
        &self,
        lanes: Vec<Lane<Multiplying>>,
        checks: Vec<crate::oblivious::ExtensionCheck>,
    ) -> Result<Step> {
        let mut rng = OsRng;
        let checks = ot_batch_len(checks, self.batch, "random_ot_extension_wait_1")?;

        let mut next = Vec::with_capacity(self.batch);
        let mut ciphertexts = Vec::with_capacity(self.batch);
        for (lane, check) in lanes.into_iter().zip(&checks) {
            let (e0, f0) = (lane.state.e0(), lane.state.f0());
            let (lane, c) = lane.step(|m| {
                m.advance(|ot| {
                    let (ot, c1, c2) = ot.mask(&mut rng, check, &e0, &f0)?;
                    Ok((ot, (c1, c2)))
                })
            })?;
            ciphertexts.push(c);
            next.push(lane);
        }

        let payload = MtaCiphertexts::new(ciphertexts);
        let transition = self.send(|m, role| m.mta_wait_0 = Some(FromPeer::new(role, payload)));
        Ok((TriplesState::Multiplying(next), transition))
    }

    /// Leader round 9: MtA receiver
    fn leader_round9(
        &self,
        lanes: Vec<Lane<Multiplying>>,
        ciphertexts: MtaCiphertexts,
    ) -> Result<Step> {
        let mut rng = OsRng;
        let ciphertexts = ciphertexts.into_lanes(self.batch)?;

        let mut next = Vec::with_capacity(self.batch);
        let mut answers = Vec::with_capacity(self.batch);
        for (lane, (c1, c2)) in lanes.into_iter().zip(&ciphertexts) {
            let (e0, f0) = (lane.state.e0(), lane.state.f0());
            let (lane, answer) = lane.step(|m| {
                m.advance(|ot| {
                    let (ot, one, two) = ot.receive(&mut rng, &e0, &f0, c1, c2)?;
                    Ok((ot, (one, two)))
                })
            })?;
            answers.push(answer);
            next.push(lane);
        }

        let payload = MtaAnswers::new(answers);
        let transition = self.send(|m, role| m.mta_wait_1 = Some(FromPeer::new(role, payload)));
        Ok((TriplesState::Multiplying(next), transition))
    }

    /// Follower round 9: MtA sender finish, nothing to send
    fn follower_round9(&self, lanes: Vec<Lane<Multiplying>>, answers: MtaAnswers) -> Result<Step> {
        let answers = answers.into_lanes(self.batch)?;

        let mut next = Vec::with_capacity(self.batch);
        for (lane, (one, two)) in lanes.into_iter().zip(&answers) {
            let (e0, f0) = (lane.state.e0(), lane.state.f0());
            let (lane, ()) =
                lane.step(|m| m.advance(|ot| Ok((ot.unmask(&e0, &f0, one, two)?, ()))))?;
            next.push(lane);
        }
        Ok((TriplesState::Multiplying(next), Transition::Sent(None)))
    }

    /// Round 10: re-share `l` with `l(0) = l0`
    fn round10(&self, lanes: Vec<Lane<Multiplying>>) -> Result<Step> {
        let mut rng = OsRng;
        let peer_role = self.role.peer();

        let mut closing = Vec::with_capacity(self.batch);
        let mut hat = TriplesHatProducts {
            hat_big_c_i_points: Vec::with_capacity(self.batch),
            my_phi_proofs: Vec::with_capacity(self.batch),
        };
        let mut c_shares = TriplesCShares {
            c_i_j_v: Vec::with_capacity(self.batch),
        };
        for lane in lanes {
            let index = lane.index;
            let (lane, ()) = lane.step(|m| {
                let l0 = Zeroizing::new(m.ot.product_share()?);
                let Multiplying {
                    mut shared, big_c, ..
                } = m;
                let agreed = &mut shared.opened.agreed;
                agreed.dealt.l.set_constant(*l0);

                let hat_big_c_i = ProjectivePoint::GENERATOR * *l0;
                let proof = DlogProof::prove(
                    &mut rng,
                    &mut self.lane_transcript(
                        PROOF_HAT_C_LABEL,
                        self.role,
                        index,
                        &agreed.confirmation,
                    ),
                    &l0,
                    &hat_big_c_i,
                );
                hat.hat_big_c_i_points.push(WirePoint(hat_big_c_i));
                hat.my_phi_proofs.push(proof);
                c_shares
                    .c_i_j_v
                    .push(WireScalar(agreed.dealt.l.evaluate_at(peer_role)));

                Ok((
                    Closing {
                        shared,
                        big_c,
                        hat_big_c_i,
                    },
                    (),
                ))
            })?;
            closing.push(lane);
        }

        let transition = self.send(|m, role| {
            m.wait_5 = Some(FromPeer::new(role, hat));
            m.wait_6 = Some(FromPeer::new(role, c_shares));
        });
        Ok((TriplesState::Closing(closing), transition))
    }

    /// Round 11: check `L(0) = Ĉ = C` and the shares of `c`
    fn round11(
        &self,
        lanes: Vec<Lane<Closing>>,
        hat: TriplesHatProducts,
        c_shares: TriplesCShares,
    ) -> Result<TriplesOutput> {
        let peer_role = self.role.peer();
        let hat = hat.into_lanes(self.batch)?;
        let c_shares = c_shares.into_lanes(self.batch)?;

        let mut output = TriplesOutput::default();
        for ((mut lane, (peer_hat, proof)), c_j) in lanes.into_iter().zip(hat).zip(c_shares) {
            let closing = &lane.state;
            let opened = &closing.shared.opened;
            let verified = proof.verify(
                &mut self.lane_transcript(
                    PROOF_HAT_C_LABEL,
                    peer_role,
                    lane.index,
                    &opened.agreed.confirmation,
                ),
                &peer_hat,
            );

            let hat_big_c = closing.hat_big_c_i + peer_hat;
            let mut big_l = opened.big_l.clone();
            big_l.set_constant(hat_big_c);
            let c = opened.agreed.dealt.l.evaluate_at(self.role) + c_j;
            let c_ok = big_l.evaluate_at(self.role) == ProjectivePoint::GENERATOR * c;
            let matches_c = hat_big_c == closing.big_c;

            if !verified {
                lane.drop_triple("dlog proof for the re-shared l0");
            }
            if !matches_c {
                lane.drop_triple("L(0) does not match C");
            }
            if !c_ok {
                lane.drop_triple("share of c is off the committed polynomial");
            }
            if lane.dropped {
                output.dropped.push(lane.index);
                continue;
            }

            let closing = &lane.state;
            let opened = &closing.shared.opened;
            output.triples.push(GeneratedTriple {
                index: lane.index,
                public: TriplePub::new(
                    opened.big_e.constant(),
                    opened.big_f.constant(),
                    closing.big_c,
                ),
                share: TripleShare {
                    a: *closing.shared.a,
                    b: *closing.shared.b,
                    c,
                },
            });
        }

        if output.triples.is_empty() {
            return Err(Error::ProofVerificationFailed(
                "every triple in the batch was dropped".into(),
            ));
        }
        Ok(output)
    }
}

impl Protocol for TriplesParty {
    type Inbox = RcvdTriplesMessages;
    type Output = TriplesOutput;

    const PHASE: Phase = Phase::Triples;
    const ROUNDS: u8 = 11;

    fn role(&self) -> Role {
        self.role
    }

    fn rounds_completed(&self) -> u8 {
        self.completed
    }

    fn consumed_in(role: Role, slot: TriplesSlot) -> Option<u8> {
        use TriplesSlot::*;
        match (slot, role) {
            (Wait0, _) => Some(2),
            (Wait1, _) => Some(3),
            (Wait2, _) => Some(4),
            (Wait3, _) => Some(5),
            (Wait4, _) => Some(6),
            (BatchRandomOt, Role::Client) => Some(6),
            (BatchRandomOt, Role::Server) => Some(7),
            (CorrelatedOt, Role::Client) => Some(7),
            (RandomOtExtensionSeed, Role::Server) => Some(8),
            (RandomOtExtensionCheck, Role::Client) => Some(8),
            (MtaCiphertexts, Role::Server) => Some(9),
            (MtaAnswers, Role::Client) => Some(9),
            (Wait5, _) | (Wait6, _) => Some(11),
            _ => None,
        }
    }

    fn proceed(
        &mut self,
        inbox: &mut RcvdTriplesMessages,
    ) -> Result<Transition<RcvdTriplesMessages, TriplesOutput>> {
        if !self.ready(inbox) {
            return Ok(Transition::Blocked);
        }
        let round = self.completed + 1;
        debug!(role = %self.role, round, "Triples step");

        let leads = self.leads();
        let state = std::mem::replace(&mut self.state, TriplesState::Done);
        let (next, transition) = match (state, round) {
            (TriplesState::Committed(lanes), _) => {
                let peer = take(&mut inbox.wait_0, "wait_0")?;
                self.round2(lanes, peer)?
            }
            (TriplesState::Confirmed(lanes), _) => {
                let peer = take(&mut inbox.wait_1, "wait_1")?;
                self.round3(lanes, peer)?
            }
            (TriplesState::Revealed(lanes), _) => {
                let reveal = take(&mut inbox.wait_2, "wait_2")?;
                self.round4(lanes, reveal)?
            }
            (TriplesState::Opened(lanes), _) => {
                let shares = take(&mut inbox.wait_3, "wait_3")?;
                self.round5(lanes, shares)?
            }
            (TriplesState::Shared(lanes), _) => {
                let products = take(&mut inbox.wait_4, "wait_4")?;
                let offer = if leads {
                    None
                } else {
                    Some(take(
                        &mut inbox.batch_random_ot_wait_0,
                        "batch_random_ot_wait_0",
                    )?)
                };
                self.round6(lanes, products, offer)?
            }
            (TriplesState::Multiplying(lanes), 7) if leads => {
                let answer = take(&mut inbox.batch_random_ot_wait_0, "batch_random_ot_wait_0")?;
                self.leader_round7(lanes, answer)?
            }
            (TriplesState::Multiplying(lanes), 7) => {
                let matrices = take(&mut inbox.correlated_ot_wait_0, "correlated_ot_wait_0")?;
                self.follower_round7(lanes, matrices)?
            }
            (TriplesState::Multiplying(lanes), 8) if leads => {
                let seeds = take(
                    &mut inbox.random_ot_extension_wait_0,
                    "random_ot_extension_wait_0",
                )?;
                self.leader_round8(lanes, seeds)?
            }
            (TriplesState::Multiplying(lanes), 8) => {
                let checks = take(
                    &mut inbox.random_ot_extension_wait_1,
                    "random_ot_extension_wait_1",
                )?;
                self.follower_round8(lanes, checks)?
            }
            (TriplesState::Multiplying(lanes), 9) if leads => {
                let ciphertexts = take(&mut inbox.mta_wait_0, "mta_wait_0")?;
                self.leader_round9(lanes, ciphertexts)?
            }
            (TriplesState::Multiplying(lanes), 9) => {
                let answers = take(&mut inbox.mta_wait_1, "mta_wait_1")?;
                self.follower_round9(lanes, answers)?
            }
            (TriplesState::Multiplying(lanes), 10) => self.round10(lanes)?,
            (TriplesState::Closing(lanes), _) => {
                let hat = take(&mut inbox.wait_5, "wait_5")?;
                let c_shares = take(&mut inbox.wait_6, "wait_6")?;
                let output = self.round11(lanes, hat, c_shares)?;
                info!(
                    role = %self.role,
                    produced = output.triples.len(),
                    dropped = output.dropped.len(),
                    "Triples generation completed"
                );
                (TriplesState::Done, Transition::Finished(output))
            }
            (TriplesState::Multiplying(_), round) => {
                return Err(Error::Internal(format!(
                    "OT lanes have no step {round}"
                )));
            }
            (TriplesState::Done, _) => {
                return Err(Error::Internal("triples already finished".into()));
            }
        };

        self.state = next;
        self.completed = round;
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Mailbox;
    use crate::triples::combine_triple;

    type Feed = (Vec<RcvdTriplesMessages>, Option<TriplesOutput>);

    fn feed(
        party: &mut TriplesParty,
        inbox: &mut RcvdTriplesMessages,
        msg: RcvdTriplesMessages,
    ) -> Result<Feed> {
        inbox.absorb(msg).unwrap();
        let mut out = Vec::new();
        loop {
            match party.proceed(inbox)? {
                Transition::Blocked => return Ok((out, None)),
                Transition::Sent(Some(m)) => out.push(m),
                Transition::Sent(None) => {}
                Transition::Finished(o) => return Ok((out, Some(o))),
            }
        }
    }

    /// Run both parties; the hooks may rewrite messages in flight
    fn run_triples(
        pairs: usize,
        to_server_hook: impl Fn(&mut RcvdTriplesMessages),
        to_client_hook: impl Fn(&mut RcvdTriplesMessages),
    ) -> Result<(TriplesOutput, TriplesOutput)> {
        let (mut server, m0) = TriplesParty::new(Role::Server, pairs)?;
        let (mut client, m1) = TriplesParty::new(Role::Client, pairs)?;
        let (mut inbox_s, mut inbox_c) = Default::default();

        let mut to_server = vec![m1];
        let mut to_client = vec![m0];
        let (mut out_s, mut out_c) = (None, None);
        while out_s.is_none() || out_c.is_none() {
            assert!(!to_server.is_empty() || !to_client.is_empty(), "stalled");
            let mut next_client = Vec::new();
            for mut m in to_server.drain(..) {
                to_server_hook(&mut m);
                let (msgs, o) = feed(&mut server, &mut inbox_s, m)?;
                next_client.extend(msgs);
                out_s = out_s.or(o);
            }
            let mut next_server = Vec::new();
            for mut m in to_client.drain(..) {
                to_client_hook(&mut m);
                let (msgs, o) = feed(&mut client, &mut inbox_c, m)?;
                next_server.extend(msgs);
                out_c = out_c.or(o);
            }
            to_server = next_server;
            to_client = next_client;
        }
        Ok((out_s.unwrap(), out_c.unwrap()))
    }

    #[test]
    fn test_triples_are_valid_products() {
        let (server, client) = run_triples(1, |_| {}, |_| {}).unwrap();
        assert_eq!(server.triples.len(), 2);
        assert_eq!(client.triples.len(), 2);
        assert!(server.dropped.is_empty());
        assert_eq!(server.pairs().len(), 1);

        for (s, c) in server.triples.iter().zip(&client.triples) {
            assert_eq!(s.public, c.public);
            let (a, b, c_val) = combine_triple(&s.share, &c.share);
            assert_eq!(a * b, c_val);
            assert_eq!(ProjectivePoint::GENERATOR * a, s.public.big_a);
            assert_eq!(ProjectivePoint::GENERATOR * b, s.public.big_b);
            assert_eq!(ProjectivePoint::GENERATOR * c_val, s.public.big_c);
        }
    }

    #[test]
    fn test_rejects_empty_batch() {
        assert!(matches!(
            TriplesParty::new(Role::Client, 0),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ot_slot_ownership() {
        assert_eq!(
            TriplesParty::consumed_in(Role::Server, TriplesSlot::MtaAnswers),
            None
        );
        assert_eq!(
            TriplesParty::consumed_in(Role::Client, TriplesSlot::MtaAnswers),
            Some(9)
        );
        assert_eq!(
            TriplesParty::consumed_in(Role::Client, TriplesSlot::BatchRandomOt),
            Some(6)
        );
    }

    #[test]
    fn test_swapped_check_seed_desyncs() {
        let result = run_triples(
            1,
            |m| {
                if let Some(seeds) = m.random_ot_extension_wait_0.as_mut() {
                    seeds.payload[0] = Seed([0x5a; 32]);
                }
            },
            |_| {},
        );
        assert!(matches!(result, Err(Error::OtDesync(_))));
    }

    #[test]
    fn test_short_matrix_batch_desyncs() {
        let result = run_triples(
            1,
            |_| {},
            |m| {
                if let Some(matrices) = m.correlated_ot_wait_0.as_mut() {
                    matrices.payload.pop();
                }
            },
        );
        assert!(matches!(result, Err(Error::OtDesync(_))));
    }

    #[test]
    fn test_all_triples_dropped_fails() {
        let result = run_triples(
            1,
            |m| {
                if let Some(products) = m.wait_4.as_mut() {
                    for point in products.payload.big_c_i_points.iter_mut() {
                        *point = WirePoint(ProjectivePoint::GENERATOR);
                    }
                }
            },
            |_| {},
        );
        assert!(matches!(result, Err(Error::ProofVerificationFailed(_))));
    }

    #[test]
    fn test_forged_product_drops_triple() {
        let (server, client) = run_triples(
            1,
            |m| {
                if let Some(products) = m.wait_4.as_mut() {
                    products.payload.big_c_i_points[1] = WirePoint(ProjectivePoint::GENERATOR);
                }
            },
            |_| {},
        )
        .unwrap();
        assert_eq!(server.dropped, vec![1]);
        assert_eq!(server.triples.len(), 1);
        assert!(server.pairs().is_empty());
        // the client only saw honest messages
        assert!(client.dropped.is_empty());
    }
}
