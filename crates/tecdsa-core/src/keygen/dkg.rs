//! DKG round machine

use super::messages::{KeygenOpening, KeygenSlot, RcvdKeyshareMessages};
use super::{KeygenOutput, KEYGEN_THRESHOLD};
use crate::crypto::{
    commit, confirmation, Commitment, Digest, DlogProof, GroupPolynomial, Polynomial,
    ProtocolTranscript, Randomizer,
};
use crate::protocol::{take, Protocol, Transition};
use crate::types::{FromPeer, Phase, Role, WirePoint, WireScalar};
use crate::{Error, Result};
use k256::{ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use tracing::{debug, info};
use zeroize::Zeroizing;

const TRANSCRIPT_LABEL: &[u8] = b"keygen";
const PROOF_LABEL: &[u8] = b"dlog0";

type Step = (KeygenState, Transition<RcvdKeyshareMessages, KeygenOutput>);

/// This party's polynomial and its commitment
struct Dealt {
    f: Polynomial,
    big_f: GroupPolynomial,
    commitment: Commitment,
    randomizer: Randomizer,
}

/// What both parties have agreed on after round 2
struct Agreed {
    dealt: Dealt,
    peer_commitment: Commitment,
    confirmation: Digest,
}

enum KeygenState {
    /// Round 1 sent the commitment
    Committed(Dealt),
    /// Round 2 sent the share for the peer
    Shared(Agreed),
    /// Round 3 sent the proof
    Proved {
        agreed: Agreed,
        peer_share: Zeroizing<Scalar>,
    },
    /// Round 4 sent the decommitment
    Opened {
        agreed: Agreed,
        peer_share: Zeroizing<Scalar>,
        peer_proof: DlogProof,
    },
    /// Round 5 sent the public key
    Finalizing(KeygenOutput),
    Done,
}

/// One party's keygen run
pub struct KeygenParty {
    role: Role,
    threshold: usize,
    transcript: ProtocolTranscript,
    completed: u8,
    state: KeygenState,
}

fn commitment_message(owner: Role, big_f: &GroupPolynomial) -> Vec<u8> {
    let mut message = vec![owner.index() as u8];
    big_f.encode_into(&mut message);
    message
}

fn outgoing(build: impl FnOnce(&mut RcvdKeyshareMessages)) -> RcvdKeyshareMessages {
    let mut msg = RcvdKeyshareMessages::default();
    build(&mut msg);
    msg
}

impl KeygenParty {
    /// Round 1: sample the secret polynomial and commit to it
    pub fn new(role: Role, threshold: usize) -> Result<(Self, RcvdKeyshareMessages)> {
        if threshold < 2 {
            return Err(Error::InvalidConfig("Threshold must be at least 2".into()));
        }
        if threshold > KEYGEN_THRESHOLD {
            return Err(Error::InvalidConfig(
                "Threshold cannot exceed number of parties".into(),
            ));
        }

        let mut rng = OsRng;
        let f = Polynomial::random(&mut rng, threshold);
        let big_f = f.commit();
        let (commitment, randomizer) = commit(&mut rng, &commitment_message(role, &big_f));

        debug!(%role, "Keygen round 1: commitment");
        let msg = outgoing(|m| m.wait_0 = Some(FromPeer::new(role, commitment)));

        Ok((
            Self {
                role,
                threshold,
                transcript: ProtocolTranscript::new(TRANSCRIPT_LABEL, threshold),
                completed: 1,
                state: KeygenState::Committed(Dealt {
                    f,
                    big_f,
                    commitment,
                    randomizer,
                }),
            },
            msg,
        ))
    }

    fn round2(&mut self, dealt: Dealt, peer_commitment: Commitment) -> Step {
        let ordered = match self.role {
            Role::Server => [dealt.commitment, peer_commitment],
            Role::Client => [peer_commitment, dealt.commitment],
        };
        let confirmation = confirmation(&ordered);
        self.transcript.bind_confirmation(&confirmation);

        let share = dealt.f.evaluate_at(self.role.peer());
        let role = self.role;
        let msg = outgoing(|m| m.wait_1 = Some(FromPeer::new(role, WireScalar(share))));

        (
            KeygenState::Shared(Agreed {
                dealt,
                peer_commitment,
                confirmation,
            }),
            Transition::Sent(Some(msg)),
        )
    }

    fn round3(&self, agreed: Agreed, peer_share: Scalar) -> Step {
        let proof = DlogProof::prove(
            &mut OsRng,
            &mut self.transcript.fork(PROOF_LABEL, self.role, 0),
            &agreed.dealt.f.constant(),
            &agreed.dealt.big_f.constant(),
        );
        let role = self.role;
        let msg = outgoing(|m| m.wait_2 = Some(FromPeer::new(role, proof)));

        (
            KeygenState::Proved {
                agreed,
                peer_share: Zeroizing::new(peer_share),
            },
            Transition::Sent(Some(msg)),
        )
    }

    fn round4(
        &self,
        agreed: Agreed,
        peer_share: Zeroizing<Scalar>,
        peer_proof: DlogProof,
    ) -> Step {
        let opening = KeygenOpening(
            agreed.dealt.big_f.clone(),
            agreed.dealt.randomizer,
            agreed.confirmation,
        );
        let role = self.role;
        let msg = outgoing(|m| m.wait_3 = Some(FromPeer::new(role, opening)));

        (
            KeygenState::Opened {
                agreed,
                peer_share,
                peer_proof,
            },
            Transition::Sent(Some(msg)),
        )
    }

    fn round5(
        &self,
        agreed: Agreed,
        peer_share: Zeroizing<Scalar>,
        peer_proof: DlogProof,
        opening: KeygenOpening,
    ) -> Result<Step> {
        let KeygenOpening(peer_big_f, peer_randomizer, peer_confirmation) = opening;
        let peer = self.role.peer();

        if !peer_confirmation.ct_matches(&agreed.confirmation) {
            return Err(Error::CommitmentVerificationFailed(
                "confirmation digests differ".into(),
            ));
        }
        if !agreed
            .peer_commitment
            .check(&commitment_message(peer, &peer_big_f), &peer_randomizer)
        {
            return Err(Error::CommitmentVerificationFailed(
                "decommitment does not open the round 1 commitment".into(),
            ));
        }
        if peer_big_f.len() != self.threshold {
            return Err(Error::Malformed(format!(
                "peer polynomial has {} coefficients, expected {}",
                peer_big_f.len(),
                self.threshold
            )));
        }
        if !peer_proof.verify(
            &mut self.transcript.fork(PROOF_LABEL, peer, 0),
            &peer_big_f.constant(),
        ) {
            return Err(Error::ProofVerificationFailed(
                "dlog proof of the peer's secret".into(),
            ));
        }

        let big_f = agreed.dealt.big_f.add(&peer_big_f)?;
        let private_share = agreed.dealt.f.evaluate_at(self.role) + *peer_share;
        if big_f.evaluate_at(self.role) != ProjectivePoint::GENERATOR * private_share {
            return Err(Error::CommitmentVerificationFailed(
                "received share does not lie on the committed polynomial".into(),
            ));
        }

        let public_key = big_f.constant();
        if public_key == ProjectivePoint::IDENTITY {
            return Err(Error::Malformed("public key is the identity".into()));
        }

        let role = self.role;
        let msg = outgoing(|m| m.wait_4 = Some(FromPeer::new(role, WirePoint(public_key))));
        Ok((
            KeygenState::Finalizing(KeygenOutput {
                private_share,
                public_key,
            }),
            Transition::Sent(Some(msg)),
        ))
    }
}

impl Protocol for KeygenParty {
    type Inbox = RcvdKeyshareMessages;
    type Output = KeygenOutput;

    const PHASE: Phase = Phase::Keygen;
    const ROUNDS: u8 = 5;

    fn role(&self) -> Role {
        self.role
    }

    fn rounds_completed(&self) -> u8 {
        self.completed
    }

    fn consumed_in(_role: Role, slot: KeygenSlot) -> Option<u8> {
        Some(match slot {
            KeygenSlot::Wait0 => 2,
            KeygenSlot::Wait1 => 3,
            KeygenSlot::Wait2 => 4,
            KeygenSlot::Wait3 => 5,
            KeygenSlot::Wait4 => 6,
        })
    }

    fn proceed(
        &mut self,
        inbox: &mut RcvdKeyshareMessages,
    ) -> Result<Transition<RcvdKeyshareMessages, KeygenOutput>> {
        if !self.ready(inbox) {
            return Ok(Transition::Blocked);
        }
        debug!(role = %self.role, round = self.completed + 1, "Keygen step");

        let (next, transition) = match std::mem::replace(&mut self.state, KeygenState::Done) {
            KeygenState::Committed(dealt) => {
                let peer_commitment = take(&mut inbox.wait_0, "wait_0")?;
                self.round2(dealt, peer_commitment)
            }
            KeygenState::Shared(agreed) => {
                let peer_share = take(&mut inbox.wait_1, "wait_1")?;
                self.round3(agreed, peer_share.0)
            }
            KeygenState::Proved { agreed, peer_share } => {
                let peer_proof = take(&mut inbox.wait_2, "wait_2")?;
                self.round4(agreed, peer_share, peer_proof)
            }
            KeygenState::Opened {
                agreed,
                peer_share,
                peer_proof,
            } => {
                let opening = take(&mut inbox.wait_3, "wait_3")?;
                self.round5(agreed, peer_share, peer_proof, opening)?
            }
            KeygenState::Finalizing(output) => {
                let peer_key = take(&mut inbox.wait_4, "wait_4")?;
                if peer_key.0 != output.public_key {
                    return Err(Error::PublicKeyMismatch);
                }
                info!(
                    role = %self.role,
                    public_key = hex::encode(output.public_key_bytes()),
                    "Keygen completed successfully"
                );
                (KeygenState::Done, Transition::Finished(output))
            }
            KeygenState::Done => {
                return Err(Error::Internal("keygen already finished".into()));
            }
        };

        self.state = next;
        self.completed += 1;
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Mailbox;

    /// Deliver `msg` to `party`, running every step it unlocks.
    fn feed(
        party: &mut KeygenParty,
        inbox: &mut RcvdKeyshareMessages,
        msg: RcvdKeyshareMessages,
    ) -> (Vec<RcvdKeyshareMessages>, Option<KeygenOutput>) {
        inbox.absorb(msg).unwrap();
        let mut out = Vec::new();
        loop {
            match party.proceed(inbox).unwrap() {
                Transition::Blocked => return (out, None),
                Transition::Sent(Some(m)) => out.push(m),
                Transition::Sent(None) => {}
                Transition::Finished(o) => return (out, Some(o)),
            }
        }
    }

    fn run_keygen() -> (KeygenOutput, KeygenOutput, u8) {
        let (mut server, m0) = KeygenParty::new(Role::Server, 2).unwrap();
        let (mut client, m1) = KeygenParty::new(Role::Client, 2).unwrap();
        let (mut inbox_s, mut inbox_c) = Default::default();

        let mut to_server = vec![m1];
        let mut to_client = vec![m0];
        let (mut out_s, mut out_c) = (None, None);
        let mut exchanges = 0;
        while out_s.is_none() || out_c.is_none() {
            exchanges += 1;
            let mut next_client = Vec::new();
            for m in to_server.drain(..) {
                let (msgs, o) = feed(&mut server, &mut inbox_s, m);
                next_client.extend(msgs);
                out_s = out_s.or(o);
            }
            let mut next_server = Vec::new();
            for m in to_client.drain(..) {
                let (msgs, o) = feed(&mut client, &mut inbox_c, m);
                next_server.extend(msgs);
                out_c = out_c.or(o);
            }
            to_server = next_server;
            to_client = next_client;
        }
        (out_s.unwrap(), out_c.unwrap(), exchanges)
    }

    #[test]
    fn test_keygen_public_keys_match() {
        let (server, client, exchanges) = run_keygen();
        assert_eq!(server.public_key, client.public_key);
        assert_eq!(exchanges, KeygenParty::ROUNDS);

        let secret = crate::keygen::combine_shares(&server, &client).unwrap();
        assert_eq!(ProjectivePoint::GENERATOR * secret, server.public_key);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        assert!(KeygenParty::new(Role::Server, 1).is_err());
        assert!(KeygenParty::new(Role::Server, 3).is_err());
    }

    #[test]
    fn test_tampered_decommitment_is_rejected() {
        let (mut server, m0) = KeygenParty::new(Role::Server, 2).unwrap();
        let (mut client, m1) = KeygenParty::new(Role::Client, 2).unwrap();
        let (mut inbox_s, mut inbox_c): (RcvdKeyshareMessages, RcvdKeyshareMessages) =
            Default::default();

        // rounds 2..4 in lock step
        let (mut to_client, _) = feed(&mut server, &mut inbox_s, m1);
        let (mut to_server, _) = feed(&mut client, &mut inbox_c, m0);
        for _ in 0..2 {
            let (c, _) = feed(&mut server, &mut inbox_s, to_server.remove(0));
            let (s, _) = feed(&mut client, &mut inbox_c, to_client.remove(0));
            to_client = c;
            to_server = s;
        }
        let (_, _) = feed(&mut client, &mut inbox_c, to_client.remove(0));

        // client's round-4 opening with a swapped polynomial
        let mut opening = to_server.remove(0);
        let wait_3 = opening.wait_3.as_mut().unwrap();
        let other = Polynomial::random(&mut OsRng, 2).commit();
        wait_3.payload.0 = other;

        inbox_s.absorb(opening).unwrap();
        assert!(matches!(
            server.proceed(&mut inbox_s),
            Err(Error::CommitmentVerificationFailed(_))
        ));
    }
}
