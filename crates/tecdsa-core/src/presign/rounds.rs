//! Presign round machine
//!
//! Triple `(k, d, kd)` masks the nonce and triple `(a, b, c)` masks the key
//! when forming `sigma`, a share of `k·x`.

use super::messages::{PresignSlot, RcvdPresignMessages};
use super::PresignOutput;
use crate::crypto::lagrange_at_zero;
use crate::keygen::KeygenOutput;
use crate::protocol::{take, Protocol, Transition};
use crate::triples::{TriplePub, TripleShare, TRIPLE_THRESHOLD};
use crate::types::{point_to_bytes, FromPeer, Phase, Role, WirePoint, WireScalar};
use crate::{Error, Result};
use k256::{ProjectivePoint, Scalar};
use tracing::{debug, info};
use zeroize::Zeroizing;

type Step = (PresignState, Transition<RcvdPresignMessages, PresignOutput>);

/// Everything round 1 fixes
struct Inputs {
    public_key: ProjectivePoint,
    x_i: Zeroizing<Scalar>,
    lambda: Scalar,
    /// `(k, d, kd)`
    nonce: (TriplePub, TripleShare),
    /// `(a, b, c)`
    mask: (TriplePub, TripleShare),
}

enum PresignState {
    /// Round 1 sent `kd_i`
    Masked {
        inputs: Inputs,
        kd_i: Zeroizing<Scalar>,
    },
    /// Round 2 sent `(ka_i, xb_i)`
    Combined {
        inputs: Inputs,
        kd: Zeroizing<Scalar>,
        ka_i: Zeroizing<Scalar>,
        xb_i: Zeroizing<Scalar>,
    },
    /// Round 3 sent `R`
    Finalizing(PresignOutput),
    Done,
}

/// One party's presign run
pub struct PresignParty {
    role: Role,
    completed: u8,
    state: PresignState,
}

fn check_triple(public: &TriplePub, name: &str) -> Result<()> {
    let expected: Vec<u32> = Role::BOTH.iter().map(|r| r.index()).collect();
    if public.threshold != TRIPLE_THRESHOLD || public.participants != expected {
        return Err(Error::InvalidConfig(format!(
            "{name} triple was generated for a different participant set"
        )));
    }
    Ok(())
}

fn outgoing(build: impl FnOnce(&mut RcvdPresignMessages)) -> RcvdPresignMessages {
    let mut msg = RcvdPresignMessages::default();
    build(&mut msg);
    msg
}

impl PresignParty {
    /// Round 1: send `kd_i = λ·(kd)_i`.
    ///
    /// `nonce` supplies `(k, d, kd)`, `mask` supplies `(a, b, c)`. Both
    /// triples must be fresh; the caller marks them consumed.
    pub fn new(
        role: Role,
        keygen: &KeygenOutput,
        nonce: (TriplePub, TripleShare),
        mask: (TriplePub, TripleShare),
    ) -> Result<(Self, RcvdPresignMessages)> {
        check_triple(&nonce.0, "nonce")?;
        check_triple(&mask.0, "mask")?;
        if nonce.0 == mask.0 {
            return Err(Error::InvalidConfig(
                "presign needs two distinct triples".into(),
            ));
        }
        if keygen.public_key == ProjectivePoint::IDENTITY {
            return Err(Error::InvalidConfig("public key is the identity".into()));
        }

        let lambda = lagrange_at_zero(role);
        let kd_i = Zeroizing::new(lambda * nonce.1.c);

        debug!(%role, "Presign round 1: masked kd share");
        let msg = outgoing(|m| m.wait_0 = Some(FromPeer::new(role, WireScalar(*kd_i))));

        Ok((
            Self {
                role,
                completed: 1,
                state: PresignState::Masked {
                    inputs: Inputs {
                        public_key: keygen.public_key,
                        x_i: Zeroizing::new(keygen.private_share),
                        lambda,
                        nonce,
                        mask,
                    },
                    kd_i,
                },
            },
            msg,
        ))
    }

    fn round2(&self, inputs: Inputs, kd_i: Zeroizing<Scalar>, kd_j: Scalar) -> Result<Step> {
        if bool::from(kd_j.is_zero()) {
            return Err(Error::Malformed(
                "received a zero share of kd".into(),
            ));
        }
        let kd = Zeroizing::new(*kd_i + kd_j);
        if ProjectivePoint::GENERATOR * *kd != inputs.nonce.0.big_c {
            return Err(Error::CommitmentVerificationFailed(
                "kd shares do not match the triple commitment".into(),
            ));
        }

        let lambda = inputs.lambda;
        let ka_i = Zeroizing::new(lambda * inputs.nonce.1.a + lambda * inputs.mask.1.a);
        let xb_i = Zeroizing::new(lambda * *inputs.x_i + lambda * inputs.mask.1.b);

        let role = self.role;
        let msg = outgoing(|m| {
            m.wait_1 = Some(FromPeer::new(role, (WireScalar(*ka_i), WireScalar(*xb_i))))
        });
        Ok((
            PresignState::Combined {
                inputs,
                kd,
                ka_i,
                xb_i,
            },
            Transition::Sent(Some(msg)),
        ))
    }

    fn round3(
        &self,
        inputs: Inputs,
        kd: Zeroizing<Scalar>,
        (ka_i, xb_i): (Zeroizing<Scalar>, Zeroizing<Scalar>),
        (ka_j, xb_j): (Scalar, Scalar),
    ) -> Result<Step> {
        let ka = Zeroizing::new(*ka_i + ka_j);
        let xb = Zeroizing::new(*xb_i + xb_j);

        let (nonce, mask) = (&inputs.nonce.0, &inputs.mask.0);
        if ProjectivePoint::GENERATOR * *ka != nonce.big_a + mask.big_a {
            return Err(Error::CommitmentVerificationFailed(
                "ka shares do not match K + A".into(),
            ));
        }
        if ProjectivePoint::GENERATOR * *xb != inputs.public_key + mask.big_b {
            return Err(Error::CommitmentVerificationFailed(
                "xb shares do not match X + B".into(),
            ));
        }

        let kd_inv = Option::<Scalar>::from(kd.invert())
            .ok_or_else(|| Error::Malformed("kd is not invertible".into()))?;
        let big_r = nonce.big_b * kd_inv;

        let share = &inputs.mask.1;
        let sigma = *ka * *inputs.x_i - (*xb * share.a - share.c);
        let output = PresignOutput {
            big_r,
            k: inputs.nonce.1.a,
            sigma,
        };

        let role = self.role;
        let msg = outgoing(|m| m.wait_2 = Some(FromPeer::new(role, WirePoint(big_r))));
        Ok((
            PresignState::Finalizing(output),
            Transition::Sent(Some(msg)),
        ))
    }
}

impl Protocol for PresignParty {
    type Inbox = RcvdPresignMessages;
    type Output = PresignOutput;

    const PHASE: Phase = Phase::Presign;
    const ROUNDS: u8 = 3;

    fn role(&self) -> Role {
        self.role
    }

    fn rounds_completed(&self) -> u8 {
        self.completed
    }

    fn consumed_in(_role: Role, slot: PresignSlot) -> Option<u8> {
        Some(match slot {
            PresignSlot::Wait0 => 2,
            PresignSlot::Wait1 => 3,
            PresignSlot::Wait2 => 4,
        })
    }

    fn proceed(
        &mut self,
        inbox: &mut RcvdPresignMessages,
    ) -> Result<Transition<RcvdPresignMessages, PresignOutput>> {
        if !self.ready(inbox) {
            return Ok(Transition::Blocked);
        }
        debug!(role = %self.role, round = self.completed + 1, "Presign step");

        let (next, transition) = match std::mem::replace(&mut self.state, PresignState::Done) {
            PresignState::Masked { inputs, kd_i } => {
                let kd_j = take(&mut inbox.wait_0, "wait_0")?;
                self.round2(inputs, kd_i, kd_j.0)?
            }
            PresignState::Combined {
                inputs,
                kd,
                ka_i,
                xb_i,
            } => {
                let (ka_j, xb_j) = take(&mut inbox.wait_1, "wait_1")?;
                self.round3(inputs, kd, (ka_i, xb_i), (ka_j.0, xb_j.0))?
            }
            PresignState::Finalizing(output) => {
                let peer_r = take(&mut inbox.wait_2, "wait_2")?;
                if peer_r.0 != output.big_r {
                    return Err(Error::NonceMismatch);
                }
                info!(
                    role = %self.role,
                    big_r = hex::encode(point_to_bytes(&output.big_r)),
                    "Presign completed successfully"
                );
                (PresignState::Done, Transition::Finished(output))
            }
            PresignState::Done => {
                return Err(Error::Internal("presign already finished".into()));
            }
        };

        self.state = next;
        self.completed += 1;
        Ok(transition)
    }
}
