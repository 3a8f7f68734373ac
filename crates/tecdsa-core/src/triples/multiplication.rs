//! Per-triple OT lane computing additive shares of `e(0)·f(0)`
//!
//! The leader (server) is base-OT sender, extension receiver and MtA
//! receiver. The follower (client) takes the opposite side of each.

use crate::crypto::Digest;
use crate::oblivious::{
    mta::mta_receive, BaseOtReceiver, BaseOtSender, BitMatrix, CorrelatedReceiver,
    CorrelatedSender, ExtensionCheck, MtaSender, Seed, MTA_BATCH,
};
use crate::{Error, Result};
use k256::{ProjectivePoint, Scalar};
use rand::Rng;
use rand_core::CryptoRngCore;
use zeroize::Zeroizing;

/// MtA answer: `chi_1` and the seed expanding the remaining coefficients
pub(super) type MtaAnswer = (Scalar, Seed);

pub(super) enum OtLane {
    LeaderOffered(BaseOtSender),
    LeaderCorrelated(CorrelatedReceiver),
    LeaderExtended {
        first: Vec<(bool, Scalar)>,
        second: Vec<(bool, Scalar)>,
    },
    FollowerChosen {
        delta: Zeroizing<u128>,
        keys: Zeroizing<Vec<u128>>,
    },
    FollowerCorrected(CorrelatedSender),
    FollowerMasked {
        first: MtaSender,
        second: MtaSender,
    },
    /// Additive share of `e(0)·f(0)`
    Multiplied(Zeroizing<Scalar>),
}

fn out_of_step(lane: &OtLane, step: &str) -> Error {
    let state = match lane {
        OtLane::LeaderOffered(_) => "leader offered",
        OtLane::LeaderCorrelated(_) => "leader correlated",
        OtLane::LeaderExtended { .. } => "leader extended",
        OtLane::FollowerChosen { .. } => "follower chosen",
        OtLane::FollowerCorrected(_) => "follower corrected",
        OtLane::FollowerMasked { .. } => "follower masked",
        OtLane::Multiplied(_) => "multiplied",
    };
    Error::Internal(format!("OT lane cannot {step} in state {state}"))
}

impl OtLane {
    /// Leader round 6: base-OT sender key `Y`
    pub(super) fn offer(rng: &mut impl CryptoRngCore) -> (Self, ProjectivePoint) {
        let (sender, big_y) = BaseOtSender::start(rng);
        (OtLane::LeaderOffered(sender), big_y)
    }

    /// Follower round 6: pick `Δ` and answer `Y`
    pub(super) fn choose(
        rng: &mut impl CryptoRngCore,
        big_y: &ProjectivePoint,
    ) -> (Self, Vec<ProjectivePoint>) {
        let delta: u128 = rng.gen();
        let (big_xs, keys) = BaseOtReceiver::choose(rng, delta, big_y);
        (
            OtLane::FollowerChosen {
                delta: Zeroizing::new(delta),
                keys: Zeroizing::new(keys),
            },
            big_xs,
        )
    }

    /// Leader round 7: derive base keys and send the correction matrix
    pub(super) fn correlate(
        self,
        rng: &mut impl CryptoRngCore,
        sid: Digest,
        big_xs: &[ProjectivePoint],
    ) -> Result<(Self, BitMatrix)> {
        let sender = match self {
            OtLane::LeaderOffered(sender) => sender,
            other => return Err(out_of_step(&other, "correlate")),
        };
        let (k0, k1) = sender.finish(big_xs)?;
        let (k0, k1) = (Zeroizing::new(k0), Zeroizing::new(k1));
        let (receiver, u) = CorrelatedReceiver::start(rng, sid, &k0, &k1)?;
        Ok((OtLane::LeaderCorrelated(receiver), u))
    }

    /// Follower round 7: absorb the correction matrix and pick the check seed
    pub(super) fn correct(
        self,
        rng: &mut impl CryptoRngCore,
        sid: Digest,
        u: &BitMatrix,
    ) -> Result<(Self, Seed)> {
        let (delta, keys) = match self {
            OtLane::FollowerChosen { delta, keys } => (delta, keys),
            other => return Err(out_of_step(&other, "correct")),
        };
        let (sender, seed) = CorrelatedSender::start(rng, sid, *delta, &keys, u)?;
        Ok((OtLane::FollowerCorrected(sender), seed))
    }

    /// Leader round 8: answer the seed with check values
    pub(super) fn extend(self, seed: &Seed) -> Result<(Self, ExtensionCheck)> {
        let receiver = match self {
            OtLane::LeaderCorrelated(receiver) => receiver,
            other => return Err(out_of_step(&other, "extend")),
        };
        let (check, mut outputs) = receiver.finish(seed);
        let second = outputs.split_off(MTA_BATCH);
        Ok((
            OtLane::LeaderExtended {
                first: outputs,
                second,
            },
            check,
        ))
    }

    /// Follower round 8: verify the extension and mask `e0`, `f0` for the MtA
    #[allow(clippy::type_complexity)]
    pub(super) fn mask(
        self,
        rng: &mut impl CryptoRngCore,
        check: &ExtensionCheck,
        e0: &Scalar,
        f0: &Scalar,
    ) -> Result<(Self, Vec<(Scalar, Scalar)>, Vec<(Scalar, Scalar)>)> {
        let sender = match self {
            OtLane::FollowerCorrected(sender) => sender,
            other => return Err(out_of_step(&other, "mask")),
        };
        let v = sender.finish(check)?;
        let (first, c1) = MtaSender::start(rng, &v[..MTA_BATCH], e0)?;
        let (second, c2) = MtaSender::start(rng, &v[MTA_BATCH..], f0)?;
        Ok((OtLane::FollowerMasked { first, second }, c1, c2))
    }

    /// Leader round 9: receive both MtAs.
    ///
    /// `c1` masks the follower's `e0` and is multiplied by our `f0`; `c2`
    /// masks the follower's `f0` and is multiplied by our `e0`.
    pub(super) fn receive(
        self,
        rng: &mut impl CryptoRngCore,
        e0: &Scalar,
        f0: &Scalar,
        c1: &[(Scalar, Scalar)],
        c2: &[(Scalar, Scalar)],
    ) -> Result<(Self, MtaAnswer, MtaAnswer)> {
        let (first, second) = match self {
            OtLane::LeaderExtended { first, second } => (first, second),
            other => return Err(out_of_step(&other, "receive")),
        };
        let one = mta_receive(rng, &first, f0, c1)?;
        let two = mta_receive(rng, &second, e0, c2)?;
        let l0 = *e0 * f0 + one.beta + two.beta;
        Ok((
            OtLane::Multiplied(Zeroizing::new(l0)),
            (one.chi1, one.seed),
            (two.chi1, two.seed),
        ))
    }

    /// Follower round 9: finish both MtAs
    pub(super) fn unmask(
        self,
        e0: &Scalar,
        f0: &Scalar,
        one: &MtaAnswer,
        two: &MtaAnswer,
    ) -> Result<Self> {
        let (first, second) = match self {
            OtLane::FollowerMasked { first, second } => (first, second),
            other => return Err(out_of_step(&other, "unmask")),
        };
        let l0 = *e0 * f0 + first.finish(&one.0, &one.1) + second.finish(&two.0, &two.1);
        Ok(OtLane::Multiplied(Zeroizing::new(l0)))
    }

    pub(super) fn product_share(&self) -> Result<Scalar> {
        match self {
            OtLane::Multiplied(l0) => Ok(**l0),
            other => Err(out_of_step(other, "report a product")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::elliptic_curve::Field;
    use rand::rngs::OsRng;

    #[test]
    fn test_lane_shares_sum_to_product() {
        let mut rng = OsRng;
        let sid = Digest([7u8; 32]);
        let (e_l, f_l) = (Scalar::random(&mut rng), Scalar::random(&mut rng));
        let (e_f, f_f) = (Scalar::random(&mut rng), Scalar::random(&mut rng));

        let (leader, big_y) = OtLane::offer(&mut rng);
        let (follower, big_xs) = OtLane::choose(&mut rng, &big_y);
        let (leader, u) = leader.correlate(&mut rng, sid, &big_xs).unwrap();
        let (follower, seed) = follower.correct(&mut rng, sid, &u).unwrap();
        let (leader, check) = leader.extend(&seed).unwrap();
        let (follower, c1, c2) = follower.mask(&mut rng, &check, &e_f, &f_f).unwrap();
        let (leader, one, two) = leader.receive(&mut rng, &e_l, &f_l, &c1, &c2).unwrap();
        let follower = follower.unmask(&e_f, &f_f, &one, &two).unwrap();

        let sum = leader.product_share().unwrap() + follower.product_share().unwrap();
        assert_eq!(sum, (e_l + e_f) * (f_l + f_f));
    }

    #[test]
    fn test_out_of_order_lane_step() {
        let (leader, _) = OtLane::offer(&mut OsRng);
        assert!(matches!(leader.extend(&Seed([0u8; 32])), Err(Error::Internal(_))));
    }
}
