//! Batch random OT over secp256k1
//!
//! The sender publishes `Y = y·G`. For each of the 128 base OTs the receiver
//! picks a choice bit `d` and replies `X = x·G + d·Y`. The sender derives
//! `k0 = H(X, Y, y·X)` and `k1 = H(X, Y, y·X − y·Y)`; the receiver learns
//! `k_d = H(X, Y, x·Y)` only.

use super::{map_indexed, SECURITY_PARAMETER};
use crate::types::point_to_bytes;
use crate::{Error, Result};
use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand_core::CryptoRngCore;
use sha2::{Digest as _, Sha256};
use subtle::{Choice, ConditionallySelectable};
use zeroize::Zeroize;

const BASE_OT_LABEL: &[u8] = b"tecdsa-2p/batch-random-ot/v1";

fn hash_key(
    index: usize,
    big_x: &ProjectivePoint,
    big_y: &ProjectivePoint,
    shared: &ProjectivePoint,
) -> u128 {
    let digest = Sha256::new()
        .chain_update(BASE_OT_LABEL)
        .chain_update((index as u64).to_le_bytes())
        .chain_update(point_to_bytes(big_x))
        .chain_update(point_to_bytes(big_y))
        .chain_update(point_to_bytes(shared))
        .finalize();
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    u128::from_le_bytes(key)
}

/// Sender side of one batch
pub struct BaseOtSender {
    y: Scalar,
    big_y: ProjectivePoint,
    big_z: ProjectivePoint,
}

impl BaseOtSender {
    /// Sample `y` and return the public `Y`
    pub fn start(rng: &mut impl CryptoRngCore) -> (Self, ProjectivePoint) {
        let y = Scalar::random(&mut *rng);
        let big_y = ProjectivePoint::GENERATOR * y;
        let big_z = big_y * y;
        (Self { y, big_y, big_z }, big_y)
    }

    /// Derive both keys of every base OT from the receiver's points
    pub fn finish(&self, big_xs: &[ProjectivePoint]) -> Result<(Vec<u128>, Vec<u128>)> {
        if big_xs.len() != SECURITY_PARAMETER {
            return Err(Error::OtDesync(format!(
                "expected {} base OT points, got {}",
                SECURITY_PARAMETER,
                big_xs.len()
            )));
        }
        let keys = map_indexed(SECURITY_PARAMETER, |i| {
            let y_x = big_xs[i] * self.y;
            let k0 = hash_key(i, &big_xs[i], &self.big_y, &y_x);
            let k1 = hash_key(i, &big_xs[i], &self.big_y, &(y_x - self.big_z));
            (k0, k1)
        });
        Ok(keys.into_iter().unzip())
    }
}

impl Drop for BaseOtSender {
    fn drop(&mut self) {
        self.y.zeroize();
    }
}

/// Receiver side of one batch
pub struct BaseOtReceiver;

impl BaseOtReceiver {
    /// Answer `Y` under the choice bits `delta` (bit `i` chooses OT `i`).
    ///
    /// Returns the points for the sender and the chosen keys `k_{delta_i}`.
    pub fn choose(
        rng: &mut impl CryptoRngCore,
        delta: u128,
        big_y: &ProjectivePoint,
    ) -> (Vec<ProjectivePoint>, Vec<u128>) {
        let mut xs: Vec<Scalar> = (0..SECURITY_PARAMETER)
            .map(|_| Scalar::random(&mut *rng))
            .collect();

        let pairs = map_indexed(SECURITY_PARAMETER, |i| {
            let d = Choice::from(((delta >> i) & 1) as u8);
            let offset = ProjectivePoint::conditional_select(&ProjectivePoint::IDENTITY, big_y, d);
            let big_x = ProjectivePoint::GENERATOR * xs[i] + offset;
            let key = hash_key(i, &big_x, big_y, &(*big_y * xs[i]));
            (big_x, key)
        });
        xs.zeroize();

        pairs.into_iter().unzip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oblivious::bits::bit;
    use rand::{rngs::OsRng, Rng};

    #[test]
    fn test_receiver_learns_chosen_keys() {
        let (sender, big_y) = BaseOtSender::start(&mut OsRng);
        let delta: u128 = OsRng.gen();
        let (big_xs, chosen) = BaseOtReceiver::choose(&mut OsRng, delta, &big_y);
        let (k0, k1) = sender.finish(&big_xs).unwrap();

        for i in 0..SECURITY_PARAMETER {
            let expected = if bit(delta, i) { k1[i] } else { k0[i] };
            assert_eq!(chosen[i], expected);
            assert_ne!(k0[i], k1[i]);
        }
    }

    #[test]
    fn test_wrong_batch_size_is_desync() {
        let (sender, _) = BaseOtSender::start(&mut OsRng);
        let short = vec![ProjectivePoint::GENERATOR; 3];
        assert!(matches!(sender.finish(&short), Err(Error::OtDesync(_))));
    }
}
