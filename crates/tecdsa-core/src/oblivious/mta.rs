//! Multiplicative-to-additive conversion over random OT
//!
//! The sender holds `a`, the receiver `b`; afterwards `alpha + beta = a·b`.
//! Each of the `MTA_BATCH` OTs masks `±a` with a fresh `delta_i`; the receiver
//! picks coefficients `chi_i` whose signed sum is `b`.

use super::{Seed, MTA_BATCH};
use crate::{Error, Result};
use k256::{elliptic_curve::Field, Scalar};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::CryptoRngCore;
use subtle::{Choice, ConditionallyNegatable, ConditionallySelectable};
use zeroize::Zeroize;

/// Sender state between its message and the receiver's answer
pub struct MtaSender {
    deltas: Vec<Scalar>,
}

impl MtaSender {
    /// Mask `a` under each OT pair: `c_i = (v0_i + delta_i + a, v1_i + delta_i − a)`
    pub fn start(
        rng: &mut impl CryptoRngCore,
        v: &[(Scalar, Scalar)],
        a: &Scalar,
    ) -> Result<(Self, Vec<(Scalar, Scalar)>)> {
        if v.len() != MTA_BATCH {
            return Err(Error::OtDesync(format!(
                "MtA needs {} OTs, got {}",
                MTA_BATCH,
                v.len()
            )));
        }
        let deltas: Vec<Scalar> = (0..MTA_BATCH).map(|_| Scalar::random(&mut *rng)).collect();
        let c = v
            .iter()
            .zip(&deltas)
            .map(|((v0, v1), delta)| (*v0 + delta + a, *v1 + delta - a))
            .collect();
        Ok((Self { deltas }, c))
    }

    /// Recover the sender share `alpha = −Σ chi_i·delta_i`
    pub fn finish(&self, chi1: &Scalar, seed: &Seed) -> Scalar {
        let chi = expand_chi(seed);
        let mut alpha = *chi1 * self.deltas[0];
        for (c, delta) in chi.iter().zip(&self.deltas[1..]) {
            alpha += c * delta;
        }
        -alpha
    }
}

impl Drop for MtaSender {
    fn drop(&mut self) {
        self.deltas.zeroize();
    }
}

/// Receiver's answer and share
pub struct MtaReceiverOutput {
    pub chi1: Scalar,
    pub seed: Seed,
    pub beta: Scalar,
}

/// Run the receiver side with OT outputs `(t_i, v_{t_i})`
pub fn mta_receive(
    rng: &mut impl CryptoRngCore,
    tv: &[(bool, Scalar)],
    b: &Scalar,
    c: &[(Scalar, Scalar)],
) -> Result<MtaReceiverOutput> {
    if tv.len() != MTA_BATCH || c.len() != MTA_BATCH {
        return Err(Error::OtDesync(format!(
            "MtA needs {} OTs, got {} outputs and {} ciphertexts",
            MTA_BATCH,
            tv.len(),
            c.len()
        )));
    }

    let m: Vec<Scalar> = tv
        .iter()
        .zip(c)
        .map(|((t, v), (c0, c1))| {
            Scalar::conditional_select(c0, c1, Choice::from(u8::from(*t))) - v
        })
        .collect();

    let seed = Seed::random(rng);
    let chi = expand_chi(&seed);

    let mut chi1 = *b;
    for ((t, _), c) in tv[1..].iter().zip(&chi) {
        let mut signed = *c;
        signed.conditional_negate(Choice::from(u8::from(*t)));
        chi1 -= signed;
    }
    chi1.conditional_negate(Choice::from(u8::from(tv[0].0)));

    let mut beta = chi1 * m[0];
    for (c, m_i) in chi.iter().zip(&m[1..]) {
        beta += c * m_i;
    }

    Ok(MtaReceiverOutput { chi1, seed, beta })
}

/// Coefficients `chi_2..chi_n` shared through the seed
fn expand_chi(seed: &Seed) -> Vec<Scalar> {
    let mut rng = ChaCha20Rng::from_seed(seed.0);
    (1..MTA_BATCH).map(|_| Scalar::random(&mut rng)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::OsRng, Rng};

    /// Ideal random OT outputs for the batch
    fn random_ots() -> (Vec<(Scalar, Scalar)>, Vec<(bool, Scalar)>) {
        (0..MTA_BATCH)
            .map(|_| {
                let v0 = Scalar::random(&mut OsRng);
                let v1 = Scalar::random(&mut OsRng);
                let t: bool = OsRng.gen();
                ((v0, v1), (t, if t { v1 } else { v0 }))
            })
            .unzip()
    }

    #[test]
    fn test_shares_add_up_to_product() {
        let (v, tv) = random_ots();
        let a = Scalar::random(&mut OsRng);
        let b = Scalar::random(&mut OsRng);

        let (sender, c) = MtaSender::start(&mut OsRng, &v, &a).unwrap();
        let out = mta_receive(&mut OsRng, &tv, &b, &c).unwrap();
        let alpha = sender.finish(&out.chi1, &out.seed);

        assert_eq!(alpha + out.beta, a * b);
    }

    #[test]
    fn test_wrong_batch_is_desync() {
        let (v, _) = random_ots();
        assert!(matches!(
            MtaSender::start(&mut OsRng, &v[..10], &Scalar::ONE),
            Err(Error::OtDesync(_))
        ));
    }
}
