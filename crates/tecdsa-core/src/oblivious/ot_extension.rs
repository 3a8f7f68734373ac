//! Correlated OT and random OT extension
//!
//! The base-OT sender becomes the extension *receiver* and vice versa. Each
//! base key is stretched into a column of `EXTENSION_ROWS` bits; rows are then
//! used as OT instances. A random linear check over the rows catches a
//! receiver whose correction matrix is not of the form `b_i · 1`.

use super::bits::{bit, gf_mul, BitMatrix, DoubleBitVector};
use super::{map_indexed, Seed, EXTENDED_OTS, EXTENSION_ROWS, SECURITY_PARAMETER};
use crate::crypto::{scalar_from_wide, Digest};
use crate::{Error, Result};
use k256::Scalar;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use zeroize::Zeroize;

const EXPAND_LABEL: &str = "tecdsa-2p 2023 ot-extension expand v1";
const ROW_HASH_LABEL: &[u8] = b"tecdsa-2p/ot-extension/row/v1";

/// Stretch every base key into one column of `EXTENSION_ROWS` bits.
fn expand_columns(keys: &[u128], sid: &Digest) -> BitMatrix {
    let columns = map_indexed(keys.len(), |j| {
        let mut hasher = blake3::Hasher::new_derive_key(EXPAND_LABEL);
        hasher.update(&sid.0);
        hasher.update(&(j as u64).to_le_bytes());
        hasher.update(&keys[j].to_le_bytes());
        let mut column = vec![0u8; EXTENSION_ROWS / 8];
        hasher.finalize_xof().fill(&mut column);
        column
    });

    let mut rows = vec![0u128; EXTENSION_ROWS];
    for (j, column) in columns.iter().enumerate() {
        for (i, row) in rows.iter_mut().enumerate() {
            let b = (column[i / 8] >> (i % 8)) & 1;
            *row |= u128::from(b) << j;
        }
    }
    BitMatrix::from_rows(rows)
}

fn hash_row(sid: &Digest, index: usize, row: u128) -> Scalar {
    let digest: [u8; 32] = Sha256::new()
        .chain_update(ROW_HASH_LABEL)
        .chain_update(sid.0)
        .chain_update((index as u64).to_le_bytes())
        .chain_update(row.to_le_bytes())
        .finalize()
        .into();
    scalar_from_wide(digest)
}

fn check_coefficients(seed: &Seed) -> Vec<u128> {
    let mut rng = ChaCha20Rng::from_seed(seed.0);
    (0..EXTENSION_ROWS / SECURITY_PARAMETER)
        .map(|_| rng.gen::<u128>())
        .collect()
}

/// `Σ_c gf_mul(block_c, chi_c)` for every column
fn column_checks(matrix: &BitMatrix, chi: &[u128]) -> Vec<DoubleBitVector> {
    let blocks = matrix.column_blocks();
    (0..SECURITY_PARAMETER)
        .map(|j| {
            blocks
                .iter()
                .zip(chi)
                .fold(DoubleBitVector::default(), |acc, (block, c)| {
                    acc ^ gf_mul(block[j], *c)
                })
        })
        .collect()
}

/// Consistency check values sent by the extension receiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionCheck(pub DoubleBitVector, pub Vec<DoubleBitVector>);

/// Extension receiver: holds the base-OT key pairs and picks fresh choice bits
pub struct CorrelatedReceiver {
    sid: Digest,
    choices: Vec<u128>,
    t0: BitMatrix,
}

impl CorrelatedReceiver {
    /// Sample choice bits and build the correction matrix `u = t0 ⊕ t1 ⊕ x`
    pub fn start(
        rng: &mut impl CryptoRngCore,
        sid: Digest,
        k0: &[u128],
        k1: &[u128],
    ) -> Result<(Self, BitMatrix)> {
        if k0.len() != SECURITY_PARAMETER || k1.len() != SECURITY_PARAMETER {
            return Err(Error::OtDesync("base key count".into()));
        }
        let mut choice_bytes = vec![0u8; EXTENSION_ROWS / 8];
        rng.fill_bytes(&mut choice_bytes);
        let choices: Vec<u128> = choice_bytes
            .chunks(16)
            .map(|c| {
                let mut block = [0u8; 16];
                block.copy_from_slice(c);
                u128::from_le_bytes(block)
            })
            .collect();
        choice_bytes.zeroize();

        let x = BitMatrix::from_rows(
            (0..EXTENSION_ROWS)
                .map(|i| 0u128.wrapping_sub(u128::from(choice_of(&choices, i))))
                .collect(),
        );
        let t0 = expand_columns(k0, &sid);
        let t1 = expand_columns(k1, &sid);
        let u = t0.xor(&t1)?.xor(&x)?;

        Ok((Self { sid, choices, t0 }, u))
    }

    /// Answer the sender's seed with check values and derive the receiver outputs.
    ///
    /// Output `i` is the choice bit and `H(i, t0_i)`.
    pub fn finish(&self, seed: &Seed) -> (ExtensionCheck, Vec<(bool, Scalar)>) {
        let chi = check_coefficients(seed);
        let small_x = self
            .choices
            .iter()
            .zip(&chi)
            .fold(DoubleBitVector::default(), |acc, (b, c)| acc ^ gf_mul(*b, *c));
        let small_t = column_checks(&self.t0, &chi);

        let rows = self.t0.rows();
        let outputs = (0..EXTENDED_OTS)
            .map(|i| (choice_of(&self.choices, i), hash_row(&self.sid, i, rows[i])))
            .collect();

        (ExtensionCheck(small_x, small_t), outputs)
    }
}

impl Drop for CorrelatedReceiver {
    fn drop(&mut self) {
        self.choices.zeroize();
    }
}

fn choice_of(choices: &[u128], i: usize) -> bool {
    bit(choices[i / SECURITY_PARAMETER], i % SECURITY_PARAMETER)
}

/// Extension sender: holds `delta` and the chosen base keys
pub struct CorrelatedSender {
    sid: Digest,
    delta: u128,
    q: BitMatrix,
    seed: Seed,
}

impl CorrelatedSender {
    /// Compute `q = (u ∧ Δ) ⊕ t` and pick the check seed
    pub fn start(
        rng: &mut impl CryptoRngCore,
        sid: Digest,
        delta: u128,
        chosen_keys: &[u128],
        u: &BitMatrix,
    ) -> Result<(Self, Seed)> {
        if u.height() != EXTENSION_ROWS {
            return Err(Error::OtDesync(format!(
                "correction matrix has {} rows, expected {}",
                u.height(),
                EXTENSION_ROWS
            )));
        }
        if chosen_keys.len() != SECURITY_PARAMETER {
            return Err(Error::OtDesync("base key count".into()));
        }
        let t = expand_columns(chosen_keys, &sid);
        let q = u.and_row(delta).xor(&t)?;
        let seed = Seed::random(rng);
        Ok((
            Self {
                sid,
                delta,
                q,
                seed,
            },
            seed,
        ))
    }

    /// Verify the receiver's check values and derive both outputs per OT
    pub fn finish(&self, check: &ExtensionCheck) -> Result<Vec<(Scalar, Scalar)>> {
        let ExtensionCheck(small_x, small_t) = check;
        if small_t.len() != SECURITY_PARAMETER {
            return Err(Error::OtDesync(format!(
                "expected {} column checks, got {}",
                SECURITY_PARAMETER,
                small_t.len()
            )));
        }

        let chi = check_coefficients(&self.seed);
        let small_q = column_checks(&self.q, &chi);
        for (j, (q_j, t_j)) in small_q.iter().zip(small_t).enumerate() {
            if *q_j != (*t_j ^ small_x.masked(bit(self.delta, j))) {
                return Err(Error::OtDesync(format!("q check failed at column {j}")));
            }
        }

        let rows = self.q.rows();
        Ok((0..EXTENDED_OTS)
            .map(|i| {
                (
                    hash_row(&self.sid, i, rows[i]),
                    hash_row(&self.sid, i, rows[i] ^ self.delta),
                )
            })
            .collect())
    }
}

impl Drop for CorrelatedSender {
    fn drop(&mut self) {
        self.delta.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oblivious::{BaseOtReceiver, BaseOtSender};
    use rand::rngs::OsRng;

    fn base_keys() -> (Vec<u128>, Vec<u128>, u128, Vec<u128>) {
        let (sender, big_y) = BaseOtSender::start(&mut OsRng);
        let delta: u128 = OsRng.gen();
        let (big_xs, chosen) = BaseOtReceiver::choose(&mut OsRng, delta, &big_y);
        let (k0, k1) = sender.finish(&big_xs).unwrap();
        (k0, k1, delta, chosen)
    }

    #[test]
    fn test_extension_outputs_match() {
        let sid = Digest([7u8; 32]);
        let (k0, k1, delta, chosen) = base_keys();

        let (receiver, u) = CorrelatedReceiver::start(&mut OsRng, sid, &k0, &k1).unwrap();
        let (sender, seed) = CorrelatedSender::start(&mut OsRng, sid, delta, &chosen, &u).unwrap();
        let (check, received) = receiver.finish(&seed);
        let sent = sender.finish(&check).unwrap();

        assert_eq!(received.len(), EXTENDED_OTS);
        for ((b, v), (v0, v1)) in received.iter().zip(&sent) {
            assert_eq!(v, if *b { v1 } else { v0 });
        }
    }

    #[test]
    fn test_tampered_matrix_fails_check() {
        let sid = Digest([9u8; 32]);
        let (k0, k1, delta, chosen) = base_keys();

        let (receiver, u) = CorrelatedReceiver::start(&mut OsRng, sid, &k0, &k1).unwrap();
        let mut rows = u.rows().to_vec();
        rows[5] ^= u128::MAX >> 1;
        let tampered = BitMatrix::from_rows(rows);

        let (sender, seed) =
            CorrelatedSender::start(&mut OsRng, sid, delta, &chosen, &tampered).unwrap();
        let (check, _) = receiver.finish(&seed);
        assert!(matches!(sender.finish(&check), Err(Error::OtDesync(_))));
    }

    #[test]
    fn test_short_matrix_is_desync() {
        let (_, _, delta, chosen) = base_keys();
        let u = BitMatrix::from_rows(vec![0; 12]);
        assert!(matches!(
            CorrelatedSender::start(&mut OsRng, Digest([0; 32]), delta, &chosen, &u),
            Err(Error::OtDesync(_))
        ));
    }
}
