//! Hash commitments

use crate::types::hex32;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use subtle::ConstantTimeEq;

const COMMIT_LABEL: &[u8] = b"tecdsa-2p/commit/v1";
const CONFIRM_LABEL: &[u8] = b"tecdsa-2p/confirm/v1";

/// Binding, hiding commitment to a byte string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment(#[serde(with = "hex32")] pub [u8; 32]);

/// Opening randomness of a [`Commitment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Randomizer(#[serde(with = "hex32")] pub [u8; 32]);

/// Hash over a set of commitments both parties must agree on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest(#[serde(with = "hex32")] pub [u8; 32]);

fn hash_commitment(message: &[u8], randomizer: &Randomizer) -> [u8; 32] {
    Sha256::new()
        .chain_update(COMMIT_LABEL)
        .chain_update(randomizer.0)
        .chain_update((message.len() as u64).to_le_bytes())
        .chain_update(message)
        .finalize()
        .into()
}

/// Commit to `message` under fresh randomness
pub fn commit(rng: &mut impl CryptoRngCore, message: &[u8]) -> (Commitment, Randomizer) {
    let mut r = [0u8; 32];
    rng.fill_bytes(&mut r);
    let randomizer = Randomizer(r);
    (Commitment(hash_commitment(message, &randomizer)), randomizer)
}

impl Commitment {
    /// Check an opening in constant time
    pub fn check(&self, message: &[u8], randomizer: &Randomizer) -> bool {
        let expected = hash_commitment(message, randomizer);
        bool::from(self.0[..].ct_eq(&expected[..]))
    }
}

/// Digest over commitments listed in participant order
pub fn confirmation(commitments: &[Commitment]) -> Digest {
    let mut hasher = Sha256::new().chain_update(CONFIRM_LABEL);
    for c in commitments {
        hasher.update(c.0);
    }
    Digest(hasher.finalize().into())
}

impl Digest {
    pub fn ct_matches(&self, other: &Digest) -> bool {
        bool::from(self.0[..].ct_eq(&other.0[..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_commit_and_check() {
        let (c, r) = commit(&mut OsRng, b"polynomial");
        assert!(c.check(b"polynomial", &r));
        assert!(!c.check(b"polynomiaL", &r));

        let (_, other) = commit(&mut OsRng, b"polynomial");
        assert!(!c.check(b"polynomial", &other));
    }

    #[test]
    fn test_confirmation_is_order_sensitive() {
        let (a, _) = commit(&mut OsRng, b"a");
        let (b, _) = commit(&mut OsRng, b"b");
        assert_eq!(confirmation(&[a, b]), confirmation(&[a, b]));
        assert_ne!(confirmation(&[a, b]), confirmation(&[b, a]));
    }
}
