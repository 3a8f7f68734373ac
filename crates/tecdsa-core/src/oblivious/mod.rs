//! Oblivious Transfer (OT) primitives
//!
//! This module provides the OT stack used by triple generation:
//! - Batch random OT (base OTs over secp256k1)
//! - Correlated OT and random OT extension with a consistency check
//! - OT-based multiplicative-to-additive conversion (MtA)

pub mod batch_random_ot;
pub mod bits;
pub mod mta;
pub mod ot_extension;

pub use batch_random_ot::{BaseOtReceiver, BaseOtSender};
pub use bits::{BitMatrix, DoubleBitVector};
pub use mta::{MtaReceiverOutput, MtaSender};
pub use ot_extension::{CorrelatedReceiver, CorrelatedSender, ExtensionCheck};

use crate::types::hex32;
use serde::{Deserialize, Serialize};

/// Number of base OTs and width of extension rows
pub const SECURITY_PARAMETER: usize = 128;

/// Bit length of a secp256k1 scalar
pub const SCALAR_BITS: usize = 256;

/// OTs consumed by one MtA instance
pub const MTA_BATCH: usize = SCALAR_BITS + SECURITY_PARAMETER;

/// Extended OTs used per triple (two MtA instances)
pub const EXTENDED_OTS: usize = 2 * MTA_BATCH;

/// Rows of the extension matrix: `EXTENDED_OTS` rounded up to a multiple of the
/// security parameter, plus two extra blocks for the consistency check.
pub const EXTENSION_ROWS: usize = adjust_size(EXTENDED_OTS);

pub const fn adjust_size(size: usize) -> usize {
    let r = size % SECURITY_PARAMETER;
    let padded = if r == 0 {
        size
    } else {
        size + (SECURITY_PARAMETER - r)
    };
    padded + 2 * SECURITY_PARAMETER
}

/// 32-byte PRG seed exchanged in the clear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed(#[serde(with = "hex32")] pub [u8; 32]);

impl Seed {
    pub fn random(rng: &mut impl rand_core::CryptoRngCore) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Seed(bytes)
    }
}

#[cfg(feature = "multi-thread")]
pub(crate) fn map_indexed<T, F>(count: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    use rayon::prelude::*;
    (0..count).into_par_iter().map(f).collect()
}

#[cfg(not(feature = "multi-thread"))]
pub(crate) fn map_indexed<T, F>(count: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    (0..count).map(f).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjusted_sizes() {
        assert_eq!(MTA_BATCH, 384);
        assert_eq!(EXTENDED_OTS, 768);
        assert_eq!(EXTENSION_ROWS, 1024);
        assert_eq!(adjust_size(100), 384);
    }
}
