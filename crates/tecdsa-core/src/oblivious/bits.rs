//! Bit vectors and matrices for OT extension
//!
//! A row is a `u128`; bit `j` of a row belongs to column `j`.

use super::SECURITY_PARAMETER;
use crate::{Error, Result};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::ops::BitXor;

/// Test bit `j` of a row
pub fn bit(row: u128, j: usize) -> bool {
    (row >> j) & 1 == 1
}

/// 256-bit carry-less product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoubleBitVector {
    pub hi: u128,
    pub lo: u128,
}

impl BitXor for DoubleBitVector {
    type Output = DoubleBitVector;

    fn bitxor(self, rhs: Self) -> Self::Output {
        DoubleBitVector {
            hi: self.hi ^ rhs.hi,
            lo: self.lo ^ rhs.lo,
        }
    }
}

impl DoubleBitVector {
    /// `self` if `flag`, zero otherwise, without branching on `flag`
    pub fn masked(self, flag: bool) -> Self {
        let mask = 0u128.wrapping_sub(u128::from(flag));
        DoubleBitVector {
            hi: self.hi & mask,
            lo: self.lo & mask,
        }
    }
}

impl Serialize for DoubleBitVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(&self.hi.to_be_bytes());
        bytes[16..].copy_from_slice(&self.lo.to_be_bytes());
        serializer.serialize_str(&hex::encode(bytes))
    }
}

impl<'de> Deserialize<'de> for DoubleBitVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(text).map_err(D::Error::custom)?;
        if bytes.len() != 32 {
            return Err(D::Error::custom("expected 32 bytes"));
        }
        let mut hi = [0u8; 16];
        let mut lo = [0u8; 16];
        hi.copy_from_slice(&bytes[..16]);
        lo.copy_from_slice(&bytes[16..]);
        Ok(DoubleBitVector {
            hi: u128::from_be_bytes(hi),
            lo: u128::from_be_bytes(lo),
        })
    }
}

/// Carry-less multiplication in GF(2)[x]
pub fn gf_mul(a: u128, b: u128) -> DoubleBitVector {
    let mut out = DoubleBitVector::default();
    for i in 0..128 {
        let mask = 0u128.wrapping_sub((b >> i) & 1);
        out.lo ^= (a << i) & mask;
        if i > 0 {
            out.hi ^= (a >> (128 - i)) & mask;
        }
    }
    out
}

/// Matrix of 128-bit rows
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitMatrix {
    rows: Vec<u128>,
}

impl BitMatrix {
    pub fn from_rows(rows: Vec<u128>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[u128] {
        &self.rows
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn xor(&self, other: &BitMatrix) -> Result<BitMatrix> {
        if self.height() != other.height() {
            return Err(Error::OtDesync(format!(
                "matrix height {} does not match {}",
                other.height(),
                self.height()
            )));
        }
        Ok(BitMatrix {
            rows: self
                .rows
                .iter()
                .zip(&other.rows)
                .map(|(a, b)| a ^ b)
                .collect(),
        })
    }

    /// Keep only the columns selected by `mask`
    pub fn and_row(&self, mask: u128) -> BitMatrix {
        BitMatrix {
            rows: self.rows.iter().map(|r| r & mask).collect(),
        }
    }

    /// Column-major view of 128-row blocks.
    ///
    /// Entry `[c][j]` holds column `j` restricted to rows `128c..128c+128`,
    /// with row `128c + r` at bit `r`. Height must be a multiple of 128.
    pub fn column_blocks(&self) -> Vec<[u128; SECURITY_PARAMETER]> {
        self.rows
            .chunks(SECURITY_PARAMETER)
            .map(transpose_block)
            .collect()
    }
}

fn transpose_block(block: &[u128]) -> [u128; SECURITY_PARAMETER] {
    let mut columns = [0u128; SECURITY_PARAMETER];
    for (r, row) in block.iter().enumerate() {
        for (j, column) in columns.iter_mut().enumerate() {
            *column |= ((row >> j) & 1) << r;
        }
    }
    columns
}

impl Serialize for BitMatrix {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let rows: Vec<String> = self
            .rows
            .iter()
            .map(|r| hex::encode(r.to_be_bytes()))
            .collect();
        rows.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BitMatrix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let rows = Vec::<String>::deserialize(deserializer)?;
        let rows = rows
            .into_iter()
            .map(|text| {
                let bytes = hex::decode(text).map_err(D::Error::custom)?;
                let array: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| D::Error::custom("expected 16-byte row"))?;
                Ok(u128::from_be_bytes(array))
            })
            .collect::<std::result::Result<Vec<_>, D::Error>>()?;
        Ok(BitMatrix { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_gf_mul_small_values() {
        // (x + 1)^2 = x^2 + 1 over GF(2)
        assert_eq!(gf_mul(0b11, 0b11), DoubleBitVector { hi: 0, lo: 0b101 });
        // x^127 * x = x^128 lands in the high half
        assert_eq!(gf_mul(1 << 127, 2), DoubleBitVector { hi: 1, lo: 0 });
    }

    #[test]
    fn test_gf_mul_distributes_over_xor() {
        let mut rng = rand::thread_rng();
        let (a, b, c): (u128, u128, u128) = (rng.gen(), rng.gen(), rng.gen());
        assert_eq!(gf_mul(a ^ b, c), gf_mul(a, c) ^ gf_mul(b, c));
    }

    #[test]
    fn test_column_blocks() {
        let mut rows = vec![0u128; 256];
        rows[3] = 1 << 5;
        rows[130] = 1 << 7;
        let blocks = BitMatrix::from_rows(rows).column_blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0][5], 1 << 3);
        assert_eq!(blocks[1][7], 1 << 2);
        assert_eq!(blocks[1][5], 0);
    }

    #[test]
    fn test_xor_checks_height() {
        let a = BitMatrix::from_rows(vec![1, 2]);
        let b = BitMatrix::from_rows(vec![3]);
        assert!(matches!(a.xor(&b), Err(Error::OtDesync(_))));
        assert_eq!(a.xor(&a).unwrap().rows(), &[0, 0]);
    }
}
