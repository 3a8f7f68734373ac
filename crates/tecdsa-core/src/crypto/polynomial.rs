//! Scalar polynomials and their commitments in the group

use crate::types::{point_to_bytes, Role, WirePoint};
use crate::{Error, Result};
use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// Secret polynomial with coefficients in the scalar field
#[derive(Clone)]
pub struct Polynomial {
    coefficients: Vec<Scalar>,
}

impl Polynomial {
    /// Random polynomial with `size` coefficients and the given constant term
    pub fn with_constant(rng: &mut impl CryptoRngCore, constant: Scalar, size: usize) -> Self {
        let mut coefficients = Vec::with_capacity(size);
        coefficients.push(constant);
        for _ in 1..size {
            coefficients.push(Scalar::random(&mut *rng));
        }
        Self { coefficients }
    }

    /// Random polynomial with `size` coefficients
    pub fn random(rng: &mut impl CryptoRngCore, size: usize) -> Self {
        let constant = Scalar::random(&mut *rng);
        Self::with_constant(rng, constant, size)
    }

    pub fn evaluate(&self, x: &Scalar) -> Scalar {
        self.coefficients
            .iter()
            .rev()
            .fold(Scalar::ZERO, |acc, c| acc * x + c)
    }

    pub fn evaluate_at(&self, role: Role) -> Scalar {
        self.evaluate(&role.scalar())
    }

    pub fn constant(&self) -> Scalar {
        self.coefficients.first().copied().unwrap_or(Scalar::ZERO)
    }

    pub fn set_constant(&mut self, constant: Scalar) {
        if let Some(c) = self.coefficients.first_mut() {
            *c = constant;
        }
    }

    /// `f·G`, coefficient by coefficient
    pub fn commit(&self) -> GroupPolynomial {
        GroupPolynomial {
            coefficients: self
                .coefficients
                .iter()
                .map(|c| ProjectivePoint::GENERATOR * c)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }
}

impl Drop for Polynomial {
    fn drop(&mut self) {
        self.coefficients.zeroize();
    }
}

/// Polynomial whose coefficients are curve points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPolynomial {
    coefficients: Vec<ProjectivePoint>,
}

impl GroupPolynomial {
    pub fn evaluate(&self, x: &Scalar) -> ProjectivePoint {
        self.coefficients
            .iter()
            .rev()
            .fold(ProjectivePoint::IDENTITY, |acc, c| acc * x + c)
    }

    pub fn evaluate_at(&self, role: Role) -> ProjectivePoint {
        self.evaluate(&role.scalar())
    }

    pub fn constant(&self) -> ProjectivePoint {
        self.coefficients
            .first()
            .copied()
            .unwrap_or(ProjectivePoint::IDENTITY)
    }

    pub fn set_constant(&mut self, constant: ProjectivePoint) {
        if let Some(c) = self.coefficients.first_mut() {
            *c = constant;
        }
    }

    /// Coefficient-wise sum; both sides must have the same length
    pub fn add(&self, other: &GroupPolynomial) -> Result<GroupPolynomial> {
        if self.len() != other.len() {
            return Err(Error::Malformed(format!(
                "polynomial length {} does not match {}",
                other.len(),
                self.len()
            )));
        }
        Ok(GroupPolynomial {
            coefficients: self
                .coefficients
                .iter()
                .zip(&other.coefficients)
                .map(|(a, b)| a + b)
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// Length-prefixed canonical bytes, used as commitment input
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.coefficients.len() as u64).to_le_bytes());
        for c in &self.coefficients {
            let bytes = point_to_bytes(c);
            out.push(bytes.len() as u8);
            out.extend_from_slice(&bytes);
        }
    }
}

impl Serialize for GroupPolynomial {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let points: Vec<WirePoint> = self.coefficients.iter().copied().map(WirePoint).collect();
        points.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GroupPolynomial {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let points = Vec::<WirePoint>::deserialize(deserializer)?;
        Ok(GroupPolynomial {
            coefficients: points.into_iter().map(|p| p.0).collect(),
        })
    }
}

/// Lagrange coefficient at zero for `me` over the two-party set
pub fn lagrange_at_zero(me: Role) -> Scalar {
    let x_i = me.scalar();
    let x_j = me.peer().scalar();
    let numerator = x_j;
    let denominator = x_j - x_i;

    // Participant scalars are distinct, so the denominator is never zero.
    numerator * Option::<Scalar>::from(denominator.invert()).unwrap_or(Scalar::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_evaluate_matches_commitment() {
        let f = Polynomial::random(&mut OsRng, 3);
        let big_f = f.commit();
        let x = Scalar::from(5u64);
        assert_eq!(ProjectivePoint::GENERATOR * f.evaluate(&x), big_f.evaluate(&x));
        assert_eq!(big_f.constant(), ProjectivePoint::GENERATOR * f.constant());
    }

    #[test]
    fn test_lagrange_reconstructs_constant() {
        let secret = Scalar::random(&mut OsRng);
        let f = Polynomial::with_constant(&mut OsRng, secret, 2);

        let combined = Role::BOTH
            .iter()
            .map(|r| lagrange_at_zero(*r) * f.evaluate_at(*r))
            .fold(Scalar::ZERO, |acc, v| acc + v);
        assert_eq!(combined, secret);
    }

    #[test]
    fn test_add_rejects_length_mismatch() {
        let a = Polynomial::random(&mut OsRng, 2).commit();
        let b = Polynomial::random(&mut OsRng, 3).commit();
        assert!(a.add(&b).is_err());
        assert_eq!(a.add(&a).unwrap().len(), 2);
    }

    #[test]
    fn test_zero_constant_round_trips_on_wire() {
        let mut l = Polynomial::random(&mut OsRng, 2);
        l.set_constant(Scalar::ZERO);
        let big_l = l.commit();
        let json = serde_json::to_string(&big_l).unwrap();
        let back: GroupPolynomial = serde_json::from_str(&json).unwrap();
        assert_eq!(back, big_l);
        assert_eq!(back.constant(), ProjectivePoint::IDENTITY);
    }
}
