//! Trusted-dealer split and share recombination
//!
//! Used for importing an existing key and for recovery tooling. A normal
//! wallet is created with [`KeygenParty`](super::KeygenParty) instead.

use super::{KeygenOutput, KEYGEN_THRESHOLD};
use crate::crypto::{lagrange_at_zero, Polynomial};
use crate::types::Role;
use crate::{Error, Result};
use k256::{ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use tracing::info;

/// Split `secret` into a server share and a client share
pub fn deal_key_shares(secret: &Scalar) -> Result<(KeygenOutput, KeygenOutput)> {
    if bool::from(secret.is_zero()) {
        return Err(Error::InvalidConfig("cannot split a zero secret".into()));
    }
    let f = Polynomial::with_constant(&mut OsRng, *secret, KEYGEN_THRESHOLD);
    let public_key = ProjectivePoint::GENERATOR * secret;

    let share_for = |role: Role| KeygenOutput {
        private_share: f.evaluate_at(role),
        public_key,
    };
    info!("Dealt key shares for imported secret");
    Ok((share_for(Role::Server), share_for(Role::Client)))
}

/// Reconstruct the secret from both shares, checking it against the public key
pub fn combine_shares(server: &KeygenOutput, client: &KeygenOutput) -> Result<Scalar> {
    if server.public_key != client.public_key {
        return Err(Error::PublicKeyMismatch);
    }
    let secret = lagrange_at_zero(Role::Server) * server.private_share
        + lagrange_at_zero(Role::Client) * client.private_share;
    if ProjectivePoint::GENERATOR * secret != server.public_key {
        return Err(Error::InvalidConfig(
            "shares do not reconstruct the public key".into(),
        ));
    }
    Ok(secret)
}
