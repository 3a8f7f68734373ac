//! Fiat-Shamir transcripts

use crate::crypto::{commit::Digest, scalar_from_wide};
use crate::types::{point_to_bytes, Role};
use k256::{ProjectivePoint, Scalar};
use merlin::Transcript;

/// Transcript bound to one phase run.
///
/// Every proof runs on a fork so that proofs from different parties and
/// different statements never share a challenge.
#[derive(Clone)]
pub struct ProtocolTranscript {
    inner: Transcript,
}

impl ProtocolTranscript {
    /// Start a transcript for `phase_label` over both parties
    pub fn new(phase_label: &'static [u8], threshold: usize) -> Self {
        let mut inner = Transcript::new(b"tecdsa-2p");
        inner.append_message(b"phase", phase_label);
        inner.append_message(b"group", b"secp256k1");
        for role in Role::BOTH {
            inner.append_u64(b"participant", u64::from(role.index()));
        }
        inner.append_u64(b"threshold", threshold as u64);
        Self { inner }
    }

    /// Bind the agreed commitment digest
    pub fn bind_confirmation(&mut self, confirmation: &Digest) {
        self.inner.append_message(b"confirmation", &confirmation.0);
    }

    /// Fork for a single proof by `prover`
    pub fn fork(&self, label: &'static [u8], prover: Role, index: u64) -> Transcript {
        let mut t = self.inner.clone();
        t.append_message(b"fork", label);
        t.append_u64(b"prover", u64::from(prover.index()));
        t.append_u64(b"index", index);
        t
    }
}

pub(crate) fn append_point(t: &mut Transcript, label: &'static [u8], point: &ProjectivePoint) {
    t.append_message(label, &point_to_bytes(point));
}

pub(crate) fn challenge(t: &mut Transcript) -> Scalar {
    let mut bytes = [0u8; 32];
    t.challenge_bytes(b"challenge", &mut bytes);
    scalar_from_wide(bytes)
}
