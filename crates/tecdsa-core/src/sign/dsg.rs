//! DSG protocol implementation

use super::messages::{RcvdSignMessages, SignSlot};
use super::{x_coordinate, FullSignature, SignOutput};
use crate::crypto::{lagrange_at_zero, scalar_from_wide};
use crate::presign::PresignOutput;
use crate::protocol::{take, Protocol, Transition};
use crate::types::{FromPeer, Phase, Role, WireScalar};
use crate::{Error, Result};
use k256::{elliptic_curve::scalar::IsHigh, ProjectivePoint, Scalar};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

enum SignState {
    /// Round 1 sent `s_i`
    Published(Zeroizing<Scalar>),
    Done,
}

/// One party's sign run over a presignature
pub struct SignParty {
    role: Role,
    public_key: ProjectivePoint,
    digest: [u8; 32],
    big_r: ProjectivePoint,
    completed: u8,
    state: SignState,
}

impl SignParty {
    /// Round 1: publish `s_i = m·λk_i + r·λσ_i`.
    ///
    /// `digest` is the 32-byte message hash; the presignature must be fresh.
    pub fn new(
        role: Role,
        presign: &PresignOutput,
        public_key: &ProjectivePoint,
        digest: [u8; 32],
    ) -> Result<(Self, RcvdSignMessages)> {
        if *public_key == ProjectivePoint::IDENTITY {
            return Err(Error::InvalidConfig("public key is the identity".into()));
        }

        let lambda = lagrange_at_zero(role);
        let m = scalar_from_wide(digest);
        let r = x_coordinate(&presign.big_r);
        let s_i = Zeroizing::new(m * (lambda * presign.k) + r * (lambda * presign.sigma));

        debug!(%role, digest = hex::encode(digest), "Sign round 1: partial signature");
        let msg = RcvdSignMessages {
            wait_0: Some(FromPeer::new(role, WireScalar(*s_i))),
        };

        Ok((
            Self {
                role,
                public_key: *public_key,
                digest,
                big_r: presign.big_r,
                completed: 1,
                state: SignState::Published(s_i),
            },
            msg,
        ))
    }

    fn combine(&self, s_i: &Scalar, s_j: Scalar) -> Result<SignOutput> {
        let mut s = *s_i + s_j;
        if bool::from(s.is_zero()) {
            warn!(role = %self.role, "combined s is zero");
            return Err(Error::SignatureCombinationInvalid);
        }
        let is_high = bool::from(s.is_high());
        if is_high {
            s = -s;
        }

        let signature = FullSignature {
            big_r: self.big_r,
            s,
        };
        if !signature.verify(&self.public_key, &self.digest) {
            warn!(role = %self.role, "combined signature failed to verify");
            return Err(Error::SignatureCombinationInvalid);
        }
        Ok(SignOutput { signature, is_high })
    }
}

impl Protocol for SignParty {
    type Inbox = RcvdSignMessages;
    type Output = SignOutput;

    const PHASE: Phase = Phase::Sign;
    const ROUNDS: u8 = 1;

    fn role(&self) -> Role {
        self.role
    }

    fn rounds_completed(&self) -> u8 {
        self.completed
    }

    fn consumed_in(_role: Role, slot: SignSlot) -> Option<u8> {
        match slot {
            SignSlot::Wait0 => Some(2),
        }
    }

    fn proceed(
        &mut self,
        inbox: &mut RcvdSignMessages,
    ) -> Result<Transition<RcvdSignMessages, SignOutput>> {
        if !self.ready(inbox) {
            return Ok(Transition::Blocked);
        }

        let output = match std::mem::replace(&mut self.state, SignState::Done) {
            SignState::Published(s_i) => {
                let s_j = take(&mut inbox.wait_0, "wait_0")?;
                self.combine(&s_i, s_j.0)?
            }
            SignState::Done => {
                return Err(Error::Internal("sign already finished".into()));
            }
        };

        self.completed += 1;
        info!(
            role = %self.role,
            r = hex::encode(output.signature.r().to_bytes()),
            s = hex::encode(output.signature.s.to_bytes()),
            "DSG completed successfully"
        );
        Ok(Transition::Finished(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presign::run_presign;
    use crate::protocol::Mailbox;
    use k256::ecdsa::{signature::hazmat::PrehashVerifier, VerifyingKey};

    const DIGEST: [u8; 32] = [
        0xde, 0xad, 0xbe, 0xef, 0xde, 0xad, 0xbe, 0xef, 0xde, 0xad, 0xbe, 0xef, 0xde, 0xad, 0xbe,
        0xef, 0xde, 0xad, 0xbe, 0xef, 0xde, 0xad, 0xbe, 0xef, 0xde, 0xad, 0xbe, 0xef, 0xde, 0xad,
        0xbe, 0xef,
    ];

    fn finish(party: &mut SignParty, msg: RcvdSignMessages) -> Result<SignOutput> {
        let mut inbox = RcvdSignMessages::default();
        inbox.absorb(msg).unwrap();
        match party.proceed(&mut inbox)? {
            Transition::Finished(out) => Ok(out),
            _ => panic!("sign did not finish"),
        }
    }

    #[test]
    fn test_signature_verifies_and_recovers() {
        let (key_s, key_c, pre_s, pre_c) = run_presign(|_| {}).unwrap();
        let (mut server, m0) =
            SignParty::new(Role::Server, &pre_s, &key_s.public_key, DIGEST).unwrap();
        let (mut client, m1) =
            SignParty::new(Role::Client, &pre_c, &key_c.public_key, DIGEST).unwrap();

        let out_s = finish(&mut server, m1).unwrap();
        let out_c = finish(&mut client, m0).unwrap();
        assert_eq!(out_s, out_c);

        let vk = key_s.verifying_key().unwrap();
        let sig = out_s.signature.to_signature().unwrap();
        assert!(vk.verify_prehash(&DIGEST, &sig).is_ok());
        assert!(sig.normalize_s().is_none());

        let recovered =
            VerifyingKey::recover_from_prehash(&DIGEST, &sig, out_s.recovery_id()).unwrap();
        assert_eq!(recovered, vk);
        assert_eq!(out_s.signature.to_bytes().len(), 64);
        assert!(!out_s.signature.to_der().unwrap().is_empty());
    }

    #[test]
    fn test_forged_partial_is_rejected() {
        let (key_s, _, pre_s, pre_c) = run_presign(|_| {}).unwrap();
        let (mut server, _) =
            SignParty::new(Role::Server, &pre_s, &key_s.public_key, DIGEST).unwrap();
        let (_, mut m1) =
            SignParty::new(Role::Client, &pre_c, &key_s.public_key, DIGEST).unwrap();

        let s_j = m1.wait_0.as_mut().unwrap();
        s_j.payload = WireScalar(s_j.payload.0 + Scalar::ONE);
        assert!(matches!(
            finish(&mut server, m1),
            Err(Error::SignatureCombinationInvalid)
        ));
    }

    #[test]
    fn test_other_digest_does_not_verify() {
        let (key_s, key_c, pre_s, pre_c) = run_presign(|_| {}).unwrap();
        let (mut server, _) =
            SignParty::new(Role::Server, &pre_s, &key_s.public_key, DIGEST).unwrap();
        let (_, m1) =
            SignParty::new(Role::Client, &pre_c, &key_c.public_key, [7u8; 32]).unwrap();
        assert!(finish(&mut server, m1).is_err());
    }
}
