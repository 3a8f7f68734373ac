//! Keygen wire messages

use crate::crypto::{Commitment, Digest, DlogProof, GroupPolynomial, Randomizer};
use crate::protocol::mailbox;
use crate::types::{WirePoint, WireScalar};
use serde::{Deserialize, Serialize};

/// Round-4 decommitment: the committed polynomial, its opening randomness and
/// the sender's confirmation digest. Serialized as a three-element array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeygenOpening(pub GroupPolynomial, pub Randomizer, pub Digest);

mailbox! {
    /// Keygen payloads received from the peer
    pub struct RcvdKeyshareMessages, slots KeygenSlot {
        wait_0: Commitment => Wait0,
        wait_1: WireScalar => Wait1,
        wait_2: DlogProof => Wait2,
        wait_3: KeygenOpening => Wait3,
        wait_4: WirePoint => Wait4,
    }
}
