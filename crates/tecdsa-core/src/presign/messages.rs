//! Presign wire messages

use crate::protocol::mailbox;
use crate::types::{WirePoint, WireScalar};

mailbox! {
    /// Presign payloads received from the peer
    pub struct RcvdPresignMessages, slots PresignSlot {
        wait_0: WireScalar => Wait0,
        wait_1: (WireScalar, WireScalar) => Wait1,
        wait_2: WirePoint => Wait2,
    }
}
