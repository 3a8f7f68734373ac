//! DSG message types

use crate::protocol::mailbox;
use crate::types::WireScalar;

mailbox! {
    /// Sign payloads received from the peer
    pub struct RcvdSignMessages, slots SignSlot {
        wait_0: WireScalar => Wait0,
    }
}
