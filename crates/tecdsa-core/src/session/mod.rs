//! Session management
//!
//! The [`Registry`] owns every live protocol session of one party, keyed by
//! [`SessionKey`](crate::SessionKey), together with the consume-once triple
//! and presignature stores that connect the phases.

mod envelope;
mod machine;
mod registry;
mod store;

pub use envelope::{Envelope, PhaseMessage};
pub use registry::{Advance, Completed, PhaseRequest, PublicOutput, Registry, SessionInfo};
pub use store::{
    PresignHandle, PresignStore, StoredPresign, StoredTriple, TripleHandle, TripleStore,
};
