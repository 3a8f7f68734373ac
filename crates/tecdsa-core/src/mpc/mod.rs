//! MPC coordination utilities

use crate::session::Envelope;
use crate::{Result, Role, SessionKey};

pub use ::async_trait::async_trait;

/// Carries envelopes between the two parties of a session
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand an envelope to its addressee
    async fn send(&self, key: &SessionKey, envelope: Envelope) -> Result<()>;

    /// Next envelope addressed to `me`
    async fn recv(&self, key: &SessionKey, me: Role) -> Result<Envelope>;
}

/// Runs a phase to completion over a [`Transport`]
pub mod driver;

/// In-memory transport for testing
pub mod memory;

pub use driver::run_phase;
pub use memory::MemoryTransport;
