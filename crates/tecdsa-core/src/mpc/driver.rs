//! Runs one phase of a registry session over a [`Transport`]

use super::Transport;
use crate::keygen::KeygenOutput;
use crate::session::{Advance, Completed, PhaseRequest, Registry};
use crate::{Error, Result, Role, SessionKey};
use tracing::{debug, info, warn};

/// A finished phase as seen by one party
#[derive(Debug, Clone)]
pub struct PhaseResult {
    /// Rounds the phase took
    pub rounds: u8,
    pub completed: Completed,
}

/// Open `request` as `role` and pump envelopes until the phase finishes.
///
/// Early envelopes are left queued in the session. Any other failure after
/// the session was opened, including transport errors and peer aborts,
/// removes the local session before the error is returned.
pub async fn run_phase<T: Transport + ?Sized>(
    registry: &Registry,
    transport: &T,
    key: &SessionKey,
    role: Role,
    request: PhaseRequest,
    wallet: Option<&KeygenOutput>,
) -> Result<PhaseResult> {
    let phase = request.phase();
    info!(session = %key, %role, %phase, "Starting phase");
    let advance = registry.begin(key.clone(), role, request, wallet)?;

    match pump(registry, transport, key, role, advance).await {
        Ok(result) => {
            info!(session = %key, %role, %phase, rounds = result.rounds, "Phase finished");
            Ok(result)
        }
        Err(e) => {
            if registry.abort(key) {
                warn!(session = %key, %role, %phase, error = %e, "Phase failed; session dropped");
            }
            Err(e)
        }
    }
}

async fn pump<T: Transport + ?Sized>(
    registry: &Registry,
    transport: &T,
    key: &SessionKey,
    role: Role,
    mut advance: Advance,
) -> Result<PhaseResult> {
    loop {
        if let Some(envelope) = advance.outbound.take() {
            transport.send(key, envelope).await?;
        }
        if let Some(completed) = advance.completed.take() {
            return Ok(PhaseResult {
                rounds: advance.round,
                completed,
            });
        }

        let envelope = transport.recv(key, role).await?;
        advance = match registry.deliver(key, envelope) {
            Ok(next) => next,
            Err(Error::RoundOutOfOrder { expected, received, .. }) => {
                debug!(expected, received, "Envelope queued until earlier rounds arrive");
                continue;
            }
            Err(e) => return Err(e),
        };
    }
}
