//! Error types for the two-party ECDSA engine

use crate::types::Phase;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Client-facing classification of an [`Error`].
///
/// This is the only part of a failure that crosses the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The request was fine but arrived early; resend or keep polling.
    Retry,
    /// The session is gone; start the phase again from round 1.
    RestartRequired,
    /// The session, triple or presignature does not exist.
    NotFound,
    /// The request itself was invalid and nothing was changed.
    Rejected,
}

/// Errors that can occur while running a protocol phase
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration or request parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No live session under this key
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A session with this key is already running
    #[error("Session already exists: {0}")]
    SessionExists(String),

    /// Payload for a later round arrived before the current round could run
    #[error("{phase} round out of order: expected round {expected}, received payload for round {received}")]
    RoundOutOfOrder { phase: Phase, expected: u8, received: u8 },

    /// Too many early payloads queued for one session
    #[error("{phase} queue overflow: more than {limit} early payloads")]
    QueueOverflow { phase: Phase, limit: usize },

    /// The slot was already delivered or already consumed
    #[error("Duplicate {phase} message for slot {slot}")]
    DuplicateMessage { phase: Phase, slot: String },

    /// Wrong phase, wrong addressee or wrong sender
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// A peer payload is structurally invalid
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// A decommitment or confirmation did not match
    #[error("Commitment verification failed: {0}")]
    CommitmentVerificationFailed(String),

    /// A zero-knowledge proof or share consistency check failed
    #[error("Proof verification failed: {0}")]
    ProofVerificationFailed(String),

    /// The OT subprotocol lost consistency
    #[error("OT desync: {0}")]
    OtDesync(String),

    /// Parties derived different public keys
    #[error("Public key mismatch between parties")]
    PublicKeyMismatch,

    /// Parties derived different presignature nonces
    #[error("Presignature nonce mismatch between parties")]
    NonceMismatch,

    /// The combined signature does not verify
    #[error("Combined signature is invalid")]
    SignatureCombinationInvalid,

    /// Unknown triple handle
    #[error("Triple not found: {0}")]
    TripleNotFound(String),

    /// Triple was already used by a presign run
    #[error("Triple already consumed: {0}")]
    TripleAlreadyConsumed(String),

    /// Unknown presignature handle
    #[error("Presignature not found: {0}")]
    PresignNotFound(String),

    /// Presignature was already used by a sign run
    #[error("Presignature already consumed: {0}")]
    PresignAlreadyConsumed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Key custodian failure
    #[error("Custody error: {0}")]
    Custody(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Timeout waiting for message
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// Failure reported by the remote party
    #[error("Remote failure ({class:?}): {message}")]
    Remote { class: ErrorClass, message: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the session that raised this error must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::QueueOverflow { .. }
                | Error::Malformed(_)
                | Error::CommitmentVerificationFailed(_)
                | Error::ProofVerificationFailed(_)
                | Error::OtDesync(_)
                | Error::PublicKeyMismatch
                | Error::NonceMismatch
                | Error::SignatureCombinationInvalid
                | Error::Internal(_)
        ) || matches!(
            self,
            Error::Remote {
                class: ErrorClass::RestartRequired,
                ..
            }
        )
    }

    /// Collapses the taxonomy into what a client can act on.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::RoundOutOfOrder { .. } | Error::Timeout(_) | Error::Transport(_) => {
                ErrorClass::Retry
            }
            Error::SessionNotFound(_) | Error::TripleNotFound(_) | Error::PresignNotFound(_) => {
                ErrorClass::NotFound
            }
            Error::Remote { class, .. } => *class,
            e if e.is_fatal() => ErrorClass::RestartRequired,
            _ => ErrorClass::Rejected,
        }
    }

    /// Message safe to hand to the remote party.
    ///
    /// Verification details stay in the local logs.
    pub fn public_message(&self) -> String {
        match self {
            Error::CommitmentVerificationFailed(_)
            | Error::ProofVerificationFailed(_)
            | Error::OtDesync(_)
            | Error::Internal(_) => "protocol aborted".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let early = Error::RoundOutOfOrder {
            phase: Phase::Triples,
            expected: 3,
            received: 4,
        };
        assert!(!early.is_fatal());
        assert_eq!(early.class(), ErrorClass::Retry);

        assert!(Error::OtDesync("q check".into()).is_fatal());
        assert_eq!(
            Error::OtDesync("q check".into()).class(),
            ErrorClass::RestartRequired
        );
        assert_eq!(
            Error::SessionNotFound("u/s".into()).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            Error::TripleAlreadyConsumed("s#0".into()).class(),
            ErrorClass::Rejected
        );
    }

    #[test]
    fn test_public_message_hides_details() {
        let e = Error::ProofVerificationFailed("dlog proof for triple 3".into());
        assert_eq!(e.public_message(), "protocol aborted");
    }
}
