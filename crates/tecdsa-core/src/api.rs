//! HTTP payloads shared by the reference server and client

use crate::custody::WalletHandle;
use crate::error::{Error, ErrorClass};
use crate::session::{Advance, Envelope, PhaseRequest, PublicOutput};
use crate::types::{SessionId, SessionKey, UserId};
use serde::{Deserialize, Serialize};

/// `POST /v1/sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRequest {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub open: PhaseRequest,
}

/// `POST /v1/messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverRequest {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub envelope: Envelope,
}

impl OpenRequest {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

impl DeliverRequest {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

/// Answer to an open or a delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponse {
    pub round: u8,
    pub outbound: Vec<Envelope>,
    pub output: Option<PublicOutput>,
    /// Wallet a finished keygen was stored under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<WalletHandle>,
}

impl StepResponse {
    pub fn new(advance: &Advance, wallet: Option<WalletHandle>) -> Self {
        Self {
            round: advance.round,
            outbound: advance.outbound.iter().cloned().collect(),
            output: advance.completed.as_ref().map(|c| c.public()),
            wallet,
        }
    }
}

/// Body of every failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorClass,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(e: &Error) -> Self {
        Self {
            error: e.class(),
            message: e.public_message(),
        }
    }
}

impl From<ErrorBody> for Error {
    fn from(body: ErrorBody) -> Self {
        Error::Remote {
            class: body.error,
            message: body.message,
        }
    }
}

/// `GET /v1/wallets/:user_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletInfo {
    pub user_id: UserId,
    pub wallet: Option<WalletHandle>,
    /// SEC1 compressed public key, hex
    pub public_key: Option<String>,
    pub triples_available: usize,
    pub presigns_available: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Phase;

    #[test]
    fn test_open_request_layout() {
        let json = r#"{"user_id":"alice","session_id":"s1","open":{"phase":"triples","count":1}}"#;
        let req: OpenRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.open.phase(), Phase::Triples);
        assert_eq!(req.key(), SessionKey::new("alice", "s1"));

        let sign = r#"{"phase":"sign","presign":"p1","digest":"deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef"}"#;
        match serde_json::from_str::<PhaseRequest>(sign).unwrap() {
            PhaseRequest::Sign { presign, digest } => {
                assert_eq!(presign, SessionId("p1".into()));
                assert_eq!(digest[..4], [0xde, 0xad, 0xbe, 0xef]);
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn test_error_body_hides_details() {
        let err = Error::ProofVerificationFailed("dlog for triple 3".into());
        let body = ErrorBody::from(&err);
        assert_eq!(body.error, ErrorClass::RestartRequired);
        assert!(!body.message.contains("triple 3"));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "restart_required");

        let remote: Error = body.into();
        assert!(remote.is_fatal());
    }
}
