//! Two-party ECDSA client
//!
//! HTTP access to the server party, and a [`Transport`] that lets the local
//! client party run a phase against it with [`run_phase`].

use dashmap::DashMap;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tecdsa_core::api::{DeliverRequest, ErrorBody, OpenRequest, StepResponse, WalletInfo};
use tecdsa_core::custody::WalletHandle;
use tecdsa_core::keygen::KeygenOutput;
use tecdsa_core::mpc::{async_trait, run_phase, driver::PhaseResult, Transport};
use tecdsa_core::session::{Envelope, PhaseRequest, PublicOutput, Registry, SessionInfo};
use tecdsa_core::{Error, ErrorClass, Result, Role, SessionKey, UserId};
use tracing::{debug, instrument};

/// Plain HTTP client for the server API
pub struct ServerClient {
    client: Client,
    url: String,
    timeout: Duration,
}

impl ServerClient {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{}", self.url, path))
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{}", self.url, path))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        decode(response).await
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        self.get("/health").await
    }

    pub async fn open(&self, request: &OpenRequest) -> Result<StepResponse> {
        self.post("/v1/sessions", request).await
    }

    pub async fn deliver(&self, request: &DeliverRequest) -> Result<StepResponse> {
        self.post("/v1/messages", request).await
    }

    pub async fn session_info(&self, key: &SessionKey) -> Result<SessionInfo> {
        self.get(&format!("/v1/sessions/{}/{}", key.user_id, key.session_id))
            .await
    }

    pub async fn wallet_info(&self, user: &UserId) -> Result<WalletInfo> {
        self.get(&format!("/v1/wallets/{user}")).await
    }
}

/// Failed requests come back as [`Error::Remote`] carrying the server's class
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| Error::Deserialization(e.to_string()));
    }
    match response.json::<ErrorBody>().await {
        Ok(body) => Err(body.into()),
        Err(_) => Err(Error::Transport(format!("request failed with status: {status}"))),
    }
}

/// Final public output the server reported for a session
#[derive(Debug, Clone)]
pub struct ServerOutcome {
    pub output: PublicOutput,
    pub wallet: Option<WalletHandle>,
}

/// Request/response transport to the server party.
///
/// The server answers every delivery with its next envelope, so `recv` only
/// ever reads what earlier calls already queued.
pub struct HttpTransport {
    server: ServerClient,
    inbox: DashMap<SessionKey, VecDeque<Envelope>>,
    outcomes: DashMap<SessionKey, ServerOutcome>,
}

impl HttpTransport {
    pub fn new(server: ServerClient) -> Self {
        Self {
            server,
            inbox: DashMap::new(),
            outcomes: DashMap::new(),
        }
    }

    pub fn server(&self) -> &ServerClient {
        &self.server
    }

    fn absorb(&self, key: &SessionKey, step: StepResponse) {
        debug!(session = %key, round = step.round, envelopes = step.outbound.len(), "Server stepped");
        self.inbox
            .entry(key.clone())
            .or_default()
            .extend(step.outbound);
        if let Some(output) = step.output {
            self.outcomes.insert(
                key.clone(),
                ServerOutcome {
                    output,
                    wallet: step.wallet,
                },
            );
        }
    }

    /// Open the server side of a phase and queue its first envelope
    #[instrument(skip(self, request), fields(session = %key))]
    pub async fn open(&self, key: &SessionKey, request: PhaseRequest) -> Result<()> {
        let step = self
            .server
            .open(&OpenRequest {
                user_id: key.user_id.clone(),
                session_id: key.session_id.clone(),
                open: request,
            })
            .await?;
        self.absorb(key, step);
        Ok(())
    }

    /// Server output for a finished session; clears what was kept for it
    pub fn take_outcome(&self, key: &SessionKey) -> Option<ServerOutcome> {
        self.inbox.remove(key);
        self.outcomes.remove(key).map(|(_, outcome)| outcome)
    }

    /// Run one phase as the client party against the server
    pub async fn run(
        &self,
        registry: &Registry,
        key: &SessionKey,
        request: PhaseRequest,
        wallet: Option<&KeygenOutput>,
    ) -> Result<(PhaseResult, Option<ServerOutcome>)> {
        self.open(key, request.clone()).await?;
        let result = run_phase(registry, self, key, Role::Client, request, wallet).await;
        let outcome = self.take_outcome(key);
        Ok((result?, outcome))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, key: &SessionKey, envelope: Envelope) -> Result<()> {
        if envelope.to != Role::Server {
            return Err(Error::UnexpectedMessage(format!(
                "envelope for {} cannot go to the server",
                envelope.to
            )));
        }
        let request = DeliverRequest {
            user_id: key.user_id.clone(),
            session_id: key.session_id.clone(),
            envelope,
        };
        match self.server.deliver(&request).await {
            Ok(step) => {
                self.absorb(key, step);
                Ok(())
            }
            // Early payload: the server keeps it until the gap is filled
            Err(Error::Remote {
                class: ErrorClass::Retry,
                message,
            }) => {
                debug!(session = %key, %message, "Server queued envelope");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn recv(&self, key: &SessionKey, me: Role) -> Result<Envelope> {
        if me != Role::Client {
            return Err(Error::UnexpectedMessage(format!(
                "http transport only carries envelopes for the client, not {me}"
            )));
        }
        self.inbox
            .get_mut(key)
            .and_then(|mut queue| queue.pop_front())
            .ok_or_else(|| Error::Transport(format!("server sent nothing further for {key}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::Arc;
    use tecdsa_core::keygen::KEYGEN_THRESHOLD;
    use tecdsa_core::session::{Advance, Completed};

    fn respond(result: Result<Advance>) -> AxumResponse {
        match result {
            Ok(advance) => Json(StepResponse::new(&advance, None)).into_response(),
            Err(e) => {
                let status = match e.class() {
                    ErrorClass::Retry => StatusCode::CONFLICT,
                    ErrorClass::RestartRequired => StatusCode::GONE,
                    ErrorClass::NotFound => StatusCode::NOT_FOUND,
                    ErrorClass::Rejected => StatusCode::BAD_REQUEST,
                };
                (status, Json(ErrorBody::from(&e))).into_response()
            }
        }
    }

    async fn open(State(registry): State<Arc<Registry>>, Json(req): Json<OpenRequest>) -> AxumResponse {
        respond(registry.begin(req.key(), Role::Server, req.open, None))
    }

    async fn deliver(
        State(registry): State<Arc<Registry>>,
        Json(req): Json<DeliverRequest>,
    ) -> AxumResponse {
        respond(registry.deliver(&req.key(), req.envelope))
    }

    fn server_party() -> Router {
        Router::new()
            .route("/health", get(|| async { Json(serde_json::json!({"status": "ok"})) }))
            .route("/v1/sessions", post(open))
            .route("/v1/messages", post(deliver))
            .with_state(Arc::new(Registry::default()))
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_envelope(key: &SessionKey) -> Envelope {
        Registry::default()
            .begin(
                key.clone(),
                Role::Client,
                PhaseRequest::Keygen {
                    threshold: KEYGEN_THRESHOLD,
                },
                None,
            )
            .unwrap()
            .outbound
            .unwrap()
    }

    #[tokio::test]
    async fn test_keygen_against_server() {
        let url = serve(server_party()).await;
        let transport = HttpTransport::new(ServerClient::new(&url));
        assert_eq!(transport.server().health().await.unwrap()["status"], "ok");

        let registry = Registry::default();
        let key = SessionKey::new("alice", "keygen-1");
        let (result, outcome) = transport
            .run(
                &registry,
                &key,
                PhaseRequest::Keygen {
                    threshold: KEYGEN_THRESHOLD,
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.rounds, 5);
        let Completed::Keygen(share) = result.completed else {
            panic!("keygen produced another output");
        };
        match outcome.unwrap().output {
            PublicOutput::Keygen { public_key } => assert_eq!(public_key, share.public_key),
            other => panic!("server reported {other:?}"),
        }
        assert!(transport.take_outcome(&key).is_none());
    }

    #[tokio::test]
    async fn test_server_errors_become_remote() {
        let url = serve(server_party()).await;
        let transport = HttpTransport::new(ServerClient::new(&url));
        let key = SessionKey::new("bob", "never-opened");

        let err = transport.send(&key, client_envelope(&key)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Remote {
                class: ErrorClass::NotFound,
                ..
            }
        ));
        assert!(matches!(
            transport.recv(&key, Role::Client).await,
            Err(Error::Transport(_))
        ));
        assert!(transport.recv(&key, Role::Server).await.is_err());
    }

    #[tokio::test]
    async fn test_retry_is_not_an_error() {
        let busy = Router::new().route(
            "/v1/messages",
            post(|| async {
                (
                    StatusCode::CONFLICT,
                    Json(ErrorBody {
                        error: ErrorClass::Retry,
                        message: "round out of order".into(),
                    }),
                )
            }),
        );
        let url = serve(busy).await;
        let transport = HttpTransport::new(ServerClient::new(&url));
        let key = SessionKey::new("carol", "k");

        transport.send(&key, client_envelope(&key)).await.unwrap();
        assert!(transport.recv(&key, Role::Client).await.is_err());
    }

    #[tokio::test]
    async fn test_server_abort_drops_client_session() {
        let aborting = Router::new()
            .route("/v1/sessions", post(open))
            .route(
                "/v1/messages",
                post(|| async {
                    (
                        StatusCode::GONE,
                        Json(ErrorBody {
                            error: ErrorClass::RestartRequired,
                            message: "protocol aborted".into(),
                        }),
                    )
                }),
            )
            .with_state(Arc::new(Registry::default()));
        let url = serve(aborting).await;
        let transport = HttpTransport::new(ServerClient::new(&url));

        let registry = Registry::default();
        let key = SessionKey::new("dave", "keygen");
        let request = PhaseRequest::Keygen {
            threshold: KEYGEN_THRESHOLD,
        };
        let err = transport
            .run(&registry, &key, request.clone(), None)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(registry.is_empty());

        // a fresh attempt under the same key gets past the local open
        assert!(registry.begin(key, Role::Client, request, None).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let client = ServerClient::new("http://127.0.0.1:9/").with_timeout(Duration::from_millis(500));
        assert!(matches!(client.health().await, Err(Error::Transport(_))));
    }
}
