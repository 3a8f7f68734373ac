//! HTTP routes of the server party

use crate::custody::SealedCustodian;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tecdsa_core::api::{DeliverRequest, ErrorBody, OpenRequest, StepResponse, WalletInfo};
use tecdsa_core::custody::KeyCustodian;
use tecdsa_core::session::{Advance, Completed, PhaseRequest, Registry, SessionInfo};
use tecdsa_core::types::point_to_bytes;
use tecdsa_core::{Error, ErrorClass, Role, SessionKey, UserId};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Application state
pub struct AppState {
    pub registry: Registry,
    pub custodian: SealedCustodian,
}

/// Engine error rendered as `{"error": class, "message": text}`
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Deserialization(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.class() {
            ErrorClass::Retry => StatusCode::CONFLICT,
            ErrorClass::RestartRequired => StatusCode::GONE,
            ErrorClass::NotFound => StatusCode::NOT_FOUND,
            ErrorClass::Rejected => StatusCode::BAD_REQUEST,
        };
        if status != StatusCode::CONFLICT {
            warn!(error = %self.0, %status, "Request failed");
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/sessions", post(open_session))
        .route("/v1/sessions/:user_id/:session_id", get(session_info))
        .route("/v1/messages", post(deliver_message))
        .route("/v1/wallets/:user_id", get(wallet_info))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tecdsa-server",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Run a registry call off the async workers; triple batches are CPU-bound
async fn blocking<T, F>(state: &Arc<AppState>, f: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce(&Registry) -> Result<T, Error> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state.registry))
        .await
        .map_err(|e| Error::Internal(format!("worker failed: {e}")))?
}

/// Hand a finished keygen to the custodian
async fn finish(state: &AppState, key: &SessionKey, advance: &Advance) -> Result<StepResponse, Error> {
    let wallet = match &advance.completed {
        Some(Completed::Keygen(output)) => {
            let wallet = state.custodian.store(&key.user_id, output).await?;
            info!(session = %key, %wallet, "Wallet created");
            Some(wallet)
        }
        _ => None,
    };
    Ok(StepResponse::new(advance, wallet))
}

/// Open a phase as the server party
async fn open_session(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<OpenRequest>, JsonRejection>,
) -> ApiResult<StepResponse> {
    let Json(req) = payload?;
    let key = req.key();
    let wallet = match &req.open {
        PhaseRequest::Presign { .. } => {
            let handle = state
                .custodian
                .wallet_for(&key.user_id)
                .await?
                .ok_or_else(|| Error::Custody(format!("no wallet for {}", key.user_id)))?;
            Some(state.custodian.load(&handle).await?)
        }
        _ => None,
    };

    info!(session = %key, phase = %req.open.phase(), "Opening session");
    let open_key = key.clone();
    let advance = blocking(&state, move |registry| {
        registry.begin(open_key, Role::Server, req.open, wallet.as_ref())
    })
    .await?;
    Ok(Json(finish(&state, &key, &advance).await?))
}

/// Deliver client payloads to a session
async fn deliver_message(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DeliverRequest>, JsonRejection>,
) -> ApiResult<StepResponse> {
    let Json(req) = payload?;
    let key = req.key();
    let deliver_key = key.clone();
    let advance = blocking(&state, move |registry| {
        registry.deliver(&deliver_key, req.envelope)
    })
    .await?;
    Ok(Json(finish(&state, &key, &advance).await?))
}

async fn session_info(
    State(state): State<Arc<AppState>>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> ApiResult<SessionInfo> {
    Ok(Json(
        state
            .registry
            .info(&SessionKey::new(user_id, session_id))?,
    ))
}

async fn wallet_info(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<WalletInfo> {
    let user = UserId(user_id);
    let wallet = state.custodian.wallet_for(&user).await?;
    let public_key = match &wallet {
        Some(handle) => {
            let output = state.custodian.load(handle).await?;
            Some(hex::encode(point_to_bytes(&output.public_key)))
        }
        None => None,
    };
    Ok(Json(WalletInfo {
        triples_available: state.registry.triples().available(&user).len(),
        presigns_available: state.registry.presigns().available(&user).len(),
        user_id: user,
        wallet,
        public_key,
    }))
}
