//! REST API handlers for wallet and proposal operations
//!
//! Manager calls block on store writes, so every handler runs them on the
//! blocking thread pool.

use crate::core::{FeeRate, OutPoint, SignatureScheme, TxId, TxOutput};
use crate::crypto::{BoundSignature, BoundSignatureObject, CurvePoint};
use crate::multisig::{
    MultisigError, MultisigManager, Proposal, ProposalRequest, ProposalStatus, WalletBalance,
};
use crate::utxo::Utxo;
use crate::wallet::{Copayer, Wallet, WalletAddress};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

/// Header carrying the calling copayer's id
pub const IDENTITY_HEADER: &str = "x-identity";

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<MultisigManager>,
}

impl ApiState {
    /// Run a manager call on the blocking pool
    async fn run<T, F>(&self, f: F) -> ApiResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&MultisigManager) -> Result<T, MultisigError> + Send + 'static,
    {
        let manager = self.manager.clone();
        match tokio::task::spawn_blocking(move || f(&manager)).await {
            Ok(result) => result.map(Json).map_err(api_error),
            Err(e) => {
                log::error!("Request task failed: {}", e);
                Err(api_error(MultisigError::InvariantViolation(format!(
                    "request task failed: {}",
                    e
                ))))
            }
        }
    }
}

/// JSON request body; malformed bodies answer with `INVALID_ARGUMENT`
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(invalid(format!(
                "malformed body: {}",
                rejection.body_text()
            ))),
        }
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    #[serde(flatten)]
    pub wallet: Wallet,
    pub balance: WalletBalance,
}

#[derive(Serialize)]
pub struct JoinResponse {
    pub wallet: Wallet,
    pub copayer: Copayer,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
pub struct CreateWalletRequest {
    pub name: String,
    pub m: u8,
    pub n: u8,
    #[serde(default)]
    pub scheme: SignatureScheme,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinWalletRequest {
    pub name: String,
    pub public_key: String,
    /// Key the copayer authenticates requests with; defaults to `public_key`
    pub request_pub_key: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct CreateAddressRequest {
    #[serde(default)]
    pub change: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUtxoRequest {
    pub tx_id: String,
    pub output_index: u32,
    pub amount: u64,
    pub address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProposalRequest {
    pub wallet_id: String,
    pub outputs: Vec<TxOutput>,
    /// sat/vbyte
    pub fee_rate: u64,
    pub message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListProposalsQuery {
    pub wallet_id: String,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct SignaturesRequest {
    pub signatures: Vec<BoundSignatureObject>,
}

#[derive(Deserialize, Default)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

// ============================================================================
// Error mapping
// ============================================================================

/// HTTP status for a stable error code
pub fn status_for(code: &str) -> StatusCode {
    match code {
        "INVALID_POINT" | "INVALID_X" | "LIFT_FAILED" | "INVALID_ARGUMENT" => {
            StatusCode::BAD_REQUEST
        }
        "NOT_AUTHORIZED" => StatusCode::FORBIDDEN,
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        "DUPLICATE_VOTE" | "LOCK_CONFLICT" | "INVALID_STATE_TRANSITION" | "WALLET_FULL"
        | "COPAYER_EXISTS" => StatusCode::CONFLICT,
        "SIGNATURE_MISMATCH" | "INSUFFICIENT_FUNDS" | "WALLET_NOT_COMPLETE" => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        "BROADCAST_FAILED" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(e: MultisigError) -> (StatusCode, Json<ApiError>) {
    let code = e.code();
    (
        status_for(code),
        Json(ApiError {
            code: code.to_string(),
            error: e.to_string(),
        }),
    )
}

fn invalid(message: String) -> (StatusCode, Json<ApiError>) {
    api_error(MultisigError::InvalidArgument(message))
}

/// Copayer id of the caller, from the identity header
fn identity(headers: &HeaderMap) -> Result<String, (StatusCode, Json<ApiError>)> {
    headers
        .get(IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            api_error(MultisigError::NotAuthorized(format!(
                "missing {} header",
                IDENTITY_HEADER
            )))
        })
}

/// Decode an optional JSON body; an empty body yields the defaults
fn optional_body<T: DeserializeOwned + Default>(
    body: &[u8],
) -> Result<T, (StatusCode, Json<ApiError>)> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| invalid(format!("malformed body: {}", e)))
}

fn parse_point(hex_str: &str) -> Result<CurvePoint, (StatusCode, Json<ApiError>)> {
    CurvePoint::from_hex(hex_str).map_err(|e| api_error(e.into()))
}

// ============================================================================
// Wallet Handlers
// ============================================================================

/// GET /health - Health check
pub async fn health_check() -> &'static str {
    "OK"
}

/// POST /wallets - Register a new M-of-N wallet
pub async fn create_wallet(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<CreateWalletRequest>,
) -> ApiResult<Wallet> {
    state
        .run(move |m| m.register_wallet(&req.name, req.m, req.n, req.scheme))
        .await
}

/// GET /wallets/{id} - Wallet details with balance
pub async fn get_wallet(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<WalletResponse> {
    state
        .run(move |m| {
            let wallet = m.get_wallet(&id)?;
            let balance = m.balance(&id)?;
            Ok(WalletResponse { wallet, balance })
        })
        .await
}

/// POST /wallets/{id}/copayers - Join a copayer
pub async fn join_wallet(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<JoinWalletRequest>,
) -> ApiResult<JoinResponse> {
    let public_key = parse_point(&req.public_key)?;
    let request_pub_key = match &req.request_pub_key {
        Some(hex_str) => parse_point(hex_str)?,
        None => public_key,
    };

    state
        .run(move |m| {
            let (wallet, copayer) = m.join_wallet(&id, &req.name, public_key, request_pub_key)?;
            Ok(JoinResponse { wallet, copayer })
        })
        .await
}

/// POST /wallets/{id}/addresses - Derive the next address
pub async fn create_address(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<WalletAddress> {
    let req: CreateAddressRequest = optional_body(&body)?;
    state.run(move |m| m.create_address(&id, req.change)).await
}

/// POST /wallets/{id}/utxos - Record funds received by the wallet
pub async fn register_utxo(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<RegisterUtxoRequest>,
) -> ApiResult<Utxo> {
    let tx_id: TxId = req
        .tx_id
        .parse()
        .map_err(|_| invalid(format!("invalid txId: {}", req.tx_id)))?;
    let outpoint = OutPoint::new(tx_id, req.output_index);

    state
        .run(move |m| m.register_utxo(&id, outpoint, req.amount, &req.address))
        .await
}

// ============================================================================
// Proposal Handlers
// ============================================================================

/// POST /txproposals - Create a proposal, already published
pub async fn create_proposal(
    State(state): State<ApiState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<CreateProposalRequest>,
) -> ApiResult<Proposal> {
    let creator = identity(&headers)?;
    let request = ProposalRequest {
        wallet_id: req.wallet_id,
        creator_id: creator,
        outputs: req.outputs,
        fee_rate: FeeRate::from_sat_per_byte(req.fee_rate),
        message: req.message,
    };
    state.run(move |m| m.create_published(request)).await
}

/// GET /txproposals?walletId=..&status=.. - List proposals of a wallet
pub async fn list_proposals(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ListProposalsQuery>,
) -> ApiResult<Vec<Proposal>> {
    let requester = identity(&headers)?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ProposalStatus>)
        .transpose()
        .map_err(api_error)?;

    state
        .run(move |m| m.list(&query.wallet_id, &requester, status))
        .await
}

/// GET /txproposals/{id} - Get one proposal
pub async fn get_proposal(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Proposal> {
    let requester = identity(&headers)?;
    state.run(move |m| m.get(&id, &requester)).await
}

/// POST /txproposals/{id}/publish - Publish a draft
pub async fn publish_proposal(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Proposal> {
    let copayer = identity(&headers)?;
    state.run(move |m| m.publish(&id, &copayer)).await
}

/// POST /txproposals/{id}/signatures - Submit the caller's signature set
pub async fn submit_signatures(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<SignaturesRequest>,
) -> ApiResult<Proposal> {
    let copayer = identity(&headers)?;
    let signatures = req
        .signatures
        .into_iter()
        .map(BoundSignature::from_object)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| api_error(e.into()))?;

    state
        .run(move |m| m.submit_signatures(&id, &copayer, signatures))
        .await
}

/// POST /txproposals/{id}/rejections - Reject a proposal
pub async fn reject_proposal(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Proposal> {
    let copayer = identity(&headers)?;
    let req: RejectRequest = optional_body(&body)?;
    state.run(move |m| m.reject(&id, &copayer, req.reason)).await
}

/// POST /txproposals/{id}/broadcast - Broadcast a signed proposal
pub async fn broadcast_proposal(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Proposal> {
    let copayer = identity(&headers)?;
    state.run(move |m| m.broadcast(&id, &copayer)).await
}

/// DELETE /txproposals/{id} - Remove an unsigned proposal
pub async fn remove_proposal(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Proposal> {
    let copayer = identity(&headers)?;
    state.run(move |m| m.remove(&id, &copayer)).await
}
