/// Axum HTTP handlers for Esplora API endpoints
use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::BTreeMap;
use std::sync::MutexGuard;

use crate::state::{decode_transaction, AppState, MockChain};
use crate::types::*;

/// Custom error type for handlers
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Status(u16),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Status(code) => (
                StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                format!("injected failure {}", code),
            ),
        };

        (status, message).into_response()
    }
}

fn lock(state: &AppState) -> MutexGuard<'_, MockChain> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Record every request and answer configured paths with their failure status
pub async fn record_and_inject_failures(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let failure = {
        let mut chain = lock(&state);
        chain.requests.push(path.clone());
        chain.failures.get(&path).copied()
    };

    if let Some(code) = failure {
        log::debug!("Injecting HTTP {} for {}", code, path);
        return ApiError::Status(code).into_response();
    }
    next.run(request).await
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /blocks/tip/height
/// Returns the current blockchain height as plain text
pub async fn get_tip_height(State(state): State<AppState>) -> String {
    lock(&state).tip_height.to_string()
}

/// GET /fee-estimates
pub async fn get_fee_estimates(State(state): State<AppState>) -> Json<BTreeMap<String, f64>> {
    Json(lock(&state).fee_estimates.clone())
}

/// POST /tx
/// Accepts a raw transaction (hex string in body), returns the txid as plain text
pub async fn broadcast_transaction(
    State(state): State<AppState>,
    body: String,
) -> Result<String, ApiError> {
    let tx = decode_transaction(&body)
        .map_err(|e| ApiError::BadRequest(format!("Failed to decode transaction: {}", e)))?;
    let txid = tx.compute_txid().to_string();

    let mut chain = lock(&state);
    chain
        .add_transaction(body.trim(), false)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    chain.broadcasts.push(body.trim().to_string());

    log::info!("📡 Accepted broadcast {}", txid);
    Ok(txid)
}

/// GET /tx/{txid}
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(txid): Path<String>,
) -> Result<Json<TxResponse>, ApiError> {
    lock(&state)
        .transaction_response(&txid)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Transaction not found: {}", txid)))
}

/// GET /tx/{txid}/hex
pub async fn get_transaction_hex(
    State(state): State<AppState>,
    Path(txid): Path<String>,
) -> Result<String, ApiError> {
    lock(&state)
        .transactions
        .get(&txid)
        .map(|tx| tx.hex.clone())
        .ok_or_else(|| ApiError::NotFound(format!("Transaction not found: {}", txid)))
}

/// GET /address/{address}
/// Unknown addresses report zero activity
pub async fn get_address(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Json<AddressResponse> {
    Json(lock(&state).address_response(&address))
}

/// GET /address/{address}/utxo
pub async fn get_address_utxos(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Json<Vec<UtxoResponse>> {
    let utxos = lock(&state)
        .addresses
        .get(&address)
        .map(|a| a.utxos.clone())
        .unwrap_or_default();
    Json(utxos)
}
