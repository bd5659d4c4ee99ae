/// Router and listeners for the mock Esplora API
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::*;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    // browser-based wallets call the mock cross-origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))

        // Chain
        .route("/blocks/tip/height", get(get_tip_height))
        .route("/fee-estimates", get(get_fee_estimates))

        // Transactions
        .route("/tx", post(broadcast_transaction))
        .route("/tx/:txid", get(get_transaction))
        .route("/tx/:txid/hex", get(get_transaction_hex))

        // Addresses
        .route("/address/:address", get(get_address))
        .route("/address/:address/utxo", get(get_address_utxos))

        .layer(middleware::from_fn_with_state(state.clone(), record_and_inject_failures))

        .with_state(state)

        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server(state: AppState, host: String, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("🚀 Esplora mock server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// A mock server running on an ephemeral local port
pub struct MockServer {
    pub addr: SocketAddr,
    pub state: AppState,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Base URL of the Esplora API
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Bind 127.0.0.1 on a free port and serve `state` in the background
pub async fn spawn_server(state: AppState) -> anyhow::Result<MockServer> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = create_router(state.clone());

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::warn!("Esplora mock server stopped: {}", e);
        }
    });
    log::debug!("Esplora mock server listening on http://{}", addr);

    Ok(MockServer { addr, state, handle })
}
