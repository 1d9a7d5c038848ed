//! Payment gate HTTP entrypoint.
//!
//! Launches an Axum server that fronts priced routes with the x402 admission
//! protocol:
//! - `GET /health` – liveness probe
//! - `GET|PUT|DELETE /admin/budgets[/{wallet}]` – wallet budget management
//! - `GET /api/ping` – demo priced route behind the payment gate
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control the binding address
//! - `RECEIVING_WALLET`, `PRICE_USDC`, `NETWORK_MODE`, `RATE_LIMIT`,
//!   `GATE_DB_PATH` configure the gate when not set in `config.json`

use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use x402_gate::config::Config;
use x402_gate::gate::PaymentGate;
use x402_gate::handlers::{self, AppState};
use x402_gate::lifecycle::Lifecycle;
use x402_gate::ratelimit;
use x402_gate::store::SledStore;
use x402_gate::telemetry::Telemetry;
use x402_gate::verifier::RpcVerifier;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;
    let registry = Arc::new(config.registry()?);
    let receiving_wallet = config.receiving_wallet()?;
    tracing::info!(
        mode = %config.network_mode(),
        chains = ?registry.accepted_keys(),
        default = registry.default_key(),
        "chain registry ready"
    );

    let store = Arc::new(SledStore::open(config.db_path())?);
    let verifier = Arc::new(RpcVerifier::new(registry.clone(), receiving_wallet));
    let gate = PaymentGate::new(
        registry,
        verifier,
        store,
        receiving_wallet,
        config.price().clone(),
        config.rate_limit(),
    )
    .await?;

    let lifecycle = Lifecycle::try_new()?;
    lifecycle.spawn(ratelimit::run_sweeper(
        gate.limiter(),
        lifecycle.cancellation_token(),
    ));

    let state = Arc::new(AppState { gate });
    let app = handlers::app(state)
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!("Failed to bind to {}: {}", addr, e);
        e
    })?;

    let shutdown_token = lifecycle.cancellation_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await?;

    lifecycle.shutdown().await;
    Ok(())
}
