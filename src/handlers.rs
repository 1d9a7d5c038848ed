//! HTTP surface of the payment gate.
//!
//! `require_payment` is the axum middleware that runs the admission protocol
//! in front of any priced route; the other handlers are the unpriced
//! operational surface (health, admin budget management). All rejection
//! bodies state the remedy without leaking verification internals.

use axum::Json;
use axum::Router;
use axum::extract::{Extension, Path, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::budget::{BudgetPeriod, BudgetStatus};
use crate::gate::{GateRejection, PaymentContext, PaymentGate, WalletId};
use crate::timestamp::UnixTimestamp;

/// Payment proof: the transaction hash of a settled USDC transfer.
pub const HEADER_TX_HASH: &str = "x-payment-txhash";
/// Chain selector; defaults to the registry default when absent.
pub const HEADER_NETWORK: &str = "x-payment-network";
/// Payer wallet id; opts the request into rate limiting and budgeting.
pub const HEADER_WALLET: &str = "x-wallet-address";

/// Shared state behind every handler.
pub struct AppState {
    pub gate: PaymentGate,
}

/// The verified payment attached to an admitted request, for downstream
/// handlers that want to know who paid.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub payer: Option<alloy_primitives::Address>,
    pub wallet: Option<WalletId>,
}

/// Full router: unpriced operational routes plus the gated demo route.
pub fn app(state: Arc<AppState>) -> Router {
    let paid = Router::new()
        .route("/api/ping", get(premium_ping))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_payment,
        ));
    Router::new().merge(routes()).merge(paid).with_state(state)
}

/// Unpriced routes: liveness and budget administration.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/admin/budgets", get(list_budgets))
        .route(
            "/admin/budgets/{wallet}",
            get(get_budget).put(put_budget).delete(delete_budget),
        )
}

/// Build the typed request context from transport headers.
fn payment_context(headers: &HeaderMap) -> PaymentContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    PaymentContext {
        chain_key: header(HEADER_NETWORK),
        tx_hash: header(HEADER_TX_HASH),
        wallet: header(HEADER_WALLET).map(|w| WalletId::new(&w)),
    }
}

/// Admission middleware for priced routes.
///
/// On admission the downstream handler runs and the response gains advisory
/// budget headers; on rejection the mapped error response is returned and the
/// handler is never invoked.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn require_payment(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = payment_context(request.headers());
    let action = request.uri().path().to_string();

    match state.gate.admit(&ctx, &action).await {
        Ok(admission) => {
            request.extensions_mut().insert(VerifiedPayment {
                payer: admission.payer,
                wallet: admission.wallet.clone(),
            });
            let mut response = next.run(request).await;
            if let Some(budget) = &admission.budget {
                append_budget_headers(response.headers_mut(), budget, admission.alert);
            }
            response
        }
        Err(rejection) => rejection.into_response(),
    }
}

fn append_budget_headers(headers: &mut HeaderMap, budget: &BudgetStatus, alert: Option<u8>) {
    let set = |headers: &mut HeaderMap, name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    };
    set(headers, "x-budget-remaining", budget.remaining.to_string());
    set(
        headers,
        "x-budget-used-percent",
        budget.used_percent.to_string(),
    );
    if let Some(threshold) = alert {
        set(headers, "x-budget-alert", threshold.to_string());
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        match self {
            GateRejection::UnknownChain {
                requested,
                accepted,
            } => {
                let list = accepted.join(", ");
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "unsupported_chain",
                        "message": format!(
                            "Unsupported chain '{requested}'. Accepted chains: {list}"
                        ),
                        "accepted": accepted,
                    })),
                )
                    .into_response()
            }
            GateRejection::InvalidProof(_) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "invalid_payment_proof",
                    "message": format!(
                        "The {HEADER_TX_HASH} header must be a 0x-prefixed 64-character hex transaction hash."
                    ),
                })),
            )
                .into_response(),
            GateRejection::RateLimited(decision) => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({
                        "error": "rate_limit_exceeded",
                        "message": format!(
                            "Too many requests from this wallet. Retry in {} seconds.",
                            decision.reset_secs
                        ),
                    })),
                )
                    .into_response();
                let headers = response.headers_mut();
                let set = |headers: &mut HeaderMap, name: &'static str, value: String| {
                    if let Ok(value) = HeaderValue::from_str(&value) {
                        headers.insert(name, value);
                    }
                };
                set(headers, "x-ratelimit-limit", decision.limit.to_string());
                set(
                    headers,
                    "x-ratelimit-remaining",
                    decision.remaining.to_string(),
                );
                set(headers, "x-ratelimit-reset", decision.reset_secs.to_string());
                set(headers, "retry-after", decision.reset_secs.to_string());
                response
            }
            GateRejection::BudgetExceeded { reason, status } => (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "error": "budget_exceeded",
                    "message": format!("{reason}. Wait for the period to reset or raise the budget."),
                    "budget": {
                        "max": status.max_amount,
                        "spent": status.spent_amount,
                        "remaining": status.remaining,
                    },
                })),
            )
                .into_response(),
            GateRejection::PaymentRequired(instructions) => {
                let details = &instructions.details;
                let mut body = json!({
                    "error": "payment_required",
                    "message": format!(
                        "Payment of {} USDC required. Send USDC on {} to {} and retry with the {} header.",
                        details.amount, details.network, details.recipient, HEADER_TX_HASH
                    ),
                    "payment_details": details,
                });
                if let Some(extensions) = &instructions.extensions {
                    body["extensions"] = extensions.clone();
                }
                (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response()
            }
            GateRejection::ProofConsumed => (
                StatusCode::PAYMENT_REQUIRED,
                Json(json!({
                    "error": "payment_already_used",
                    "message": "This payment transaction has already been used. Send a new payment and retry.",
                })),
            )
                .into_response(),
            GateRejection::NotVerified => (
                StatusCode::PAYMENT_REQUIRED,
                Json(json!({
                    "error": "payment_not_verified",
                    "message": "Payment could not be verified on-chain. Confirm the transaction succeeded and paid the required amount, or send a new payment.",
                })),
            )
                .into_response(),
            GateRejection::ReplayUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "verification_unavailable",
                    "message": "Payment verification is temporarily unavailable. Retry in a moment.",
                })),
            )
                .into_response(),
            GateRejection::VerificationUnavailable => (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "verification_failed",
                    "message": "Could not reach the payment network to verify the transaction. Retry in a moment.",
                })),
            )
                .into_response(),
        }
    }
}

/// `GET /health`: liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Demo priced route: proves the full payment loop for a deployment.
/// Real priced endpoints live in downstream services.
pub async fn premium_ping(payment: Option<Extension<VerifiedPayment>>) -> impl IntoResponse {
    let payer = payment
        .as_ref()
        .and_then(|p| p.payer)
        .map(|a| a.to_string());
    Json(json!({
        "ok": true,
        "time": UnixTimestamp::now().as_secs(),
        "payer": payer,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetBudgetRequest {
    pub max_amount: Decimal,
    pub period: BudgetPeriod,
}

/// `GET /admin/budgets`: all wallet budgets, lazily reset.
#[instrument(skip_all)]
pub async fn list_budgets(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.gate.budgets().list_budgets().await)
}

/// `GET /admin/budgets/{wallet}`
#[instrument(skip_all)]
pub async fn get_budget(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Response {
    let wallet = WalletId::new(&wallet);
    match state.gate.budgets().get_budget(&wallet).await {
        Some(status) => Json(status).into_response(),
        None => budget_not_found(&wallet),
    }
}

/// `PUT /admin/budgets/{wallet}`: create a budget or change its cap/period.
#[instrument(skip_all)]
pub async fn put_budget(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
    Json(body): Json<SetBudgetRequest>,
) -> Response {
    if body.max_amount.is_sign_negative() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_budget",
                "message": "max_amount must not be negative.",
            })),
        )
            .into_response();
    }
    let wallet = WalletId::new(&wallet);
    let status = state
        .gate
        .budgets()
        .set_budget(&wallet, body.max_amount, body.period)
        .await;
    Json(status).into_response()
}

/// `DELETE /admin/budgets/{wallet}`
#[instrument(skip_all)]
pub async fn delete_budget(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Response {
    let wallet = WalletId::new(&wallet);
    if state.gate.budgets().remove_budget(&wallet).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        budget_not_found(&wallet)
    }
}

fn budget_not_found(wallet: &WalletId) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "budget_not_found",
            "message": format!("No budget configured for wallet {wallet}."),
        })),
    )
        .into_response()
}
