//! The payment gate: composes registry, verifier, anti-replay guard, rate
//! limiter, and budget guardian into one admission protocol.
//!
//! `admit` walks the request through boundary validation, rate limiting,
//! budget pre-check, 402 instruction emission, proof validation, replay
//! check, on-chain verification, the atomic claim, and the budget charge.
//! Steps between the replay check and the claim are the critical section: no
//! lock protects them, correctness rests solely on the store's insert-only
//! claim write. Degradation is fail-closed throughout: on infrastructure
//! doubt the request is rejected, never admitted.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::instrument;

use crate::budget::{BudgetDecision, BudgetGuardian, BudgetStatus};
use crate::money::{MoneyAmount, MoneyAmountError, USDC_DECIMALS};
use crate::ratelimit::{RateDecision, WalletRateLimiter};
use crate::registry::ChainRegistry;
use crate::replay::AntiReplayGuard;
use crate::store::GateStore;
use crate::verifier::{ProofFormatError, TransactionHash, TransferVerifier};

/// A payer wallet identifier, lowercased so budgets and rate windows key
/// consistently regardless of how the caller cased the address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(String);

impl WalletId {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for WalletId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed request context, built once at the transport boundary.
#[derive(Debug, Clone, Default)]
pub struct PaymentContext {
    /// Requested chain key, if any; validated against the registry.
    pub chain_key: Option<String>,
    /// Raw payment proof (transaction hash string), if any.
    pub tx_hash: Option<String>,
    /// Payer wallet id, if any; enables rate limiting and budgeting.
    pub wallet: Option<WalletId>,
}

/// One entry of the payer-facing network list in a 402 response.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkOffer {
    pub network: String,
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    pub label: String,
    pub usdc_contract: String,
    pub explorer: String,
    pub gas: String,
}

/// The `payment_details` block of a 402 response.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentDetails {
    pub amount: String,
    pub currency: String,
    pub network: String,
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    pub networks: Vec<NetworkOffer>,
    pub recipient: String,
    pub accepted: Vec<String>,
    pub action: String,
}

/// Everything a payer needs to settle and retry.
#[derive(Debug, Clone)]
pub struct PaymentInstructions {
    pub details: PaymentDetails,
    /// Machine-discoverable endpoint metadata, when a discovery registry
    /// knows the action.
    pub extensions: Option<serde_json::Value>,
}

/// Machine-discoverable metadata for priced endpoints, keyed by action.
/// Maintained by an external discovery service; the gate only forwards it.
pub trait DiscoveryRegistry: Send + Sync {
    fn extensions(&self, action: &str) -> Option<serde_json::Value>;
}

/// An admitted, settled payment. Downstream sinks (activity feeds,
/// dashboards) are external collaborators behind this seam.
#[derive(Debug)]
pub struct ActivityEvent<'a> {
    pub action: &'a str,
    pub chain_key: &'a str,
    pub tx_hash: &'a TransactionHash,
    pub payer: Option<Address>,
    pub wallet: Option<&'a WalletId>,
}

pub trait ActivitySink: Send + Sync {
    fn admitted(&self, event: &ActivityEvent<'_>);
}

/// Default sink: structured log lines.
pub struct TracingActivity;

impl ActivitySink for TracingActivity {
    fn admitted(&self, event: &ActivityEvent<'_>) {
        tracing::info!(
            action = %event.action,
            chain = %event.chain_key,
            tx = %event.tx_hash,
            payer = ?event.payer,
            wallet = ?event.wallet,
            "payment admitted"
        );
    }
}

/// Successful admission; carries advisory budget data for response headers.
#[derive(Debug)]
pub struct Admission {
    pub payer: Option<Address>,
    pub wallet: Option<WalletId>,
    pub budget: Option<BudgetStatus>,
    /// Budget threshold newly crossed by this charge, if any.
    pub alert: Option<u8>,
}

/// Every rejecting terminal of the admission protocol.
///
/// `ProofConsumed` covers both a detected replay and a lost claim race: the
/// two must stay externally indistinguishable, so they share one variant and
/// one wording.
#[derive(Debug, thiserror::Error)]
pub enum GateRejection {
    #[error("unsupported chain '{requested}'")]
    UnknownChain {
        requested: String,
        accepted: Vec<String>,
    },
    #[error("rate limit exceeded")]
    RateLimited(RateDecision),
    #[error("budget exceeded: {reason}")]
    BudgetExceeded {
        reason: String,
        status: BudgetStatus,
    },
    #[error("payment required")]
    PaymentRequired(Box<PaymentInstructions>),
    #[error(transparent)]
    InvalidProof(#[from] ProofFormatError),
    #[error("payment transaction already used")]
    ProofConsumed,
    #[error("payment not verified on-chain")]
    NotVerified,
    #[error("replay guard unavailable")]
    ReplayUnavailable,
    #[error("verification unavailable")]
    VerificationUnavailable,
}

/// The request-gating orchestrator. Explicitly constructed, everything
/// injected; no global state.
pub struct PaymentGate {
    registry: Arc<ChainRegistry>,
    verifier: Arc<dyn TransferVerifier>,
    replay: AntiReplayGuard,
    limiter: Arc<WalletRateLimiter>,
    budgets: BudgetGuardian,
    activity: Arc<dyn ActivitySink>,
    discovery: Option<Arc<dyn DiscoveryRegistry>>,
    receiving_wallet: Address,
    price: MoneyAmount,
    min_units: U256,
}

impl PaymentGate {
    pub async fn new(
        registry: Arc<ChainRegistry>,
        verifier: Arc<dyn TransferVerifier>,
        store: Arc<dyn GateStore>,
        receiving_wallet: Address,
        price: MoneyAmount,
        rate_limit: u32,
    ) -> Result<Self, MoneyAmountError> {
        let min_units = price.token_units(USDC_DECIMALS)?;
        Ok(Self {
            registry,
            verifier,
            replay: AntiReplayGuard::new(store.clone()),
            limiter: Arc::new(WalletRateLimiter::new(rate_limit)),
            budgets: BudgetGuardian::load(store).await,
            activity: Arc::new(TracingActivity),
            discovery: None,
            receiving_wallet,
            price,
            min_units,
        })
    }

    pub fn with_activity(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.activity = sink;
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn DiscoveryRegistry>) -> Self {
        self.discovery = discovery.into();
        self
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn budgets(&self) -> &BudgetGuardian {
        &self.budgets
    }

    pub fn limiter(&self) -> Arc<WalletRateLimiter> {
        self.limiter.clone()
    }

    pub fn price(&self) -> &MoneyAmount {
        &self.price
    }

    /// Run the full admission protocol for one request.
    #[instrument(skip_all)]
    pub async fn admit(
        &self,
        ctx: &PaymentContext,
        action: &str,
    ) -> Result<Admission, GateRejection> {
        // 1. Boundary validation: unknown chain keys are rejected, never
        //    silently defaulted.
        let chain_key = match &ctx.chain_key {
            Some(requested) if !self.registry.contains(requested) => {
                return Err(GateRejection::UnknownChain {
                    requested: requested.clone(),
                    accepted: self.registry.accepted_keys(),
                });
            }
            Some(requested) => requested.clone(),
            None => self.registry.default_key().to_string(),
        };

        // 2. Rate limiting, independent of payment state.
        if let Some(wallet) = &ctx.wallet {
            let decision = self.limiter.admit(wallet);
            if !decision.allowed {
                tracing::debug!(%wallet, "rate limit exceeded");
                return Err(GateRejection::RateLimited(decision));
            }
        }

        // 3. Budget pre-check, before any chain traffic.
        if let Some(wallet) = &ctx.wallet {
            if let BudgetDecision::Exceeded { reason, status } =
                self.budgets.check_budget(wallet, self.price.as_decimal())
            {
                tracing::debug!(%wallet, %reason, "budget pre-check rejected");
                return Err(GateRejection::BudgetExceeded { reason, status });
            }
        }

        // 4. No proof: emit payment instructions.
        let Some(raw_proof) = &ctx.tx_hash else {
            return Err(GateRejection::PaymentRequired(Box::new(
                self.payment_instructions(&chain_key, action),
            )));
        };

        // 5. Proof format.
        let tx_hash = TransactionHash::parse(raw_proof)?;

        // 6. Replay check. Store trouble here means we cannot know whether
        //    the proof was consumed: fail closed.
        let claim_key = AntiReplayGuard::claim_key(&chain_key, &tx_hash);
        let lookup_keys = AntiReplayGuard::lookup_keys(&chain_key, &tx_hash);
        match self.replay.already_used(&lookup_keys).await {
            Err(error) => {
                tracing::error!(%tx_hash, %error, "replay lookup failed, failing closed");
                return Err(GateRejection::ReplayUnavailable);
            }
            Ok(true) => return Err(GateRejection::ProofConsumed),
            Ok(false) => {}
        }

        // 7. On-chain verification. Nothing has been claimed yet, so an
        //    infrastructure failure leaves no partial state.
        let verification = self
            .verifier
            .verify(&chain_key, &tx_hash, self.min_units)
            .await
            .map_err(|error| {
                tracing::error!(%tx_hash, chain = %chain_key, %error, "verification failed");
                GateRejection::VerificationUnavailable
            })?;
        if !verification.valid {
            return Err(GateRejection::NotVerified);
        }

        // 8. Atomic claim. Losing the race is reported exactly like a
        //    replay.
        if !self.replay.claim(&claim_key, action).await {
            return Err(GateRejection::ProofConsumed);
        }

        // 9. Side effects after the claim: activity record, budget charge.
        self.activity.admitted(&ActivityEvent {
            action,
            chain_key: &chain_key,
            tx_hash: &tx_hash,
            payer: verification.payer,
            wallet: ctx.wallet.as_ref(),
        });

        let mut budget = None;
        let mut alert = None;
        if let Some(wallet) = &ctx.wallet {
            if let Some(receipt) = self
                .budgets
                .record_spending(wallet, self.price.as_decimal())
                .await
            {
                if let Some(threshold) = receipt.alert {
                    tracing::warn!(%wallet, threshold, "budget alert threshold crossed");
                }
                alert = receipt.alert;
                budget = Some(receipt.status);
            }
        }

        // 10. Admitted; the transport layer runs the downstream handler.
        Ok(Admission {
            payer: verification.payer,
            wallet: ctx.wallet.clone(),
            budget,
            alert,
        })
    }

    /// Build the 402 payload for the requested chain and action.
    pub fn payment_instructions(&self, chain_key: &str, action: &str) -> PaymentInstructions {
        let chain = self.registry.resolve(chain_key);
        let networks = self
            .registry
            .list()
            .iter()
            .map(|c| NetworkOffer {
                network: c.key.clone(),
                chain_id: c.chain_id,
                label: c.label.clone(),
                usdc_contract: c.token_contract.to_string(),
                explorer: c.explorer_url.to_string(),
                gas: c.gas_note.clone(),
            })
            .collect();
        let details = PaymentDetails {
            amount: self.price.to_string(),
            currency: "USDC".to_string(),
            network: chain.key.clone(),
            chain_id: chain.chain_id,
            networks,
            recipient: self.receiving_wallet.to_string(),
            accepted: vec!["USDC".to_string()],
            action: action.to_string(),
        };
        let extensions = self
            .discovery
            .as_ref()
            .and_then(|d| d.extensions(action));
        PaymentInstructions {
            details,
            extensions,
        }
    }
}
