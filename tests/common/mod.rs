//! Shared fixtures for the admission-protocol and HTTP tests.

#![allow(dead_code)]

use alloy_primitives::{Address, U256, address};
use async_trait::async_trait;
use axum::Router;
use std::sync::Arc;
use url::Url;

use x402_gate::budget::Budget;
use x402_gate::gate::{PaymentGate, WalletId};
use x402_gate::handlers::{self, AppState};
use x402_gate::money::MoneyAmount;
use x402_gate::registry::{ChainConfig, ChainRegistry, known};
use x402_gate::store::{GateStore, SledStore, StoreError};
use x402_gate::verifier::{TransactionHash, TransferVerifier, Verification, VerifyError};

pub const RECIPIENT: Address = address!("0x00000000000000000000000000000000000000AA");
pub const PAYER: Address = address!("0x00000000000000000000000000000000000000BB");

pub const PRICE: &str = "0.01";
pub const RATE_LIMIT: u32 = 5;

/// Registry with three chains, default "base".
pub fn test_registry() -> ChainRegistry {
    let skale = ChainConfig {
        key: "skale".to_string(),
        rpc_url: Url::parse("https://rpc.skale.test").unwrap(),
        token_contract: address!("0x00000000000000000000000000000000000000CC"),
        chain_id: 324705682,
        explorer_url: Url::parse("https://explorer.skale.test").unwrap(),
        label: "SKALE".to_string(),
        gas_note: "zero".to_string(),
    };
    ChainRegistry::new(vec![known::base(), known::base_sepolia(), skale], "base").unwrap()
}

pub fn tx_hash(n: u8) -> String {
    format!("0x{:064x}", n)
}

/// Verifier stub standing in for the chain RPC.
#[derive(Clone, Copy)]
pub enum StubVerifier {
    /// Every hash verifies as a qualifying transfer from this payer.
    Valid(Address),
    /// Every hash verifies false (missing, reverted, or underpaid).
    Invalid,
    /// The RPC is unreachable.
    Unavailable,
}

#[async_trait]
impl TransferVerifier for StubVerifier {
    async fn verify(
        &self,
        _chain_key: &str,
        _tx_hash: &TransactionHash,
        _min_amount: U256,
    ) -> Result<Verification, VerifyError> {
        match self {
            StubVerifier::Valid(payer) => Ok(Verification::paid_by(*payer)),
            StubVerifier::Invalid => Ok(Verification::invalid()),
            StubVerifier::Unavailable => Err(VerifyError::Rpc("connection refused".to_string())),
        }
    }
}

/// Store whose every operation fails: drives the fail-closed paths.
pub struct FailStore;

#[async_trait]
impl GateStore for FailStore {
    async fn insert_claim(&self, _key: &str, _action: &str) -> Result<bool, StoreError> {
        Err(StoreError::Backend("store down".to_string()))
    }
    async fn claimed_any(&self, _keys: &[String]) -> Result<bool, StoreError> {
        Err(StoreError::Backend("store down".to_string()))
    }
    async fn put_budget(&self, _budget: &Budget) -> Result<(), StoreError> {
        Err(StoreError::Backend("store down".to_string()))
    }
    async fn delete_budget(&self, _wallet: &WalletId) -> Result<(), StoreError> {
        Err(StoreError::Backend("store down".to_string()))
    }
    async fn load_budgets(&self) -> Result<Vec<Budget>, StoreError> {
        Err(StoreError::Backend("store down".to_string()))
    }
}

/// Store where lookups work but the claim write fails: a lost claim must be
/// reported like a replay, never admitted.
pub struct ClaimFailStore {
    inner: SledStore,
}

impl ClaimFailStore {
    pub fn new() -> Self {
        Self {
            inner: SledStore::temporary().unwrap(),
        }
    }
}

#[async_trait]
impl GateStore for ClaimFailStore {
    async fn insert_claim(&self, _key: &str, _action: &str) -> Result<bool, StoreError> {
        Err(StoreError::Backend("claims partition down".to_string()))
    }
    async fn claimed_any(&self, keys: &[String]) -> Result<bool, StoreError> {
        self.inner.claimed_any(keys).await
    }
    async fn put_budget(&self, budget: &Budget) -> Result<(), StoreError> {
        self.inner.put_budget(budget).await
    }
    async fn delete_budget(&self, wallet: &WalletId) -> Result<(), StoreError> {
        self.inner.delete_budget(wallet).await
    }
    async fn load_budgets(&self) -> Result<Vec<Budget>, StoreError> {
        self.inner.load_budgets().await
    }
}

pub async fn gate_with(
    verifier: Arc<dyn TransferVerifier>,
    store: Arc<dyn GateStore>,
) -> PaymentGate {
    PaymentGate::new(
        Arc::new(test_registry()),
        verifier,
        store,
        RECIPIENT,
        MoneyAmount::parse(PRICE).unwrap(),
        RATE_LIMIT,
    )
    .await
    .unwrap()
}

pub async fn fresh_gate(verifier: Arc<dyn TransferVerifier>) -> PaymentGate {
    gate_with(verifier, Arc::new(SledStore::temporary().unwrap())).await
}

pub async fn router_with(
    verifier: Arc<dyn TransferVerifier>,
    store: Arc<dyn GateStore>,
) -> Router {
    let gate = gate_with(verifier, store).await;
    handlers::app(Arc::new(AppState { gate }))
}

pub async fn fresh_router(verifier: Arc<dyn TransferVerifier>) -> Router {
    router_with(verifier, Arc::new(SledStore::temporary().unwrap())).await
}
