//! On-chain payment verification: did this transaction move at least
//! `min_amount` of the chain's USDC to our receiving wallet?
//!
//! Verification is read-only. The verifier fetches the mined transaction
//! receipt over JSON-RPC and scans its logs for a qualifying ERC-20
//! `Transfer` event. A missing or reverted transaction is a business outcome
//! (`valid: false`); an unreachable or slow RPC is an infrastructure error
//! and must never be reported as "not paid".

use alloy_network::Ethereum;
use alloy_primitives::{Address, B256, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::TransactionReceipt;
use alloy_sol_types::{SolEvent, sol};
use alloy_transport_http::Http;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use crate::registry::ChainRegistry;

sol! {
    #[derive(Debug)]
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Hard ceiling on a receipt lookup.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// A normalized, validated 32-byte transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHash(B256);

#[derive(Debug, thiserror::Error)]
#[error("transaction hash must be a 0x-prefixed 32-byte hex string")]
pub struct ProofFormatError;

impl TransactionHash {
    /// Normalize (trim, lowercase) and validate the standard hex shape.
    pub fn parse(input: &str) -> Result<Self, ProofFormatError> {
        let normalized = input.trim().to_ascii_lowercase();
        let digits = normalized.strip_prefix("0x").ok_or(ProofFormatError)?;
        if digits.len() != 64 {
            return Err(ProofFormatError);
        }
        let bytes = hex::decode(digits).map_err(|_| ProofFormatError)?;
        Ok(Self(B256::from_slice(&bytes)))
    }

    pub fn as_b256(&self) -> B256 {
        self.0
    }
}

impl Display for TransactionHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transient verification outcome; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub valid: bool,
    pub payer: Option<Address>,
}

impl Verification {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            payer: None,
        }
    }

    pub fn paid_by(payer: Address) -> Self {
        Self {
            valid: true,
            payer: Some(payer),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("chain rpc timed out after {0:?}")]
    Timeout(Duration),
    #[error("chain rpc error: {0}")]
    Rpc(String),
}

/// Seam between the gate and on-chain lookups, so the admission protocol can
/// be exercised against a stub.
#[async_trait]
pub trait TransferVerifier: Send + Sync {
    async fn verify(
        &self,
        chain_key: &str,
        tx_hash: &TransactionHash,
        min_amount: U256,
    ) -> Result<Verification, VerifyError>;
}

/// Production verifier: one read-only JSON-RPC provider per configured chain,
/// built once at startup.
pub struct RpcVerifier {
    registry: Arc<ChainRegistry>,
    receiving_wallet: Address,
    providers: HashMap<String, RootProvider<Ethereum>>,
}

impl RpcVerifier {
    pub fn new(registry: Arc<ChainRegistry>, receiving_wallet: Address) -> Self {
        let mut providers = HashMap::new();
        for chain in registry.list() {
            let transport = Http::new(chain.rpc_url.clone());
            let client = RpcClient::new(transport, false);
            providers.insert(chain.key.clone(), RootProvider::<Ethereum>::new(client));
            tracing::info!(chain = %chain.key, rpc = %chain.rpc_url, "verifier provider ready");
        }
        Self {
            registry,
            receiving_wallet,
            providers,
        }
    }
}

#[async_trait]
impl TransferVerifier for RpcVerifier {
    async fn verify(
        &self,
        chain_key: &str,
        tx_hash: &TransactionHash,
        min_amount: U256,
    ) -> Result<Verification, VerifyError> {
        let chain = self.registry.resolve(chain_key);
        let provider = self
            .providers
            .get(&chain.key)
            .ok_or_else(|| VerifyError::Rpc(format!("no provider for chain {}", chain.key)))?;

        let lookup = provider.get_transaction_receipt(tx_hash.as_b256());
        let receipt: Option<TransactionReceipt> = tokio::time::timeout(RPC_TIMEOUT, lookup)
            .await
            .map_err(|_| VerifyError::Timeout(RPC_TIMEOUT))?
            .map_err(|e| VerifyError::Rpc(e.to_string()))?;

        let Some(receipt) = receipt else {
            tracing::debug!(%tx_hash, chain = %chain.key, "no receipt found");
            return Ok(Verification::invalid());
        };
        if !receipt.status() {
            tracing::debug!(%tx_hash, chain = %chain.key, "transaction reverted");
            return Ok(Verification::invalid());
        }

        let logs = receipt.inner.logs().iter().map(|log| &log.inner);
        let verification = match find_qualifying_transfer(
            logs,
            chain.token_contract,
            self.receiving_wallet,
            min_amount,
        ) {
            Some(payer) => Verification::paid_by(payer),
            None => Verification::invalid(),
        };
        tracing::debug!(%tx_hash, chain = %chain.key, valid = verification.valid, "verification complete");
        Ok(verification)
    }
}

/// Scan receipt logs for the first USDC `Transfer` paying at least
/// `min_amount` to `recipient`.
///
/// Logs emitted by any contract other than the chain's configured token are
/// ignored, which blocks spoofed-token payments; logs that do not decode as a
/// `Transfer` (wrong signature, missing indexed fields) are skipped.
fn find_qualifying_transfer<'a>(
    logs: impl Iterator<Item = &'a alloy_primitives::Log>,
    token_contract: Address,
    recipient: Address,
    min_amount: U256,
) -> Option<Address> {
    for log in logs {
        if log.address != token_contract {
            continue;
        }
        let Ok(decoded) = Transfer::decode_log(log) else {
            continue;
        };
        let Transfer { from, to, value } = decoded.data;
        if to == recipient && value >= min_amount {
            return Some(from);
        }
    }
    None
}
