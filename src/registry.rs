//! Chain registry: the fixed set of networks a deployment accepts payment on.
//!
//! Each entry carries the RPC endpoint, the USDC contract, and the
//! payer-facing metadata surfaced in 402 responses. The set is immutable for
//! the lifetime of the process; unknown keys are rejected at the protocol
//! boundary (see the gate), never silently substituted there.

use alloy_primitives::{Address, address};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use url::Url;

/// Deployment network mode, selecting which built-in chains are offered and
/// which chain is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Mainnet deployments (Base).
    Prod,
    /// Testnet deployments (Base Sepolia).
    Test,
}

impl NetworkMode {
    pub fn default_chain_key(&self) -> &'static str {
        match self {
            NetworkMode::Prod => "base",
            NetworkMode::Test => "base-sepolia",
        }
    }
}

impl Display for NetworkMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkMode::Prod => write!(f, "prod"),
            NetworkMode::Test => write!(f, "test"),
        }
    }
}

impl std::str::FromStr for NetworkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prod" | "production" | "mainnet" => Ok(NetworkMode::Prod),
            "test" | "testnet" => Ok(NetworkMode::Test),
            other => Err(format!("unknown network mode: {other}")),
        }
    }
}

/// Static per-chain configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Registry key and payer-facing network name (e.g. "base-sepolia").
    pub key: String,
    /// JSON-RPC endpoint used for receipt lookups.
    pub rpc_url: Url,
    /// The USDC contract on this chain. Transfer logs emitted by any other
    /// contract are ignored during verification.
    pub token_contract: Address,
    /// EIP-155 chain id, surfaced in payment instructions.
    pub chain_id: u64,
    /// Block explorer base URL for payer-facing links.
    pub explorer_url: Url,
    /// Human-readable label (e.g. "Base Sepolia").
    pub label: String,
    /// Payer-facing note about gas cost on this chain.
    #[serde(default = "default_gas_note")]
    pub gas_note: String,
}

fn default_gas_note() -> String {
    "low".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no chains configured")]
    Empty,
    #[error("default chain '{0}' is not among the configured chains")]
    UnknownDefault(String),
    #[error("duplicate chain key '{0}'")]
    DuplicateKey(String),
}

/// Ordered, immutable set of accepted chains plus the deployment default.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: Vec<ChainConfig>,
    default_key: String,
}

impl ChainRegistry {
    pub fn new(chains: Vec<ChainConfig>, default_key: &str) -> Result<Self, RegistryError> {
        if chains.is_empty() {
            return Err(RegistryError::Empty);
        }
        for (i, chain) in chains.iter().enumerate() {
            if chains[..i].iter().any(|c| c.key == chain.key) {
                return Err(RegistryError::DuplicateKey(chain.key.clone()));
            }
        }
        if !chains.iter().any(|c| c.key == default_key) {
            return Err(RegistryError::UnknownDefault(default_key.to_string()));
        }
        Ok(Self {
            chains,
            default_key: default_key.to_string(),
        })
    }

    /// Registry of well-known USDC deployments for the given network mode.
    pub fn known(mode: NetworkMode) -> Self {
        let chains = match mode {
            NetworkMode::Prod => vec![known::base()],
            NetworkMode::Test => vec![known::base_sepolia()],
        };
        Self::new(chains, mode.default_chain_key()).expect("built-in registry is well-formed")
    }

    /// Ordered chains for building the payer-facing network list.
    pub fn list(&self) -> &[ChainConfig] {
        &self.chains
    }

    /// Resolve a chain by key, falling back to the default chain.
    ///
    /// Only for internal lookups on already-validated keys; boundary
    /// validation must use [`ChainRegistry::contains`] and reject unknown
    /// keys instead.
    pub fn resolve(&self, key: &str) -> &ChainConfig {
        self.chains
            .iter()
            .find(|c| c.key == key)
            .unwrap_or_else(|| self.default())
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    pub fn default(&self) -> &ChainConfig {
        self.chains
            .iter()
            .find(|c| c.key == self.default_key)
            .expect("default key validated at construction")
    }

    pub fn contains(&self, key: &str) -> bool {
        self.chains.iter().any(|c| c.key == key)
    }

    /// Accepted keys in registry order, for boundary rejection messages.
    pub fn accepted_keys(&self) -> Vec<String> {
        self.chains.iter().map(|c| c.key.clone()).collect()
    }
}

/// Well-known USDC deployments.
pub mod known {
    use super::*;

    const USDC_BASE: Address = address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
    const USDC_BASE_SEPOLIA: Address = address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e");

    pub fn base() -> ChainConfig {
        ChainConfig {
            key: "base".to_string(),
            rpc_url: Url::parse("https://mainnet.base.org").expect("valid url"),
            token_contract: USDC_BASE,
            chain_id: 8453,
            explorer_url: Url::parse("https://basescan.org").expect("valid url"),
            label: "Base".to_string(),
            gas_note: "low".to_string(),
        }
    }

    pub fn base_sepolia() -> ChainConfig {
        ChainConfig {
            key: "base-sepolia".to_string(),
            rpc_url: Url::parse("https://sepolia.base.org").expect("valid url"),
            token_contract: USDC_BASE_SEPOLIA,
            chain_id: 84532,
            explorer_url: Url::parse("https://sepolia.basescan.org").expect("valid url"),
            label: "Base Sepolia".to_string(),
            gas_note: "low".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> ChainRegistry {
        ChainRegistry::new(
            vec![known::base(), known::base_sepolia()],
            "base-sepolia",
        )
        .unwrap()
    }

    #[test]
    fn resolve_known_key() {
        let registry = test_registry();
        assert_eq!(registry.resolve("base").chain_id, 8453);
        assert_eq!(registry.resolve("base-sepolia").chain_id, 84532);
    }

    #[test]
    fn resolve_unknown_falls_back_to_default() {
        let registry = test_registry();
        let resolved = registry.resolve("polygon");
        assert_eq!(resolved.key, "base-sepolia");
    }

    #[test]
    fn contains_is_strict() {
        let registry = test_registry();
        assert!(registry.contains("base"));
        assert!(!registry.contains("polygon"));
    }

    #[test]
    fn accepted_keys_preserve_order() {
        let registry = test_registry();
        assert_eq!(registry.accepted_keys(), vec!["base", "base-sepolia"]);
    }

    #[test]
    fn rejects_bad_construction() {
        assert!(matches!(
            ChainRegistry::new(vec![], "base"),
            Err(RegistryError::Empty)
        ));
        assert!(matches!(
            ChainRegistry::new(vec![known::base()], "solana"),
            Err(RegistryError::UnknownDefault(_))
        ));
        assert!(matches!(
            ChainRegistry::new(vec![known::base(), known::base()], "base"),
            Err(RegistryError::DuplicateKey(_))
        ));
    }

    #[test]
    fn known_registry_by_mode() {
        let prod = ChainRegistry::known(NetworkMode::Prod);
        assert_eq!(prod.default_key(), "base");
        assert!(prod.contains("base"));
        assert!(!prod.contains("base-sepolia"));

        let test = ChainRegistry::known(NetworkMode::Test);
        assert_eq!(test.default_key(), "base-sepolia");
    }
}
