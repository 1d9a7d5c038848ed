//! Durable storage behind the gate: the uniquely-constrained claims table and
//! the keyed budgets table.
//!
//! The trait seam exists so the gate can be exercised against fakes in tests;
//! the shipped implementation is a [`sled`] database with bincode-encoded
//! records. The claim insert is the single cross-process coordination point
//! of the whole design: it must be insert-only and atomic, which
//! `Tree::compare_and_swap` against an absent key provides.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::budget::Budget;
use crate::gate::WalletId;
use crate::timestamp::UnixTimestamp;

const CLAIMS_TREE: &str = "claims";
const BUDGETS_TREE: &str = "budgets";

/// The anti-replay record of record: created exactly once per (chain, hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentClaim {
    pub claim_key: String,
    pub action: String,
    pub claimed_at: UnixTimestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(String),
    #[error("record encoding: {0}")]
    Codec(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Durable store used by the anti-replay guard and the budget guardian.
#[async_trait]
pub trait GateStore: Send + Sync {
    /// Insert-only claim write, keyed uniquely on `key`.
    ///
    /// Returns `Ok(false)` when the key already exists (a concurrent caller
    /// won), `Ok(true)` when this caller created the record. Never upserts.
    async fn insert_claim(&self, key: &str, action: &str) -> Result<bool, StoreError>;

    /// Whether any of the given claim keys exists, in one round trip.
    async fn claimed_any(&self, keys: &[String]) -> Result<bool, StoreError>;

    async fn put_budget(&self, budget: &Budget) -> Result<(), StoreError>;

    async fn delete_budget(&self, wallet: &WalletId) -> Result<(), StoreError>;

    async fn load_budgets(&self) -> Result<Vec<Budget>, StoreError>;
}

/// Sled-backed [`GateStore`] with `claims` and `budgets` trees.
pub struct SledStore {
    claims: sled::Tree,
    budgets: sled::Tree,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database for tests; keeps real compare-and-swap semantics.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let claims = db.open_tree(CLAIMS_TREE)?;
        let budgets = db.open_tree(BUDGETS_TREE)?;
        Ok(Self { claims, budgets })
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

#[async_trait]
impl GateStore for SledStore {
    async fn insert_claim(&self, key: &str, action: &str) -> Result<bool, StoreError> {
        let record = PaymentClaim {
            claim_key: key.to_string(),
            action: action.to_string(),
            claimed_at: UnixTimestamp::now(),
        };
        let bytes = encode(&record)?;
        let outcome = self
            .claims
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(bytes))?;
        match outcome {
            Ok(()) => {
                self.claims.flush_async().await?;
                Ok(true)
            }
            // The key was present: a concurrent caller claimed it first.
            Err(_) => Ok(false),
        }
    }

    async fn claimed_any(&self, keys: &[String]) -> Result<bool, StoreError> {
        for key in keys {
            if self.claims.contains_key(key.as_bytes())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn put_budget(&self, budget: &Budget) -> Result<(), StoreError> {
        let bytes = encode(budget)?;
        self.budgets
            .insert(budget.wallet().as_str().as_bytes(), bytes)?;
        self.budgets.flush_async().await?;
        Ok(())
    }

    async fn delete_budget(&self, wallet: &WalletId) -> Result<(), StoreError> {
        self.budgets.remove(wallet.as_str().as_bytes())?;
        self.budgets.flush_async().await?;
        Ok(())
    }

    async fn load_budgets(&self) -> Result<Vec<Budget>, StoreError> {
        let mut budgets = Vec::new();
        for entry in self.budgets.iter() {
            let (_, bytes) = entry?;
            budgets.push(decode::<Budget>(&bytes)?);
        }
        Ok(budgets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetPeriod;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn claim_insert_is_insert_only() {
        let store = SledStore::temporary().unwrap();

        assert!(store.insert_claim("base:0xabc", "api:ping").await.unwrap());
        // Second insert on the same key loses, regardless of action label.
        assert!(!store.insert_claim("base:0xabc", "api:other").await.unwrap());

        assert!(store
            .claimed_any(&["base:0xabc".to_string()])
            .await
            .unwrap());
        assert!(!store
            .claimed_any(&["base:0xdef".to_string()])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn claimed_any_checks_all_keys() {
        let store = SledStore::temporary().unwrap();
        store.insert_claim("0xbare", "api:ping").await.unwrap();

        let keys = vec!["base:0xbare".to_string(), "0xbare".to_string()];
        assert!(store.claimed_any(&keys).await.unwrap());
    }

    #[tokio::test]
    async fn budget_round_trip() {
        let store = SledStore::temporary().unwrap();
        let wallet = WalletId::new("0xPayer");
        let budget = Budget::new(wallet.clone(), Decimal::new(5, 0), BudgetPeriod::Daily);

        store.put_budget(&budget).await.unwrap();
        let loaded = store.load_budgets().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].wallet(), &wallet);
        assert_eq!(loaded[0].max_amount(), Decimal::new(5, 0));

        store.delete_budget(&wallet).await.unwrap();
        assert!(store.load_budgets().await.unwrap().is_empty());
    }
}
