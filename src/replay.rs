//! Anti-replay guard: each (chain, tx hash) pair authorizes at most one
//! admitted request, under arbitrary concurrency.
//!
//! A bounded in-memory cache answers repeat lookups cheaply; the durable
//! store's insert-only claim write is the sole correctness mechanism. The
//! check-then-claim sequence is inherently racy between the two steps, so the
//! gate must always call [`AntiReplayGuard::claim`] even after a negative
//! [`AntiReplayGuard::already_used`], and must treat a false claim exactly
//! like a detected replay.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::store::{GateStore, StoreError};
use crate::verifier::TransactionHash;

/// Capacity of the recently-used claim cache.
pub const CLAIM_CACHE_CAPACITY: usize = 10_000;

/// Bounded set of recently seen claim keys with FIFO eviction.
pub struct RecentClaims {
    capacity: usize,
    inner: Mutex<RecentClaimsInner>,
}

#[derive(Default)]
struct RecentClaimsInner {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl RecentClaims {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(RecentClaimsInner::default()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        let inner = self.inner.lock().expect("claim cache poisoned");
        inner.seen.contains(key)
    }

    pub fn insert(&self, key: &str) {
        let mut inner = self.inner.lock().expect("claim cache poisoned");
        if inner.seen.contains(key) {
            return;
        }
        if inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        inner.seen.insert(key.to_string());
        inner.order.push_back(key.to_string());
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("claim cache poisoned").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tracks consumed payment proofs; claim semantics are delegated to the
/// durable store's unique insert.
pub struct AntiReplayGuard {
    cache: RecentClaims,
    store: Arc<dyn GateStore>,
}

impl AntiReplayGuard {
    pub fn new(store: Arc<dyn GateStore>) -> Self {
        Self::with_capacity(store, CLAIM_CACHE_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn GateStore>, capacity: usize) -> Self {
        Self {
            cache: RecentClaims::new(capacity),
            store,
        }
    }

    /// Chain-scoped claim key; the canonical shape for new claims.
    pub fn claim_key(chain_key: &str, tx_hash: &TransactionHash) -> String {
        format!("{chain_key}:{tx_hash}")
    }

    /// Keys to consult on lookup: the chain-scoped key plus the bare hash,
    /// which covers records written before claims were chain-scoped.
    pub fn lookup_keys(chain_key: &str, tx_hash: &TransactionHash) -> Vec<String> {
        vec![Self::claim_key(chain_key, tx_hash), tx_hash.to_string()]
    }

    /// Whether any of the keys has been consumed.
    ///
    /// Checks the cache first; on miss queries the store once, memoizing a
    /// hit. Store errors propagate so the caller can fail closed.
    pub async fn already_used(&self, keys: &[String]) -> Result<bool, StoreError> {
        if keys.iter().any(|k| self.cache.contains(k)) {
            return Ok(true);
        }
        let used = self.store.claimed_any(keys).await?;
        if used {
            for key in keys {
                self.cache.insert(key);
            }
        }
        Ok(used)
    }

    /// Atomically claim a key. Returns `false` when a concurrent caller
    /// already holds it, and also on any store error: on doubt, never admit.
    pub async fn claim(&self, key: &str, action: &str) -> bool {
        match self.store.insert_claim(key, action).await {
            Ok(true) => {
                self.cache.insert(key);
                true
            }
            Ok(false) => {
                self.cache.insert(key);
                false
            }
            Err(error) => {
                tracing::error!(%key, %error, "claim write failed, refusing admission");
                false
            }
        }
    }
}
