//! Per-wallet rolling spending caps with threshold alerts and lazy period
//! reset.
//!
//! Budgets are opt-in abuse prevention, not billing of record: the in-memory
//! mirror is authoritative for the process, and durable writes are
//! best-effort (logged, never thrown). Contrast with the anti-replay claim,
//! which must never swallow a store error.

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::gate::WalletId;
use crate::store::GateStore;
use crate::timestamp::UnixTimestamp;

/// Budget period; durations are fixed, not calendar-aware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl BudgetPeriod {
    pub fn duration_secs(&self) -> u64 {
        match self {
            BudgetPeriod::Daily => 24 * 60 * 60,
            BudgetPeriod::Weekly => 7 * 24 * 60 * 60,
            BudgetPeriod::Monthly => 30 * 24 * 60 * 60,
        }
    }
}

impl std::fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetPeriod::Daily => write!(f, "daily"),
            BudgetPeriod::Weekly => write!(f, "weekly"),
            BudgetPeriod::Monthly => write!(f, "monthly"),
        }
    }
}

/// One-shot alert latches; cleared on period reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFlags {
    pub at_50: bool,
    pub at_75: bool,
    pub at_90: bool,
}

/// Per-wallet spending cap. At most one per wallet, keyed by the lowercased
/// wallet id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    wallet: WalletId,
    max_amount: Decimal,
    spent_amount: Decimal,
    period: BudgetPeriod,
    period_start: UnixTimestamp,
    alerts: AlertFlags,
}

impl Budget {
    pub fn new(wallet: WalletId, max_amount: Decimal, period: BudgetPeriod) -> Self {
        Self {
            wallet,
            max_amount,
            spent_amount: Decimal::ZERO,
            period,
            period_start: UnixTimestamp::now(),
            alerts: AlertFlags::default(),
        }
    }

    pub fn wallet(&self) -> &WalletId {
        &self.wallet
    }

    pub fn max_amount(&self) -> Decimal {
        self.max_amount
    }

    pub fn spent_amount(&self) -> Decimal {
        self.spent_amount
    }

    pub fn remaining(&self) -> Decimal {
        (self.max_amount - self.spent_amount).max(Decimal::ZERO)
    }

    pub fn used_percent(&self) -> Decimal {
        if self.max_amount.is_zero() {
            return Decimal::from(100);
        }
        (self.spent_amount / self.max_amount * Decimal::from(100)).round_dp(1)
    }

    /// Zero the period if it has elapsed. Returns whether a reset happened.
    fn maybe_reset_at(&mut self, now: UnixTimestamp) -> bool {
        if now.seconds_since(self.period_start) > self.period.duration_secs() {
            self.spent_amount = Decimal::ZERO;
            self.period_start = now;
            self.alerts = AlertFlags::default();
            true
        } else {
            false
        }
    }

    /// Latch and report the highest threshold newly crossed by the current
    /// spend level. Checked descending with early exit, so a jump across
    /// several thresholds fires only the highest one.
    fn note_crossed_alert(&mut self) -> Option<u8> {
        let pct = self.used_percent();
        if pct >= Decimal::from(90) && !self.alerts.at_90 {
            self.alerts.at_90 = true;
            return Some(90);
        }
        if pct >= Decimal::from(75) && !self.alerts.at_75 {
            self.alerts.at_75 = true;
            return Some(75);
        }
        if pct >= Decimal::from(50) && !self.alerts.at_50 {
            self.alerts.at_50 = true;
            return Some(50);
        }
        None
    }
}

/// Snapshot of a budget for responses and headers.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub wallet: WalletId,
    pub max_amount: Decimal,
    pub spent_amount: Decimal,
    pub remaining: Decimal,
    pub used_percent: Decimal,
    pub period: BudgetPeriod,
    pub period_start: UnixTimestamp,
}

impl BudgetStatus {
    fn of(budget: &Budget) -> Self {
        Self {
            wallet: budget.wallet.clone(),
            max_amount: budget.max_amount,
            spent_amount: budget.spent_amount,
            remaining: budget.remaining(),
            used_percent: budget.used_percent(),
            period: budget.period,
            period_start: budget.period_start,
        }
    }
}

/// Outcome of a pre-charge budget check.
#[derive(Debug, Clone)]
pub enum BudgetDecision {
    Allowed,
    Exceeded { reason: String, status: BudgetStatus },
}

impl BudgetDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, BudgetDecision::Allowed)
    }
}

/// Result of charging a budget.
#[derive(Debug, Clone)]
pub struct SpendingReceipt {
    pub status: BudgetStatus,
    /// Threshold newly crossed by this charge (90, 75 or 50), if any.
    pub alert: Option<u8>,
}

fn fmt_amount(amount: Decimal) -> String {
    amount.round_dp(4).normalize().to_string()
}

/// Owns all wallet budgets: an in-memory mirror over the durable store.
pub struct BudgetGuardian {
    budgets: DashMap<WalletId, Budget>,
    store: Arc<dyn GateStore>,
}

impl BudgetGuardian {
    /// Load the mirror from the durable store. A failed load starts empty:
    /// budgets are opt-in, so an empty mirror only disables caps.
    pub async fn load(store: Arc<dyn GateStore>) -> Self {
        let budgets = DashMap::new();
        match store.load_budgets().await {
            Ok(records) => {
                for record in records {
                    budgets.insert(record.wallet().clone(), record);
                }
                tracing::info!(count = budgets.len(), "loaded wallet budgets");
            }
            Err(error) => {
                tracing::warn!(%error, "failed to load budgets, starting with none");
            }
        }
        Self { budgets, store }
    }

    /// Create a budget, or change the cap/period of an existing one.
    /// Existing spend, period start, and alert flags are preserved.
    pub async fn set_budget(
        &self,
        wallet: &WalletId,
        max_amount: Decimal,
        period: BudgetPeriod,
    ) -> BudgetStatus {
        let record = {
            let mut entry = self
                .budgets
                .entry(wallet.clone())
                .or_insert_with(|| Budget::new(wallet.clone(), max_amount, period));
            entry.max_amount = max_amount;
            entry.period = period;
            entry.clone()
        };
        self.persist(&record).await;
        BudgetStatus::of(&record)
    }

    /// Current snapshot, after lazy reset.
    pub async fn get_budget(&self, wallet: &WalletId) -> Option<BudgetStatus> {
        let (record, was_reset) = {
            let mut entry = self.budgets.get_mut(wallet)?;
            let was_reset = entry.maybe_reset_at(UnixTimestamp::now());
            (entry.clone(), was_reset)
        };
        if was_reset {
            self.persist(&record).await;
        }
        Some(BudgetStatus::of(&record))
    }

    /// Whether `amount` fits in the wallet's remaining budget. No budget
    /// means always allowed (budgets are opt-in). Never mutates state: an
    /// elapsed period is evaluated against a reset view without persisting.
    pub fn check_budget(&self, wallet: &WalletId, amount: Decimal) -> BudgetDecision {
        let Some(entry) = self.budgets.get(wallet) else {
            return BudgetDecision::Allowed;
        };
        let mut view = entry.clone();
        drop(entry);
        view.maybe_reset_at(UnixTimestamp::now());

        if view.spent_amount + amount <= view.max_amount {
            BudgetDecision::Allowed
        } else {
            let reason = format!(
                "Budget exceeded: {} of {} USDC spent this period, {} remaining",
                fmt_amount(view.spent_amount),
                fmt_amount(view.max_amount),
                fmt_amount(view.remaining()),
            );
            BudgetDecision::Exceeded {
                reason,
                status: BudgetStatus::of(&view),
            }
        }
    }

    /// Charge the wallet's budget and report the highest newly crossed alert
    /// threshold. Returns `None` when the wallet has no budget.
    pub async fn record_spending(
        &self,
        wallet: &WalletId,
        amount: Decimal,
    ) -> Option<SpendingReceipt> {
        let (record, alert) = {
            let mut entry = self.budgets.get_mut(wallet)?;
            entry.maybe_reset_at(UnixTimestamp::now());
            entry.spent_amount += amount;
            let alert = entry.note_crossed_alert();
            (entry.clone(), alert)
        };
        self.persist(&record).await;
        Some(SpendingReceipt {
            status: BudgetStatus::of(&record),
            alert,
        })
    }

    pub async fn remove_budget(&self, wallet: &WalletId) -> bool {
        let removed = self.budgets.remove(wallet).is_some();
        if removed {
            if let Err(error) = self.store.delete_budget(wallet).await {
                tracing::warn!(%wallet, %error, "budget delete not persisted");
            }
        }
        removed
    }

    /// Snapshots of all budgets, each lazily reset first.
    pub async fn list_budgets(&self) -> Vec<BudgetStatus> {
        let wallets: Vec<WalletId> = self.budgets.iter().map(|e| e.key().clone()).collect();
        let mut out = Vec::with_capacity(wallets.len());
        for wallet in wallets {
            if let Some(status) = self.get_budget(&wallet).await {
                out.push(status);
            }
        }
        out
    }

    /// Best-effort mirror write; in-memory state stays authoritative.
    async fn persist(&self, budget: &Budget) {
        if let Err(error) = self.store.put_budget(budget).await {
            tracing::warn!(wallet = %budget.wallet(), %error, "budget mirror write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SledStore;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn guardian() -> BudgetGuardian {
        BudgetGuardian::load(Arc::new(SledStore::temporary().unwrap())).await
    }

    fn wallet() -> WalletId {
        WalletId::new("0xPayerWallet")
    }

    #[tokio::test]
    async fn no_budget_always_allows() {
        let guardian = guardian().await;
        assert!(guardian.check_budget(&wallet(), dec("1000")).is_allowed());
    }

    #[tokio::test]
    async fn check_budget_boundary() {
        let guardian = guardian().await;
        let w = wallet();
        guardian.set_budget(&w, dec("1"), BudgetPeriod::Daily).await;
        guardian.record_spending(&w, dec("0.4")).await;

        // Exactly filling the budget is allowed, one atom more is not.
        assert!(guardian.check_budget(&w, dec("0.6")).is_allowed());
        assert!(!guardian.check_budget(&w, dec("0.6001")).is_allowed());
    }

    #[tokio::test]
    async fn check_budget_never_mutates() {
        let guardian = guardian().await;
        let w = wallet();
        guardian.set_budget(&w, dec("1"), BudgetPeriod::Daily).await;
        guardian.record_spending(&w, dec("0.5")).await;

        for _ in 0..3 {
            guardian.check_budget(&w, dec("2"));
        }
        let status = guardian.get_budget(&w).await.unwrap();
        assert_eq!(status.spent_amount, dec("0.5"));
    }

    #[tokio::test]
    async fn rejection_reason_formats_amounts() {
        let guardian = guardian().await;
        let w = wallet();
        guardian.set_budget(&w, dec("1.00"), BudgetPeriod::Daily).await;
        guardian.record_spending(&w, dec("0.999")).await;

        match guardian.check_budget(&w, dec("0.01")) {
            BudgetDecision::Exceeded { reason, status } => {
                assert!(reason.contains("0.999"), "reason: {reason}");
                assert!(reason.contains("0.001"), "reason: {reason}");
                assert_eq!(status.remaining, dec("0.001"));
            }
            BudgetDecision::Allowed => panic!("charge should exceed the budget"),
        }
    }

    #[tokio::test]
    async fn jump_fires_only_highest_threshold() {
        let guardian = guardian().await;
        let w = wallet();
        guardian.set_budget(&w, dec("1"), BudgetPeriod::Daily).await;

        let receipt = guardian.record_spending(&w, dec("0.95")).await.unwrap();
        assert_eq!(receipt.alert, Some(90));

        let entry = guardian.budgets.get(&w).unwrap();
        assert!(entry.alerts.at_90);
        assert!(!entry.alerts.at_75);
        assert!(!entry.alerts.at_50);
    }

    #[tokio::test]
    async fn thresholds_fire_once_per_period() {
        let guardian = guardian().await;
        let w = wallet();
        guardian.set_budget(&w, dec("1"), BudgetPeriod::Daily).await;

        let first = guardian.record_spending(&w, dec("0.6")).await.unwrap();
        assert_eq!(first.alert, Some(50));
        let second = guardian.record_spending(&w, dec("0.01")).await.unwrap();
        assert_eq!(second.alert, None);
        let third = guardian.record_spending(&w, dec("0.2")).await.unwrap();
        assert_eq!(third.alert, Some(75));
    }

    #[tokio::test]
    async fn set_budget_preserves_spend_and_flags() {
        let guardian = guardian().await;
        let w = wallet();
        guardian.set_budget(&w, dec("1"), BudgetPeriod::Daily).await;
        guardian.record_spending(&w, dec("0.6")).await;

        let updated = guardian.set_budget(&w, dec("2"), BudgetPeriod::Weekly).await;
        assert_eq!(updated.spent_amount, dec("0.6"));
        assert_eq!(updated.max_amount, dec("2"));
        assert_eq!(updated.period, BudgetPeriod::Weekly);
        assert!(guardian.budgets.get(&w).unwrap().alerts.at_50);
    }

    #[tokio::test]
    async fn lazy_reset_clears_spend_and_flags() {
        let guardian = guardian().await;
        let w = wallet();
        guardian.set_budget(&w, dec("1"), BudgetPeriod::Daily).await;
        guardian.record_spending(&w, dec("0.95")).await;

        {
            let mut entry = guardian.budgets.get_mut(&w).unwrap();
            let expired = UnixTimestamp::from_secs(
                UnixTimestamp::now().as_secs() - BudgetPeriod::Daily.duration_secs() - 10,
            );
            entry.period_start = expired;
        }

        let status = guardian.get_budget(&w).await.unwrap();
        assert_eq!(status.spent_amount, Decimal::ZERO);
        assert_eq!(status.remaining, dec("1"));
        let entry = guardian.budgets.get(&w).unwrap();
        assert_eq!(entry.alerts, AlertFlags::default());
    }

    #[tokio::test]
    async fn budgets_survive_reload() {
        let store = Arc::new(SledStore::temporary().unwrap());
        let guardian = BudgetGuardian::load(store.clone()).await;
        let w = wallet();
        guardian.set_budget(&w, dec("5"), BudgetPeriod::Monthly).await;
        guardian.record_spending(&w, dec("1.25")).await;

        let reloaded = BudgetGuardian::load(store).await;
        let status = reloaded.get_budget(&w).await.unwrap();
        assert_eq!(status.max_amount, dec("5"));
        assert_eq!(status.spent_amount, dec("1.25"));
    }

    #[tokio::test]
    async fn remove_budget() {
        let guardian = guardian().await;
        let w = wallet();
        guardian.set_budget(&w, dec("1"), BudgetPeriod::Daily).await;
        assert!(guardian.remove_budget(&w).await);
        assert!(!guardian.remove_budget(&w).await);
        assert!(guardian.get_budget(&w).await.is_none());
        assert!(guardian.check_budget(&w, dec("99")).is_allowed());
    }
}
