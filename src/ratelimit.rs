//! Fixed-window per-wallet rate limiting, independent of payment state.
//!
//! Windows live in process memory only; loss on restart is acceptable. A
//! periodic sweeper evicts idle expired wallets so the map stays bounded.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::gate::WalletId;
use crate::timestamp::UnixTimestamp;

/// Fixed window length.
pub const WINDOW_SECS: u64 = 60;

/// How often the sweeper evicts expired windows.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    window_start: UnixTimestamp,
    count: u32,
}

/// Outcome of a rate-limit check, carrying everything the HTTP layer needs
/// for `X-RateLimit-*` and `Retry-After` headers.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

/// One fixed-window counter per wallet.
pub struct WalletRateLimiter {
    windows: DashMap<WalletId, RateWindow>,
    limit: u32,
    window_secs: u64,
}

impl WalletRateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window_secs: WINDOW_SECS,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count a request against the wallet's current window.
    ///
    /// The request that tips the counter past the limit is itself rejected,
    /// and the counter keeps incrementing for the rest of the window.
    pub fn admit(&self, wallet: &WalletId) -> RateDecision {
        self.admit_at(wallet, UnixTimestamp::now())
    }

    fn admit_at(&self, wallet: &WalletId, now: UnixTimestamp) -> RateDecision {
        let mut window = self
            .windows
            .entry(wallet.clone())
            .or_insert_with(|| RateWindow {
                window_start: now,
                count: 0,
            });

        if now.seconds_since(window.window_start) > self.window_secs {
            window.window_start = now;
            window.count = 0;
        }
        window.count += 1;

        let allowed = window.count <= self.limit;
        let remaining = self.limit.saturating_sub(window.count);
        let reset_secs = self
            .window_secs
            .saturating_sub(now.seconds_since(window.window_start));

        RateDecision {
            allowed,
            limit: self.limit,
            remaining,
            reset_secs,
        }
    }

    /// Drop windows that expired and saw no further traffic.
    pub fn sweep(&self) {
        self.sweep_at(UnixTimestamp::now());
    }

    fn sweep_at(&self, now: UnixTimestamp) {
        self.windows
            .retain(|_, window| now.seconds_since(window.window_start) <= self.window_secs);
    }

    /// Number of wallets currently tracked.
    pub fn tracked_wallets(&self) -> usize {
        self.windows.len()
    }
}

/// Periodic eviction of idle rate windows, owned by the process lifecycle.
///
/// Runs until `cancel` fires; started from `main`, not from construction, so
/// tests exercise the limiter without background tasks.
pub async fn run_sweeper(limiter: Arc<WalletRateLimiter>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("rate limiter sweeper stopped");
                return;
            }
            _ = interval.tick() => {
                limiter.sweep();
            }
        }
    }
}
