//! Admission control for priced HTTP APIs over the x402 pattern.
//!
//! This crate gates requests to priced endpoints behind on-chain USDC
//! micropayments, using `402 Payment Required` to carry machine-readable
//! payment instructions so autonomous agents can pay per call without
//! accounts. It never submits transactions or settles anything: it verifies
//! already-mined ERC-20 transfers and guarantees that one settled payment
//! authorizes exactly one admitted call, under concurrent and adversarial
//! retries, across multiple chains.
//!
//! # Pipeline
//!
//! A request walks chain validation → rate limiting → budget pre-check →
//! (402 emission when no proof is attached) → proof format check →
//! anti-replay lookup → on-chain verification → atomic claim → budget
//! charge → admission. Every infrastructure failure along the way rejects
//! (fail-closed); only the durable store's insert-only claim write decides
//! races.
//!
//! # Modules
//!
//! - [`registry`] — the fixed set of accepted chains and their USDC deployments.
//! - [`verifier`] — receipt lookup and `Transfer` log scanning over JSON-RPC.
//! - [`replay`] — anti-replay guard: bounded cache plus atomic claim.
//! - [`ratelimit`] — fixed-window per-wallet rate limiting.
//! - [`budget`] — per-wallet spending caps with threshold alerts.
//! - [`gate`] — the orchestrator composing all of the above.
//! - [`store`] — durable claims and budgets (sled).
//! - [`handlers`] — the axum middleware and operational routes.
//! - [`config`], [`telemetry`], [`lifecycle`] — server plumbing.

pub mod budget;
pub mod config;
pub mod gate;
pub mod handlers;
pub mod lifecycle;
pub mod money;
pub mod ratelimit;
pub mod registry;
pub mod replay;
pub mod store;
pub mod telemetry;
pub mod timestamp;
pub mod verifier;
