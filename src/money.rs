//! Human-readable money amounts and token-unit scaling.
//!
//! Prices and budgets are configured as decimal currency values ("0.01",
//! "$1.50"); on-chain comparison happens in the token's smallest unit
//! (6 decimals for USDC). [`MoneyAmount`] parses the former and scales to the
//! latter.

use alloy_primitives::U256;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// Decimals used by every USDC deployment this gate accepts.
pub const USDC_DECIMALS: u32 = 6;

/// A price-like numeric value in human-readable currency format.
/// Accepts strings like "$0.01", "1,000", or raw numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct MoneyAmount(pub Decimal);

#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountError {
    #[error("Invalid number format")]
    InvalidFormat,
    #[error(
        "Amount must be between {} and {}",
        bounds::MIN_STR,
        bounds::MAX_STR
    )]
    OutOfRange,
    #[error("Negative value is not allowed")]
    Negative,
    #[error("Too big of a precision: {money} digits vs {token} on token")]
    WrongPrecision { money: u32, token: u32 },
}

mod bounds {
    use super::*;
    use once_cell::sync::Lazy;

    pub const MIN_STR: &str = "0.000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: Lazy<Decimal> = Lazy::new(|| Decimal::from_str(MIN_STR).expect("valid decimal"));
    pub static MAX: Lazy<Decimal> = Lazy::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));
}

impl MoneyAmount {
    pub fn parse(input: &str) -> Result<Self, MoneyAmountError> {
        // Remove anything that isn't digit, dot, minus
        let cleaned = Regex::new(r"[^\d\.\-]+")
            .expect("valid regex")
            .replace_all(input, "")
            .to_string();

        let parsed = Decimal::from_str(&cleaned).map_err(|_| MoneyAmountError::InvalidFormat)?;

        if parsed.is_sign_negative() {
            return Err(MoneyAmountError::Negative);
        }

        if parsed < *bounds::MIN || parsed > *bounds::MAX {
            return Err(MoneyAmountError::OutOfRange);
        }

        Ok(MoneyAmount(parsed))
    }

    /// Scale to the token's smallest unit, e.g. "0.01" with 6 decimals
    /// becomes 10_000.
    ///
    /// Fails if the amount carries more fractional digits than the token
    /// supports.
    pub fn token_units(&self, decimals: u32) -> Result<U256, MoneyAmountError> {
        let normalized = self.0.normalize();
        let scale = normalized.scale();
        if scale > decimals {
            return Err(MoneyAmountError::WrongPrecision {
                money: scale,
                token: decimals,
            });
        }
        let mantissa = normalized.mantissa().unsigned_abs();
        let factor = U256::from(10u64).pow(U256::from(decimals - scale));
        Ok(U256::from(mantissa) * factor)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl<'de> Deserialize<'de> for MoneyAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        MoneyAmount::parse(&s).map_err(serde::de::Error::custom)
    }
}
