//! Token Amount Arithmetic
//!
//! Exact fixed-point arithmetic for bridged amounts. Hive assets carry three
//! decimals, so every quantity that crosses the bridge is held as an integer
//! number of thousandths. Ethereum base units are converted with half-up
//! rounding to three decimals, and fee splitting conserves the total.

use ethereum_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

/// Number of decimals carried by Hive assets.
pub const HIVE_DECIMALS: u32 = 3;

const MILLI: u64 = 1_000;
const BASIS_POINTS: u128 = 10_000;

// ============================================================================
// TOKEN AMOUNT
// ============================================================================

/// A non-negative token quantity with exactly three decimals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(u64);

impl TokenAmount {
    /// Creates an amount from a number of thousandths.
    pub const fn from_milli(milli: u64) -> Self {
        Self(milli)
    }

    /// Returns the amount in thousandths.
    pub const fn milli(&self) -> u64 {
        self.0
    }

    /// Parses a decimal string such as `"99"`, `"99.5"` or `"99.000"`.
    ///
    /// Digits beyond the third decimal are accepted only when they are zero,
    /// so parsing never rounds.
    pub fn parse_decimal(value: &str) -> Result<Self, BridgeError> {
        let value = value.trim();
        let (whole, fraction) = match value.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (value, ""),
        };

        if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
            return Err(BridgeError::InvalidAmount(format!(
                "'{}' is not a non-negative decimal",
                value
            )));
        }
        if !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(BridgeError::InvalidAmount(format!(
                "'{}' has a malformed fractional part",
                value
            )));
        }

        let (kept, dropped) = fraction.split_at(fraction.len().min(HIVE_DECIMALS as usize));
        if dropped.chars().any(|c| c != '0') {
            return Err(BridgeError::InvalidAmount(format!(
                "'{}' has more than {} decimals",
                value, HIVE_DECIMALS
            )));
        }

        let whole: u64 = whole
            .parse()
            .map_err(|_| BridgeError::InvalidAmount(format!("'{}' is too large", value)))?;
        let mut fraction_milli: u64 = 0;
        for (i, digit) in kept.chars().enumerate() {
            let digit = digit.to_digit(10).unwrap_or(0) as u64;
            fraction_milli += digit * 10u64.pow(HIVE_DECIMALS - 1 - i as u32);
        }

        whole
            .checked_mul(MILLI)
            .and_then(|milli| milli.checked_add(fraction_milli))
            .map(Self)
            .ok_or_else(|| BridgeError::InvalidAmount(format!("'{}' is too large", value)))
    }

    /// Converts an integer amount of token base units into a three-decimal
    /// amount, rounding half-up.
    pub fn from_base_units(units: U256, precision: u32) -> Result<Self, BridgeError> {
        let milli = if precision >= HIVE_DECIMALS {
            let divisor = U256::exp10((precision - HIVE_DECIMALS) as usize);
            let half = divisor / 2;
            (units.checked_add(half).ok_or_else(|| {
                BridgeError::InvalidAmount(format!("{} base units overflow", units))
            })?) / divisor
        } else {
            units
                .checked_mul(U256::exp10((HIVE_DECIMALS - precision) as usize))
                .ok_or_else(|| {
                    BridgeError::InvalidAmount(format!("{} base units overflow", units))
                })?
        };

        if milli > U256::from(u64::MAX) {
            return Err(BridgeError::InvalidAmount(format!(
                "{} base units exceed the representable range",
                units
            )));
        }
        Ok(Self(milli.as_u64()))
    }

    /// Scales the amount into integer token base units.
    pub fn to_base_units(&self, precision: u32) -> Result<U256, BridgeError> {
        let milli = U256::from(self.0);
        if precision >= HIVE_DECIMALS {
            Ok(milli * U256::exp10((precision - HIVE_DECIMALS) as usize))
        } else {
            let divisor = U256::exp10((HIVE_DECIMALS - precision) as usize);
            if milli % divisor != U256::zero() {
                return Err(BridgeError::InvalidAmount(format!(
                    "{} cannot be expressed with {} decimals",
                    self, precision
                )));
            }
            Ok(milli / divisor)
        }
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / MILLI, self.0 % MILLI)
    }
}

impl FromStr for TokenAmount {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_decimal(s)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse_decimal(&raw).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// ASSET STRINGS
// ============================================================================

/// A Hive asset string such as `"50.000 HIVE"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub amount: TokenAmount,
    pub symbol: String,
}

impl Asset {
    /// Parses `"<number> <symbol>"`.
    pub fn parse(value: &str) -> Result<Self, BridgeError> {
        let mut parts = value.split_whitespace();
        let (Some(number), Some(symbol), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(BridgeError::InvalidAmount(format!(
                "'{}' is not of the form '<number> <symbol>'",
                value
            )));
        };
        Ok(Self {
            amount: TokenAmount::parse_decimal(number)?,
            symbol: symbol.to_string(),
        })
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.symbol)
    }
}

// ============================================================================
// FEE RATE
// ============================================================================

/// Validator fee as a percentage with up to two decimals, held in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeRate {
    basis_points: u32,
}

impl FeeRate {
    pub const fn from_basis_points(basis_points: u32) -> Self {
        Self { basis_points }
    }

    pub const fn basis_points(&self) -> u32 {
        self.basis_points
    }

    /// Parses a percentage such as `"1"` or `"0.25"`. Must be below 100.
    pub fn parse_percent(value: &str) -> Result<Self, BridgeError> {
        let value = value.trim();
        let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
        let digits_ok = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if whole.is_empty() || !digits_ok(whole) || !digits_ok(fraction) || fraction.len() > 2 {
            return Err(BridgeError::InvalidAmount(format!(
                "fee percentage '{}' must be a decimal with at most 2 decimals",
                value
            )));
        }

        let whole: u32 = whole
            .parse()
            .map_err(|_| BridgeError::InvalidAmount(format!("fee percentage '{}' is too large", value)))?;
        let fraction: u32 = format!("{:0<2}", fraction).parse().unwrap_or(0);
        let basis_points = whole.saturating_mul(100).saturating_add(fraction);
        if basis_points >= 10_000 {
            return Err(BridgeError::InvalidAmount(format!(
                "fee percentage '{}' must be below 100",
                value
            )));
        }
        Ok(Self { basis_points })
    }

    /// Fee owed on `amount`, rounded half-up to three decimals.
    pub fn fee_for(&self, amount: TokenAmount) -> TokenAmount {
        let scaled = amount.milli() as u128 * self.basis_points as u128;
        TokenAmount::from_milli(((scaled + BASIS_POINTS / 2) / BASIS_POINTS) as u64)
    }

    /// Splits `amount` into `(net, fee)` with `net + fee == amount`.
    pub fn split(&self, amount: TokenAmount) -> (TokenAmount, TokenAmount) {
        let fee = self.fee_for(amount);
        // fee <= amount because basis_points < 10_000
        let net = amount.checked_sub(fee).unwrap_or_default();
        (net, fee)
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.basis_points / 100;
        let fraction = self.basis_points % 100;
        if fraction == 0 {
            write!(f, "{}", whole)
        } else if fraction % 10 == 0 {
            write!(f, "{}.{}", whole, fraction / 10)
        } else {
            write!(f, "{}.{:02}", whole, fraction)
        }
    }
}
