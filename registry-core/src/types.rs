//! Shared primitive types: addresses, coins, block headers

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Account address (hex-encoded, derived from a public key or module name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Wrap an already-derived address string
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get as string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty address (no owner)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Single-denomination amount, e.g. `10wire`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Denomination
    pub denom: String,
    /// Amount (never negative)
    pub amount: Decimal,
}

impl Coin {
    /// Create a coin
    pub fn new(denom: impl Into<String>, amount: Decimal) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }

    /// Amount is strictly positive
    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Convert to a coin set
    pub fn to_coins(&self) -> Coins {
        let mut coins = Coins::new();
        coins.add_coin(self);
        coins
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount.normalize(), self.denom)
    }
}

impl FromStr for Coin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| Error::InvalidInput(format!("Coin '{}' has no denomination", s)))?;
        let (amount, denom) = s.split_at(split);

        if amount.is_empty() {
            return Err(Error::InvalidInput(format!("Coin '{}' has no amount", s)));
        }
        let valid_denom = denom.starts_with(|c: char| c.is_ascii_alphabetic())
            && denom
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '/');
        if !valid_denom {
            return Err(Error::InvalidInput(format!("Invalid denomination '{}'", denom)));
        }

        let amount = Decimal::from_str(amount)
            .map_err(|e| Error::InvalidInput(format!("Invalid amount '{}': {}", amount, e)))?;

        Ok(Coin::new(denom, amount))
    }
}

/// Multi-denomination coin set; zero entries are never stored
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coins(BTreeMap<String, Decimal>);

impl Coins {
    /// Empty coin set
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Parse a comma-separated list, e.g. `10wire,5uwire`
    pub fn parse(s: &str) -> Result<Self> {
        let mut coins = Coins::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let coin: Coin = part.parse()?;
            coins.add_coin(&coin);
        }
        Ok(coins)
    }

    /// Add a single coin
    pub fn add_coin(&mut self, coin: &Coin) {
        if coin.amount.is_zero() {
            return;
        }
        *self.0.entry(coin.denom.clone()).or_insert(Decimal::ZERO) += coin.amount;
    }

    /// Sum of two coin sets
    pub fn add(&self, other: &Coins) -> Coins {
        let mut sum = self.clone();
        for (denom, amount) in &other.0 {
            sum.add_coin(&Coin::new(denom.clone(), *amount));
        }
        sum
    }

    /// Difference, or `None` if any denomination would go negative
    pub fn checked_sub(&self, other: &Coins) -> Option<Coins> {
        let mut diff = self.0.clone();
        for (denom, amount) in &other.0 {
            let current = diff.get(denom).copied().unwrap_or(Decimal::ZERO);
            let remaining = current - amount;
            if remaining.is_sign_negative() && !remaining.is_zero() {
                return None;
            }
            if remaining.is_zero() {
                diff.remove(denom);
            } else {
                diff.insert(denom.clone(), remaining);
            }
        }
        Some(Coins(diff))
    }

    /// Amount held of one denomination
    pub fn amount_of(&self, denom: &str) -> Decimal {
        self.0.get(denom).copied().unwrap_or(Decimal::ZERO)
    }

    /// No coins held
    pub fn is_zero(&self) -> bool {
        self.0.values().all(|a| a.is_zero())
    }

    /// Every held amount is strictly positive and there is at least one
    pub fn is_all_positive(&self) -> bool {
        !self.0.is_empty() && self.0.values().all(|a| *a > Decimal::ZERO)
    }

    /// Any held amount is negative
    pub fn is_any_negative(&self) -> bool {
        self.0.values().any(|a| a.is_sign_negative() && !a.is_zero())
    }

    /// Some denomination exceeds the matching amount in `limit`
    pub fn is_any_gt(&self, limit: &Coins) -> bool {
        self.0.iter().any(|(denom, amount)| *amount > limit.amount_of(denom))
    }

    /// Every denomination of `other` is covered by `self`
    pub fn is_all_gte(&self, other: &Coins) -> bool {
        other
            .0
            .iter()
            .all(|(denom, amount)| self.amount_of(denom) >= *amount)
    }

    /// Iterate `(denom, amount)` pairs in denomination order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Decimal)> {
        self.0.iter()
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(denom, amount)| format!("{}{}", amount.normalize(), denom))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for Coins {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Coins::parse(s)
    }
}

/// Block context a transition executes against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Chain identifier
    pub chain_id: String,
    /// Block height
    pub height: u64,
    /// Block time (deterministic wall clock)
    pub time: DateTime<Utc>,
}

impl BlockHeader {
    /// Create a header
    pub fn new(chain_id: impl Into<String>, height: u64, time: DateTime<Utc>) -> Self {
        Self {
            chain_id: chain_id.into(),
            height,
            time,
        }
    }
}
