//! Chain parameters
//!
//! Set at genesis and stored in state under the `params/` namespace so every
//! replica charges the same rent and runs auctions with the same timings.

use crate::{
    keys,
    store::{KvStore, KvStoreExt},
    types::{Coin, Coins},
    Error, Result,
};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const PARAMS_KEY: u8 = 0x00;

/// All module parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Params {
    /// Record rent parameters
    pub record: RecordParams,
    /// Bond parameters
    pub bond: BondParams,
    /// Name auction parameters
    pub name_auction: NameAuctionParams,
}

/// Record rent parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordParams {
    /// Rent charged per period
    pub record_rent: Coins,
    /// Rent period in seconds
    pub record_rent_period_secs: i64,
}

impl Default for RecordParams {
    fn default() -> Self {
        Self {
            record_rent: Coin::new("wire", Decimal::ONE).to_coins(),
            record_rent_period_secs: 365 * 24 * 60 * 60,
        }
    }
}

impl RecordParams {
    /// Rent period as a duration
    pub fn rent_period(&self) -> Duration {
        Duration::seconds(self.record_rent_period_secs)
    }
}

/// Bond parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BondParams {
    /// Upper bound on a bond's balance
    pub max_bond_amount: Coins,
}

impl Default for BondParams {
    fn default() -> Self {
        Self {
            max_bond_amount: Coin::new("wire", Decimal::new(10_000, 0)).to_coins(),
        }
    }
}

/// Name authority auction parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameAuctionParams {
    /// Reserve authorities through an auction
    pub enabled: bool,
    /// Commit phase length in seconds
    pub commits_duration_secs: i64,
    /// Reveal phase length in seconds
    pub reveals_duration_secs: i64,
    /// Fee retained from every bid
    pub commit_fee: Coin,
    /// Fee refunded on reveal
    pub reveal_fee: Coin,
    /// Lowest acceptable bid
    pub minimum_bid: Coin,
}

impl Default for NameAuctionParams {
    fn default() -> Self {
        Self {
            enabled: false,
            commits_duration_secs: 24 * 60 * 60,
            reveals_duration_secs: 24 * 60 * 60,
            commit_fee: Coin::new("wire", Decimal::ONE),
            reveal_fee: Coin::new("wire", Decimal::ONE),
            minimum_bid: Coin::new("wire", Decimal::new(5, 0)),
        }
    }
}

impl Params {
    /// Check parameter sanity
    pub fn validate(&self) -> Result<()> {
        if self.record.record_rent.is_any_negative() {
            return Err(Error::InvalidInput("Record rent must not be negative".into()));
        }
        if self.record.record_rent_period_secs <= 0 {
            return Err(Error::InvalidInput("Record rent period must be positive".into()));
        }
        if self.bond.max_bond_amount.is_any_negative() {
            return Err(Error::InvalidInput("Max bond amount must not be negative".into()));
        }

        let auction = &self.name_auction;
        if auction.commits_duration_secs <= 0 || auction.reveals_duration_secs <= 0 {
            return Err(Error::InvalidInput("Auction durations must be positive".into()));
        }
        if auction.commit_fee.amount.is_sign_negative() || auction.reveal_fee.amount.is_sign_negative()
        {
            return Err(Error::InvalidInput("Auction fees must not be negative".into()));
        }
        if !auction.minimum_bid.is_positive() {
            return Err(Error::InvalidInput("Minimum bid must be positive".into()));
        }
        Ok(())
    }

    /// Load stored params, or defaults before genesis
    pub fn load(store: &dyn KvStore) -> Result<Self> {
        Ok(store
            .get_value(&keys::key(keys::PARAMS, PARAMS_KEY, b""))?
            .unwrap_or_default())
    }

    /// Store params
    pub fn save(&self, store: &mut dyn KvStore) -> Result<()> {
        self.validate()?;
        store.put_value(&keys::key(keys::PARAMS, PARAMS_KEY, b""), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    #[test]
    fn test_default_params_valid() {
        Params::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_non_positive_period() {
        let mut params = Params::default();
        params.record.record_rent_period_secs = 0;
        assert!(matches!(params.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_rejects_zero_minimum_bid() {
        let mut params = Params::default();
        params.name_auction.minimum_bid = Coin::new("wire", Decimal::ZERO);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let mut store = MemStore::new();
        assert_eq!(Params::load(&store).unwrap(), Params::default());

        let mut params = Params::default();
        params.name_auction.enabled = true;
        params.save(&mut store).unwrap();
        assert!(Params::load(&store).unwrap().name_auction.enabled);
    }
}
