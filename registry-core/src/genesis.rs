//! Genesis import and export
//!
//! The genesis document is JSON. Import validates every entry, writes it
//! without change tracking and then runs the invariant checks, so a genesis
//! whose module balances disagree with its bonds or bids is rejected.

use crate::{
    auction::{self, Auction, Bid},
    bank::{self, Account},
    bond::{self, Bond},
    invariants,
    naming::{self, NameAuthority, NameRecord},
    params::Params,
    record::{self, Record},
    store::KvStore,
    Error, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Initial (or exported) chain state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisState {
    /// Chain identifier
    pub chain_id: String,
    /// Time of the first block
    pub genesis_time: DateTime<Utc>,
    /// Chain parameters
    #[serde(default)]
    pub params: Params,
    /// Accounts, including module accounts holding escrow
    #[serde(default)]
    pub accounts: Vec<Account>,
    /// Bonds
    #[serde(default)]
    pub bonds: Vec<Bond>,
    /// Name authorities
    #[serde(default)]
    pub authorities: Vec<NameAuthority>,
    /// Name bindings
    #[serde(default)]
    pub names: Vec<NameRecord>,
    /// Records, including tombstones
    #[serde(default)]
    pub records: Vec<Record>,
    /// Auctions
    #[serde(default)]
    pub auctions: Vec<Auction>,
    /// Bids of the listed auctions
    #[serde(default)]
    pub bids: Vec<Bid>,
}

impl GenesisState {
    /// Empty genesis with default params
    pub fn new(chain_id: impl Into<String>, genesis_time: DateTime<Utc>) -> Self {
        Self {
            chain_id: chain_id.into(),
            genesis_time,
            params: Params::default(),
            accounts: Vec::new(),
            bonds: Vec::new(),
            authorities: Vec::new(),
            names: Vec::new(),
            records: Vec::new(),
            auctions: Vec::new(),
            bids: Vec::new(),
        }
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write as pretty JSON
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Structural checks that need no store
    pub fn validate(&self) -> Result<()> {
        if self.chain_id.is_empty() {
            return Err(Error::InvalidInput("Genesis chain id is empty".into()));
        }
        self.params.validate()?;

        for bond in &self.bonds {
            if bond.owner.is_empty() || bond.balance.is_any_negative() {
                return Err(Error::InvalidInput(format!("Invalid genesis bond {}", bond.id)));
            }
        }
        for rec in &self.records {
            record::validate_attributes(&rec.attributes)?;
        }
        for bid in &self.bids {
            if !self.auctions.iter().any(|a| a.id == bid.auction_id) {
                return Err(Error::InvalidInput(format!(
                    "Bid for unknown auction {}",
                    bid.auction_id
                )));
            }
        }
        Ok(())
    }
}

/// Write a validated genesis into an empty store
pub fn import(store: &mut dyn KvStore, genesis: &GenesisState) -> Result<()> {
    genesis.validate()?;
    genesis.params.save(store)?;

    for account in &genesis.accounts {
        bank::import_account(store, account)?;
    }
    for bond in &genesis.bonds {
        bond::save_bond(store, bond)?;
    }
    for rec in &genesis.records {
        if let Some(bond_id) = &rec.bond_id {
            if !genesis.bonds.iter().any(|b| &b.id == bond_id) {
                return Err(Error::InvalidInput(format!(
                    "Record {} references unknown bond {}",
                    rec.id, bond_id
                )));
            }
        }
        record::import_record(store, rec)?;
    }
    for authority in &genesis.authorities {
        naming::put_authority(store, authority)?;
    }
    for name_record in &genesis.names {
        naming::import_name(store, name_record)?;
    }
    for auction in &genesis.auctions {
        auction::save_auction(store, auction)?;
    }
    for bid in &genesis.bids {
        auction::save_bid(store, bid)?;
    }

    invariants::check_all(store).map_err(|e| match e {
        Error::InvariantViolation(message) => {
            Error::InvalidInput(format!("Inconsistent genesis: {}", message))
        }
        other => other,
    })?;

    tracing::info!(
        chain_id = %genesis.chain_id,
        accounts = genesis.accounts.len(),
        bonds = genesis.bonds.len(),
        records = genesis.records.len(),
        authorities = genesis.authorities.len(),
        names = genesis.names.len(),
        auctions = genesis.auctions.len(),
        "Genesis imported"
    );
    Ok(())
}

/// Snapshot the store as a genesis document
pub fn export(
    store: &dyn KvStore,
    chain_id: impl Into<String>,
    genesis_time: DateTime<Utc>,
) -> Result<GenesisState> {
    let auctions = auction::list_auctions(store)?;
    let mut bids = Vec::new();
    for auction in &auctions {
        bids.extend(auction::get_bids(store, &auction.id)?);
    }

    Ok(GenesisState {
        chain_id: chain_id.into(),
        genesis_time,
        params: Params::load(store)?,
        accounts: bank::list_accounts(store)?,
        bonds: bond::list_bonds(store)?,
        authorities: naming::list_authorities(store)?,
        names: naming::list_names(store)?,
        records: record::list_records(store, true)?,
        auctions,
        bids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::KeyPair,
        record::tests::{funded_bond, header, payload, signer},
        store::MemStore,
        types::Coins,
        Context,
    };

    fn populated() -> MemStore {
        let mut store = MemStore::new();
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let bond_id = funded_bond(&mut store, &alice, "10wire");

        {
            let mut ctx = Context::new(&mut store, header(2), Params::default());
            let rec = record::set_record(
                &mut ctx,
                &payload("app", "1.0.0", &alice),
                Some(&bond_id),
                &signer(&alice, 1),
            )
            .unwrap();
            naming::reserve_authority(&mut ctx, "alice", &signer(&alice, 2)).unwrap();
            naming::set_name(&mut ctx, "wrn://alice/app#1.0.0", &rec.id, &signer(&alice, 3)).unwrap();
        }
        store
    }

    #[test]
    fn test_export_import_preserves_state() {
        let source = populated();
        let exported = export(&source, "registry-test", header(0).time).unwrap();
        assert_eq!(exported.records.len(), 1);
        assert_eq!(exported.names.len(), 1);

        let json = serde_json::to_string(&exported).unwrap();
        let parsed: GenesisState = serde_json::from_str(&json).unwrap();

        let mut target = MemStore::new();
        import(&mut target, &parsed).unwrap();

        let reexported = export(&target, "registry-test", header(0).time).unwrap();
        assert_eq!(reexported, exported);

        let resolved = naming::resolve(&target, "wrn://alice/app#1.0.0").unwrap().unwrap();
        assert_eq!(resolved.id, exported.records[0].id);
        assert_eq!(
            naming::names_for_record(&target, &resolved.id).unwrap(),
            vec!["wrn://alice/app#1.0.0".to_string()]
        );
    }

    #[test]
    fn test_import_rejects_unbacked_bonds() {
        let source = populated();
        let mut genesis = export(&source, "registry-test", header(0).time).unwrap();
        genesis.bonds[0].balance = Coins::parse("500wire").unwrap();

        let mut target = MemStore::new();
        assert!(matches!(import(&mut target, &genesis), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_import_rejects_tampered_record() {
        let source = populated();
        let mut genesis = export(&source, "registry-test", header(0).time).unwrap();
        genesis.records[0].id = "0".repeat(64);

        let mut target = MemStore::new();
        assert!(import(&mut target, &genesis).is_err());
    }

    #[test]
    fn test_genesis_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.json");
        let genesis = GenesisState::new("registry-test", header(0).time);
        genesis.to_file(&path).unwrap();
        assert_eq!(GenesisState::from_file(&path).unwrap(), genesis);
    }
}
