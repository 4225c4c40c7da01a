//! State invariants
//!
//! Checked at commit every `invariant_check_period` blocks. Any violation is
//! fatal: the node must halt rather than build on corrupt state.

use crate::{
    auction, bank, bond, record,
    store::KvStore,
    types::Coins,
    Error, Result,
};

/// Run every check, reporting the first violation
pub fn check_all(store: &dyn KvStore) -> Result<()> {
    bond_balances_non_negative(store)?;
    record_bonds_consistent(store)?;
    module_balances_non_negative(store)?;
    bond_module_balance_matches(store)?;
    auction_module_balance_matches(store)?;
    Ok(())
}

fn violation(message: String) -> Error {
    tracing::error!(%message, "Invariant violated");
    Error::InvariantViolation(message)
}

/// No bond holds a negative amount
pub fn bond_balances_non_negative(store: &dyn KvStore) -> Result<()> {
    for bond in bond::list_bonds(store)? {
        if bond.balance.is_any_negative() {
            return Err(violation(format!(
                "Bond {} has negative balance {}",
                bond.id, bond.balance
            )));
        }
    }
    Ok(())
}

/// Every bonded record references an existing bond and is indexed under it
pub fn record_bonds_consistent(store: &dyn KvStore) -> Result<()> {
    for rec in record::list_records(store, true)? {
        let Some(bond_id) = &rec.bond_id else {
            continue;
        };
        if bond::get_bond(store, bond_id)?.is_none() {
            return Err(violation(format!(
                "Record {} references missing bond {}",
                rec.id, bond_id
            )));
        }
        if !record::record_ids_by_bond(store, bond_id)?.contains(&rec.id) {
            return Err(violation(format!(
                "Record {} missing from index of bond {}",
                rec.id, bond_id
            )));
        }
    }

    for bond in bond::list_bonds(store)? {
        for id in record::record_ids_by_bond(store, &bond.id)? {
            let indexed = record::load_record(store, &id)?;
            if indexed.as_ref().and_then(|r| r.bond_id.as_deref()) != Some(bond.id.as_str()) {
                return Err(violation(format!(
                    "Bond {} index lists record {} it does not fund",
                    bond.id, id
                )));
            }
        }
    }
    Ok(())
}

/// Module accounts never go negative
pub fn module_balances_non_negative(store: &dyn KvStore) -> Result<()> {
    for module in bank::MODULE_ACCOUNTS {
        let balance = bank::module_balance(store, module)?;
        if balance.is_any_negative() {
            return Err(violation(format!(
                "Module account {} has negative balance {}",
                module, balance
            )));
        }
    }
    Ok(())
}

/// The bond module holds exactly the sum of bond balances
pub fn bond_module_balance_matches(store: &dyn KvStore) -> Result<()> {
    let total = bond::list_bonds(store)?
        .iter()
        .fold(Coins::new(), |sum, bond| sum.add(&bond.balance));
    let held = bank::module_balance(store, bank::BOND_MODULE)?;
    if held != total {
        return Err(violation(format!(
            "Bond module holds {}, bonds total {}",
            held, total
        )));
    }
    Ok(())
}

/// The auction module holds exactly the escrow of open bids
pub fn auction_module_balance_matches(store: &dyn KvStore) -> Result<()> {
    let mut total = Coins::new();
    for auction in auction::list_auctions(store)? {
        for bid in auction::get_bids(store, &auction.id)? {
            total = total.add(&bid.escrow());
        }
    }
    let held = bank::module_balance(store, bank::AUCTION_MODULE)?;
    if held != total {
        return Err(violation(format!(
            "Auction module holds {}, open bids escrow {}",
            held, total
        )));
    }
    Ok(())
}
