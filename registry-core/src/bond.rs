//! Bond ledger
//!
//! A bond is an escrow account that pays record rent. Its balance is
//! tracked on the bond itself while the coins sit in the `bond` module
//! account, so the sum of all bond balances always equals that account's
//! balance.

use crate::{
    bank,
    context::{Context, Signer},
    keys,
    store::{KvStore, KvStoreExt},
    types::{Address, Coins},
    Error, Result,
};
use serde::{Deserialize, Serialize};

/// Escrow account funding record rent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    /// SHA-256 of `owner:accountNumber:sequence`
    pub id: String,
    /// Owner address
    pub owner: Address,
    /// Remaining balance
    pub balance: Coins,
}

/// A module that may reference bonds and block their cancellation
pub trait BondUsage {
    /// Module name reported in errors
    fn module(&self) -> &'static str;

    /// Is the bond referenced by this module
    fn uses_bond(&self, store: &dyn KvStore, bond_id: &str) -> Result<bool>;
}

fn bond_key(id: &str) -> Vec<u8> {
    keys::key(keys::BOND, keys::bond::BOND, id.as_bytes())
}

fn owner_index_key(owner: &Address, id: &str) -> Vec<u8> {
    keys::index_key(
        keys::BOND,
        keys::bond::OWNER_BONDS,
        owner.as_str().as_bytes(),
        id.as_bytes(),
    )
}

/// Bond by id
pub fn get_bond(store: &dyn KvStore, id: &str) -> Result<Option<Bond>> {
    store.get_value(&bond_key(id))
}

/// Bond by id, failing with `NotFound`
pub fn require_bond(store: &dyn KvStore, id: &str) -> Result<Bond> {
    get_bond(store, id)?.ok_or_else(|| Error::NotFound(format!("Bond {} not found", id)))
}

/// Store a bond and index it under its owner
pub(crate) fn save_bond(store: &mut dyn KvStore, bond: &Bond) -> Result<()> {
    store.put_value(&bond_key(&bond.id), bond)?;
    store.set(&owner_index_key(&bond.owner, &bond.id), &[])
}

fn remove_bond(store: &mut dyn KvStore, bond: &Bond) -> Result<()> {
    store.delete(&bond_key(&bond.id))?;
    store.delete(&owner_index_key(&bond.owner, &bond.id))
}

/// Every bond, in id order
pub fn list_bonds(store: &dyn KvStore) -> Result<Vec<Bond>> {
    store.values_with_prefix(&keys::prefix(keys::BOND, keys::bond::BOND))
}

/// Bonds owned by an address
pub fn bonds_by_owner(store: &dyn KvStore, owner: &Address) -> Result<Vec<Bond>> {
    let prefix = keys::index_prefix(
        keys::BOND,
        keys::bond::OWNER_BONDS,
        owner.as_str().as_bytes(),
    );
    store
        .keys_with_prefix(&prefix)?
        .into_iter()
        .map(|id| {
            let id = String::from_utf8(id)
                .map_err(|e| Error::Internal(format!("Malformed bond index key: {}", e)))?;
            require_bond(store, &id)
        })
        .collect()
}

fn require_owned_bond(store: &dyn KvStore, id: &str, signer: &Signer) -> Result<Bond> {
    let bond = require_bond(store, id)?;
    if bond.owner != signer.address {
        return Err(Error::Unauthorized("Bond owner mismatch".into()));
    }
    Ok(bond)
}

fn validate_amount(coins: &Coins) -> Result<()> {
    if !coins.is_all_positive() {
        return Err(Error::InvalidInput(format!("Invalid amount: '{}'", coins)));
    }
    Ok(())
}

/// Deposit funds into a new bond
pub fn create_bond(ctx: &mut Context<'_>, coins: &Coins, signer: &Signer) -> Result<Bond> {
    validate_amount(coins)?;
    if coins.is_any_gt(&ctx.params.bond.max_bond_amount) {
        return Err(Error::InvalidInput(format!(
            "Bond amount {} exceeds max {}",
            coins, ctx.params.bond.max_bond_amount
        )));
    }

    let id = signer.derive_id();
    if get_bond(ctx.store, &id)?.is_some() {
        return Err(Error::Conflict(format!("Bond {} already exists", id)));
    }

    bank::send_to_module(ctx.store, &signer.address, bank::BOND_MODULE, coins)?;

    let bond = Bond {
        id,
        owner: signer.address.clone(),
        balance: coins.clone(),
    };
    save_bond(ctx.store, &bond)?;

    tracing::info!(bond_id = %bond.id, owner = %bond.owner, balance = %bond.balance, "Bond created");
    Ok(bond)
}

/// Add funds to a bond
pub fn refill_bond(ctx: &mut Context<'_>, id: &str, coins: &Coins, signer: &Signer) -> Result<Bond> {
    validate_amount(coins)?;
    let mut bond = require_owned_bond(ctx.store, id, signer)?;

    let balance = bond.balance.add(coins);
    if balance.is_any_gt(&ctx.params.bond.max_bond_amount) {
        return Err(Error::InvalidInput(format!(
            "Bond balance {} would exceed max {}",
            balance, ctx.params.bond.max_bond_amount
        )));
    }

    bank::send_to_module(ctx.store, &signer.address, bank::BOND_MODULE, coins)?;
    bond.balance = balance;
    save_bond(ctx.store, &bond)?;

    tracing::info!(bond_id = %id, balance = %bond.balance, "Bond refilled");
    Ok(bond)
}

/// Return funds from a bond to its owner
pub fn withdraw_bond(
    ctx: &mut Context<'_>,
    id: &str,
    coins: &Coins,
    signer: &Signer,
) -> Result<Bond> {
    validate_amount(coins)?;
    let mut bond = require_owned_bond(ctx.store, id, signer)?;

    bond.balance = bond
        .balance
        .checked_sub(coins)
        .ok_or_else(|| Error::InsufficientFunds("Insufficient bond balance".into()))?;

    bank::send_from_module(ctx.store, bank::BOND_MODULE, &signer.address, coins)?;
    save_bond(ctx.store, &bond)?;

    tracing::info!(bond_id = %id, balance = %bond.balance, "Bond withdrawn");
    Ok(bond)
}

/// Refund the whole balance and delete the bond
pub fn cancel_bond(
    ctx: &mut Context<'_>,
    id: &str,
    signer: &Signer,
    usages: &[&dyn BondUsage],
) -> Result<Bond> {
    let bond = require_owned_bond(ctx.store, id, signer)?;

    for usage in usages {
        if usage.uses_bond(ctx.store, id)? {
            return Err(Error::Conflict(format!(
                "Bond in use by the '{}' module",
                usage.module()
            )));
        }
    }

    if !bond.balance.is_zero() {
        bank::send_from_module(ctx.store, bank::BOND_MODULE, &signer.address, &bond.balance)?;
    }
    remove_bond(ctx.store, &bond)?;

    tracing::info!(bond_id = %id, refunded = %bond.balance, "Bond cancelled");
    Ok(bond)
}

/// Debit a bond into a module account (rent collection)
pub(crate) fn transfer_to_module(
    store: &mut dyn KvStore,
    bond: &mut Bond,
    module: &str,
    coins: &Coins,
) -> Result<()> {
    bond.balance = bond.balance.checked_sub(coins).ok_or_else(|| {
        Error::InsufficientFunds(format!(
            "Bond {} holds {}, needs {}",
            bond.id, bond.balance, coins
        ))
    })?;
    bank::send_between_modules(store, bank::BOND_MODULE, module, coins)?;
    save_bond(store, bond)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crypto::KeyPair, params::Params, store::MemStore, types::BlockHeader};
    use chrono::Utc;

    fn coins(s: &str) -> Coins {
        Coins::parse(s).unwrap()
    }

    fn setup(store: &mut MemStore, keypair: &KeyPair) {
        bank::add_coins(store, &keypair.address(), &coins("1000wire")).unwrap();
    }

    fn ctx(store: &mut MemStore) -> Context<'_> {
        Context::new(store, BlockHeader::new("test", 1, Utc::now()), Params::default())
    }

    fn signer(keypair: &KeyPair, sequence: u64) -> Signer {
        Signer::new(keypair.public_key().to_vec(), 0, sequence)
    }

    struct AlwaysUsed;

    impl BondUsage for AlwaysUsed {
        fn module(&self) -> &'static str {
            "nameservice"
        }

        fn uses_bond(&self, _store: &dyn KvStore, _bond_id: &str) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_create_bond_moves_funds() {
        let mut store = MemStore::new();
        let owner = KeyPair::from_seed(&[1u8; 32]);
        setup(&mut store, &owner);

        let bond = create_bond(&mut ctx(&mut store), &coins("100wire"), &signer(&owner, 0)).unwrap();
        assert_eq!(bond.owner, owner.address());
        assert_eq!(bond.balance, coins("100wire"));
        assert_eq!(bank::balance(&store, &owner.address()).unwrap(), coins("900wire"));
        assert_eq!(bank::module_balance(&store, bank::BOND_MODULE).unwrap(), coins("100wire"));
        assert_eq!(bonds_by_owner(&store, &owner.address()).unwrap(), vec![bond]);
    }

    #[test]
    fn test_create_bond_limits() {
        let mut store = MemStore::new();
        let owner = KeyPair::from_seed(&[1u8; 32]);
        setup(&mut store, &owner);
        let mut ctx = ctx(&mut store);

        assert!(matches!(
            create_bond(&mut ctx, &coins("10001wire"), &signer(&owner, 0)),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            create_bond(&mut ctx, &Coins::new(), &signer(&owner, 0)),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            create_bond(&mut ctx, &coins("5000wire"), &signer(&owner, 0)),
            Err(Error::InsufficientFunds(_))
        ));
    }

    #[test]
    fn test_refill_and_withdraw() {
        let mut store = MemStore::new();
        let owner = KeyPair::from_seed(&[1u8; 32]);
        let other = KeyPair::from_seed(&[2u8; 32]);
        setup(&mut store, &owner);
        setup(&mut store, &other);
        let mut ctx = ctx(&mut store);

        let bond = create_bond(&mut ctx, &coins("100wire"), &signer(&owner, 0)).unwrap();
        let bond = refill_bond(&mut ctx, &bond.id, &coins("50wire"), &signer(&owner, 1)).unwrap();
        assert_eq!(bond.balance, coins("150wire"));

        assert!(matches!(
            refill_bond(&mut ctx, &bond.id, &coins("1wire"), &signer(&other, 0)),
            Err(Error::Unauthorized(_))
        ));

        let bond = withdraw_bond(&mut ctx, &bond.id, &coins("120wire"), &signer(&owner, 2)).unwrap();
        assert_eq!(bond.balance, coins("30wire"));

        let err = withdraw_bond(&mut ctx, &bond.id, &coins("31wire"), &signer(&owner, 3)).unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds(_)));
        assert_eq!(require_bond(ctx.store, &bond.id).unwrap().balance, coins("30wire"));
    }

    #[test]
    fn test_cancel_bond() {
        let mut store = MemStore::new();
        let owner = KeyPair::from_seed(&[1u8; 32]);
        setup(&mut store, &owner);
        let mut ctx = ctx(&mut store);

        let bond = create_bond(&mut ctx, &coins("100wire"), &signer(&owner, 0)).unwrap();
        let err = cancel_bond(&mut ctx, &bond.id, &signer(&owner, 1), &[&AlwaysUsed]).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        cancel_bond(&mut ctx, &bond.id, &signer(&owner, 1), &[]).unwrap();
        assert!(get_bond(ctx.store, &bond.id).unwrap().is_none());
        assert!(bonds_by_owner(ctx.store, &owner.address()).unwrap().is_empty());
        assert_eq!(bank::balance(ctx.store, &owner.address()).unwrap(), coins("1000wire"));
        assert!(bank::module_balance(ctx.store, bank::BOND_MODULE).unwrap().is_zero());
    }

    #[test]
    fn test_transfer_to_module_rejects_overdraft() {
        let mut store = MemStore::new();
        let owner = KeyPair::from_seed(&[1u8; 32]);
        setup(&mut store, &owner);
        let mut ctx = ctx(&mut store);

        let mut bond = create_bond(&mut ctx, &coins("2wire"), &signer(&owner, 0)).unwrap();
        transfer_to_module(ctx.store, &mut bond, bank::RECORD_RENT_MODULE, &coins("2wire")).unwrap();
        assert!(bond.balance.is_zero());

        let err = transfer_to_module(ctx.store, &mut bond, bank::RECORD_RENT_MODULE, &coins("1wire"))
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds(_)));
    }
}
