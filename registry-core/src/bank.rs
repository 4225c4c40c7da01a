//! Accounts and module accounts
//!
//! Every balance the registry touches lives here: user accounts fund bonds
//! and bids, and named module accounts hold escrowed or collected funds.

use crate::{
    crypto, keys,
    store::{KvStore, KvStoreExt},
    types::{Address, Coins},
    Error, Result,
};
use serde::{Deserialize, Serialize};

/// Holds every bond's balance
pub const BOND_MODULE: &str = "bond";
/// Collects record rent
pub const RECORD_RENT_MODULE: &str = "record_rent";
/// Holds auction fees and locked bid amounts
pub const AUCTION_MODULE: &str = "auction";
/// Receives retained auction fees and winning payments
pub const AUCTION_BURN_MODULE: &str = "auction_burn";

/// All module account names
pub const MODULE_ACCOUNTS: [&str; 4] = [
    BOND_MODULE,
    RECORD_RENT_MODULE,
    AUCTION_MODULE,
    AUCTION_BURN_MODULE,
];

/// Account state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Address
    pub address: Address,
    /// Public key, known once the account has signed a transaction
    #[serde(default)]
    pub public_key: Option<Vec<u8>>,
    /// Number assigned at creation
    pub account_number: u64,
    /// Number of transactions signed
    pub sequence: u64,
    /// Balance
    pub coins: Coins,
}

/// Address of a module account
pub fn module_address(module: &str) -> Address {
    crypto::module_address(module)
}

/// Load an account
pub fn get_account(store: &dyn KvStore, address: &Address) -> Result<Option<Account>> {
    store.get_value(&keys::key(keys::BANK, keys::bank::ACCOUNT, address.as_str().as_bytes()))
}

/// Store an account
pub fn set_account(store: &mut dyn KvStore, account: &Account) -> Result<()> {
    store.put_value(
        &keys::key(keys::BANK, keys::bank::ACCOUNT, account.address.as_str().as_bytes()),
        account,
    )
}

fn counter_key() -> Vec<u8> {
    keys::key(keys::BANK, keys::bank::NEXT_ACCOUNT_NUMBER, b"")
}

/// Account number the next new account receives
pub fn next_account_number(store: &dyn KvStore) -> Result<u64> {
    Ok(store.get_value(&counter_key())?.unwrap_or(0))
}

/// Store an imported account, keeping the account number counter ahead of it
pub(crate) fn import_account(store: &mut dyn KvStore, account: &Account) -> Result<()> {
    if get_account(store, &account.address)?.is_some() {
        return Err(Error::InvalidInput(format!(
            "Duplicate account {}",
            account.address
        )));
    }
    if account.coins.is_any_negative() {
        return Err(Error::InvalidInput(format!(
            "Account {} has negative balance",
            account.address
        )));
    }
    set_account(store, account)?;
    if account.account_number >= next_account_number(store)? {
        store.put_value(&counter_key(), &(account.account_number + 1))?;
    }
    Ok(())
}

/// Load an account, creating an empty one with the next account number
pub fn get_or_create_account(store: &mut dyn KvStore, address: &Address) -> Result<Account> {
    if let Some(account) = get_account(store, address)? {
        return Ok(account);
    }

    let account_number = next_account_number(store)?;
    store.put_value(&counter_key(), &(account_number + 1))?;

    let account = Account {
        address: address.clone(),
        public_key: None,
        account_number,
        sequence: 0,
        coins: Coins::new(),
    };
    set_account(store, &account)?;

    tracing::debug!(address = %address, account_number, "Account created");
    Ok(account)
}

/// Every account, in address order
pub fn list_accounts(store: &dyn KvStore) -> Result<Vec<Account>> {
    store.values_with_prefix(&keys::prefix(keys::BANK, keys::bank::ACCOUNT))
}

/// Balance of an address
pub fn balance(store: &dyn KvStore, address: &Address) -> Result<Coins> {
    Ok(get_account(store, address)?
        .map(|account| account.coins)
        .unwrap_or_default())
}

/// Balance of a module account
pub fn module_balance(store: &dyn KvStore, module: &str) -> Result<Coins> {
    balance(store, &module_address(module))
}

/// Credit an address
pub fn add_coins(store: &mut dyn KvStore, address: &Address, coins: &Coins) -> Result<()> {
    let mut account = get_or_create_account(store, address)?;
    account.coins = account.coins.add(coins);
    set_account(store, &account)
}

/// Debit an address, failing if any denomination would go negative
pub fn subtract_coins(store: &mut dyn KvStore, address: &Address, coins: &Coins) -> Result<()> {
    let mut account = get_account(store, address)?.ok_or_else(|| {
        Error::InsufficientFunds(format!("Account {} has no funds", address))
    })?;

    account.coins = account.coins.checked_sub(coins).ok_or_else(|| {
        Error::InsufficientFunds(format!(
            "Account {} holds {}, needs {}",
            address, account.coins, coins
        ))
    })?;
    set_account(store, &account)
}

/// Move coins between two addresses
pub fn send(store: &mut dyn KvStore, from: &Address, to: &Address, coins: &Coins) -> Result<()> {
    subtract_coins(store, from, coins)?;
    add_coins(store, to, coins)
}

/// Move coins from an account into a module account
pub fn send_to_module(
    store: &mut dyn KvStore,
    from: &Address,
    module: &str,
    coins: &Coins,
) -> Result<()> {
    send(store, from, &module_address(module), coins)
}

/// Move coins from a module account to an account
pub fn send_from_module(
    store: &mut dyn KvStore,
    module: &str,
    to: &Address,
    coins: &Coins,
) -> Result<()> {
    send(store, &module_address(module), to, coins)
}

/// Move coins between module accounts
pub fn send_between_modules(
    store: &mut dyn KvStore,
    from: &str,
    to: &str,
    coins: &Coins,
) -> Result<()> {
    send(store, &module_address(from), &module_address(to), coins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn coins(s: &str) -> Coins {
        Coins::parse(s).unwrap()
    }

    #[test]
    fn test_account_numbers_increment() {
        let mut store = MemStore::new();
        let a = get_or_create_account(&mut store, &Address::new("a")).unwrap();
        let b = get_or_create_account(&mut store, &Address::new("b")).unwrap();
        let a_again = get_or_create_account(&mut store, &Address::new("a")).unwrap();

        assert_eq!(a.account_number, 0);
        assert_eq!(b.account_number, 1);
        assert_eq!(a_again.account_number, 0);
    }

    #[test]
    fn test_send_to_module_and_back() {
        let mut store = MemStore::new();
        let alice = Address::new("alice");
        add_coins(&mut store, &alice, &coins("100wire")).unwrap();

        send_to_module(&mut store, &alice, BOND_MODULE, &coins("40wire")).unwrap();
        assert_eq!(balance(&store, &alice).unwrap(), coins("60wire"));
        assert_eq!(module_balance(&store, BOND_MODULE).unwrap(), coins("40wire"));

        send_from_module(&mut store, BOND_MODULE, &alice, &coins("10wire")).unwrap();
        assert_eq!(balance(&store, &alice).unwrap(), coins("70wire"));
    }

    #[test]
    fn test_insufficient_funds() {
        let mut store = MemStore::new();
        let alice = Address::new("alice");
        add_coins(&mut store, &alice, &coins("5wire")).unwrap();

        let err = send_to_module(&mut store, &alice, BOND_MODULE, &coins("6wire")).unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds(_)));
        assert_eq!(balance(&store, &alice).unwrap(), coins("5wire"));

        let err = subtract_coins(&mut store, &Address::new("nobody"), &coins("1wire")).unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds(_)));
    }
}
