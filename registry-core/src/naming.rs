//! Naming layer
//!
//! Authorities own a top-level namespace; bindings map a full WRN
//! (`wrn://authority/path#version`) to a record id. Only the authority
//! owner may bind or unbind names under it. Deleting a binding leaves a
//! tombstone with an empty id so the history survives.

use crate::{
    auction::{self, Auction, AuctionHooks},
    bank, changeset,
    context::{Context, Signer},
    keys,
    record::{self, Record},
    store::{KvStore, KvStoreExt},
    types::Address,
    version::{self, VersionRange},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name scheme
pub const WRN_SCHEME: &str = "wrn://";

/// Parsed WRN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wrn {
    authority: String,
    path: String,
    fragment: Option<String>,
}

impl Wrn {
    /// Top-level authority name
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Path including its leading `/`, or empty
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Version fragment after `#`
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// The name without its version fragment
    pub fn base(&self) -> String {
        format!("{}{}{}", WRN_SCHEME, self.authority, self.path)
    }

    /// Fragment is a version range rather than a literal
    pub fn has_version_range(&self) -> bool {
        self.fragment.as_deref().map_or(false, version::is_range)
    }
}

impl fmt::Display for Wrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base())?;
        if let Some(fragment) = &self.fragment {
            write!(f, "#{}", fragment)?;
        }
        Ok(())
    }
}

fn invalid_wrn(wrn: &str) -> Error {
    Error::InvalidInput(format!("Invalid WRN: {}", wrn))
}

impl FromStr for Wrn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s.strip_prefix(WRN_SCHEME).ok_or_else(|| invalid_wrn(s))?;
        let (name, fragment) = match rest.split_once('#') {
            Some((name, fragment)) => (name, Some(fragment)),
            None => (rest, None),
        };
        let (authority, path) = match name.find('/') {
            Some(index) => name.split_at(index),
            None => (name, ""),
        };

        let valid_authority = !authority.is_empty()
            && authority
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        let valid_path = !path.contains("//")
            && path.chars().all(|c| !c.is_whitespace() && !c.is_control() && c != '?');
        let valid_fragment = fragment.map_or(true, |f| {
            !f.is_empty() && f.chars().all(|c| !c.is_control() && c != '#')
        });
        if !(valid_authority && valid_path && valid_fragment) {
            return Err(invalid_wrn(s));
        }

        let wrn = Wrn {
            authority: authority.to_string(),
            path: path.to_string(),
            fragment: fragment.map(str::to_string),
        };
        if wrn.to_string() != s {
            return Err(invalid_wrn(s));
        }
        Ok(wrn)
    }
}

/// Authority lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorityStatus {
    /// Owned and usable
    Active,
    /// Waiting for its auction to settle
    UnderAuction,
    /// Auction ended without a winner; may be reserved again
    Expired,
}

/// Reserved top-level name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameAuthority {
    /// Bare name
    pub name: String,
    /// Owner address (empty while under auction)
    pub owner_address: Address,
    /// Owner public key
    #[serde(with = "serde_bytes")]
    pub owner_public_key: Vec<u8>,
    /// Height of reservation or ownership transfer
    pub height: u64,
    /// Lifecycle status
    pub status: AuthorityStatus,
    /// Auction allocating this name
    pub auction_id: Option<String>,
}

/// Earlier target of a binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecordEntry {
    /// Record id (empty for a tombstone)
    pub id: String,
    /// Height the binding was made
    pub height: u64,
}

/// Name binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    /// Canonical WRN
    pub wrn: String,
    /// Target record id (empty for a tombstone)
    pub id: String,
    /// Height of the latest binding
    pub height: u64,
    /// Previous bindings, oldest first
    pub history: Vec<NameRecordEntry>,
}

fn authority_key(name: &str) -> Vec<u8> {
    keys::key(keys::NAMESERVICE, keys::nameservice::AUTHORITY, name.as_bytes())
}

fn name_key(wrn: &str) -> Vec<u8> {
    keys::key(keys::NAMESERVICE, keys::nameservice::NAME, wrn.as_bytes())
}

fn record_names_key(id: &str) -> Vec<u8> {
    keys::key(keys::NAMESERVICE, keys::nameservice::RECORD_NAMES, id.as_bytes())
}

fn auction_authority_key(auction_id: &str) -> Vec<u8> {
    keys::key(
        keys::NAMESERVICE,
        keys::nameservice::AUCTION_AUTHORITY,
        auction_id.as_bytes(),
    )
}

/// Authority by name
pub fn get_authority(store: &dyn KvStore, name: &str) -> Result<Option<NameAuthority>> {
    store.get_value(&authority_key(name))
}

/// Every authority, in name order
pub fn list_authorities(store: &dyn KvStore) -> Result<Vec<NameAuthority>> {
    store.values_with_prefix(&keys::prefix(keys::NAMESERVICE, keys::nameservice::AUTHORITY))
}

/// Store an authority without change tracking
pub(crate) fn put_authority(store: &mut dyn KvStore, authority: &NameAuthority) -> Result<()> {
    store.put_value(&authority_key(&authority.name), authority)?;
    if let Some(auction_id) = &authority.auction_id {
        store.put_value(&auction_authority_key(auction_id), &authority.name)?;
    }
    Ok(())
}

/// Store an authority and note it in the changeset
fn save_authority(ctx: &mut Context<'_>, authority: &NameAuthority) -> Result<()> {
    put_authority(ctx.store, authority)?;
    changeset::track_authority(ctx, &authority.name)
}

/// Binding by WRN
pub fn lookup_name(store: &dyn KvStore, wrn: &str) -> Result<Option<NameRecord>> {
    store.get_value(&name_key(wrn))
}

/// Every binding including tombstones, in WRN order
pub fn list_names(store: &dyn KvStore) -> Result<Vec<NameRecord>> {
    store.values_with_prefix(&keys::prefix(keys::NAMESERVICE, keys::nameservice::NAME))
}

/// WRNs currently bound to a record
pub fn names_for_record(store: &dyn KvStore, id: &str) -> Result<Vec<String>> {
    Ok(store.get_value(&record_names_key(id))?.unwrap_or_default())
}

fn update_record_names(store: &mut dyn KvStore, id: &str, wrn: &str, add: bool) -> Result<()> {
    if id.is_empty() {
        return Ok(());
    }
    let key = record_names_key(id);
    let mut names: Vec<String> = store.get_value(&key)?.unwrap_or_default();
    match (names.binary_search_by(|n| n.as_str().cmp(wrn)), add) {
        (Err(pos), true) => names.insert(pos, wrn.to_string()),
        (Ok(pos), false) => {
            names.remove(pos);
        }
        _ => return Ok(()),
    }
    if names.is_empty() {
        store.delete(&key)
    } else {
        store.put_value(&key, &names)
    }
}

/// Store a binding imported at genesis and index its target
pub(crate) fn import_name(store: &mut dyn KvStore, name_record: &NameRecord) -> Result<()> {
    let wrn: Wrn = name_record.wrn.parse()?;
    if get_authority(store, wrn.authority())?.is_none() {
        return Err(Error::InvalidInput(format!(
            "Name {} has no authority",
            name_record.wrn
        )));
    }
    store.put_value(&name_key(&name_record.wrn), name_record)?;
    update_record_names(store, &name_record.id, &name_record.wrn, true)
}

/// Reserve a top-level name for the signer
///
/// With name auctions enabled the authority is created under auction and
/// its owner is decided when the auction settles.
pub fn reserve_authority(ctx: &mut Context<'_>, name: &str, signer: &Signer) -> Result<NameAuthority> {
    let wrn: Wrn = format!("{}{}", WRN_SCHEME, name).parse()?;
    if wrn.authority() != name || !wrn.path().is_empty() || wrn.fragment().is_some() {
        return Err(Error::InvalidInput(format!("Invalid name: {}", name)));
    }
    if name.contains('.') {
        return Err(Error::InvalidInput(format!(
            "Invalid name {}: authorities are single-segment",
            name
        )));
    }

    if let Some(existing) = get_authority(ctx.store, name)? {
        if existing.status != AuthorityStatus::Expired {
            return Err(Error::Conflict(format!("Name {} already reserved", name)));
        }
    }

    let mut authority = NameAuthority {
        name: name.to_string(),
        owner_address: signer.address.clone(),
        owner_public_key: signer.public_key.clone(),
        height: ctx.height(),
        status: AuthorityStatus::Active,
        auction_id: None,
    };

    if ctx.params.name_auction.enabled {
        let params = ctx.params.name_auction.clone();
        let auction = auction::create_auction_for(
            ctx,
            &auction::AuctionTerms {
                commits_duration_secs: params.commits_duration_secs,
                reveals_duration_secs: params.reveals_duration_secs,
                commit_fee: params.commit_fee,
                reveal_fee: params.reveal_fee,
                minimum_bid: params.minimum_bid,
            },
            signer.derive_id(),
            bank::module_address(auction::AUCTION_OWNER_NAMESERVICE),
        )?;
        authority.owner_address = Address::default();
        authority.owner_public_key = Vec::new();
        authority.status = AuthorityStatus::UnderAuction;
        authority.auction_id = Some(auction.id);
    }

    save_authority(ctx, &authority)?;
    tracing::info!(name, status = ?authority.status, "Authority reserved");
    Ok(authority)
}

/// Parse a WRN and check the signer owns its active authority
fn check_access(store: &dyn KvStore, wrn: &str, signer: &Signer) -> Result<Wrn> {
    let parsed: Wrn = wrn.parse()?;
    let authority = get_authority(store, parsed.authority())?
        .ok_or_else(|| Error::NotFound("Name authority not found".into()))?;

    if authority.status != AuthorityStatus::Active {
        return Err(Error::Unauthorized(format!(
            "Name authority {} is not active",
            authority.name
        )));
    }
    if authority.owner_address != signer.address {
        return Err(Error::Unauthorized("Access denied".into()));
    }
    Ok(parsed)
}

fn bind(ctx: &mut Context<'_>, wrn: &str, id: &str) -> Result<NameRecord> {
    let height = ctx.height();
    let name_record = match lookup_name(ctx.store, wrn)? {
        Some(mut existing) => {
            update_record_names(ctx.store, &existing.id, wrn, false)?;
            existing.history.push(NameRecordEntry {
                id: existing.id.clone(),
                height: existing.height,
            });
            existing.id = id.to_string();
            existing.height = height;
            existing
        }
        None => NameRecord {
            wrn: wrn.to_string(),
            id: id.to_string(),
            height,
            history: Vec::new(),
        },
    };

    ctx.store.put_value(&name_key(wrn), &name_record)?;
    update_record_names(ctx.store, id, wrn, true)?;
    changeset::track_name(ctx, wrn)?;
    Ok(name_record)
}

/// Bind a WRN to a live record
pub fn set_name(ctx: &mut Context<'_>, wrn: &str, id: &str, signer: &Signer) -> Result<NameRecord> {
    check_access(ctx.store, wrn, signer)?;
    if !record::has_record(ctx.store, id)? {
        return Err(Error::NotFound(format!("Record {} not found", id)));
    }

    if let Some(existing) = lookup_name(ctx.store, wrn)? {
        if existing.id == id {
            return Ok(existing);
        }
    }

    let name_record = bind(ctx, wrn, id)?;
    tracing::info!(wrn, record_id = id, "Name set");
    Ok(name_record)
}

/// Tombstone a WRN binding
pub fn delete_name(ctx: &mut Context<'_>, wrn: &str, signer: &Signer) -> Result<NameRecord> {
    check_access(ctx.store, wrn, signer)?;
    match lookup_name(ctx.store, wrn)? {
        Some(existing) if !existing.id.is_empty() => {}
        _ => return Err(Error::NotFound(format!("Name {} not found", wrn))),
    }

    let name_record = bind(ctx, wrn, "")?;
    tracing::info!(wrn, "Name deleted");
    Ok(name_record)
}

/// Resolve a WRN to its live record
///
/// A version-range fragment selects, among the bindings sharing the base
/// name, the record with the highest `version` satisfying the range.
pub fn resolve(store: &dyn KvStore, wrn: &str) -> Result<Option<Record>> {
    let parsed: Wrn = wrn.parse()?;

    if !parsed.has_version_range() {
        return match lookup_name(store, wrn)? {
            Some(name_record) if !name_record.id.is_empty() => record::get_record(store, &name_record.id),
            _ => Ok(None),
        };
    }

    let Some(range) = parsed.fragment().and_then(VersionRange::parse) else {
        return Ok(None);
    };

    let base = parsed.base();
    let mut prefix = keys::prefix(keys::NAMESERVICE, keys::nameservice::NAME);
    prefix.extend_from_slice(base.as_bytes());

    let mut best: Option<(semver::Version, Record)> = None;
    for name_record in store.values_with_prefix::<NameRecord>(&prefix)? {
        if name_record.id.is_empty() {
            continue;
        }
        match name_record.wrn.parse::<Wrn>() {
            Ok(candidate) if candidate.base() == base => {}
            _ => continue,
        }
        let Some(record) = record::get_record(store, &name_record.id)? else {
            continue;
        };
        let Some(version) = record.version() else {
            continue;
        };
        if !range.matches(&version) {
            continue;
        }
        let better = match &best {
            Some((best_version, best_record)) => {
                version > *best_version || (version == *best_version && record.id < best_record.id)
            }
            None => true,
        };
        if better {
            best = Some((version, record));
        }
    }
    Ok(best.map(|(_, record)| record))
}

/// Hands a settled name auction's authority to the winner
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorityAuctionHooks;

impl AuctionHooks for AuthorityAuctionHooks {
    fn on_auction_completed(&self, ctx: &mut Context<'_>, auction: &Auction) -> Result<()> {
        let Some(name) = ctx.store.get_value::<String>(&auction_authority_key(&auction.id))? else {
            return Ok(());
        };
        let Some(mut authority) = get_authority(ctx.store, &name)? else {
            return Ok(());
        };

        match &auction.winner_address {
            Some(winner) => {
                let account = bank::get_account(ctx.store, winner)?;
                authority.owner_address = winner.clone();
                authority.owner_public_key = account.and_then(|a| a.public_key).unwrap_or_default();
                authority.status = AuthorityStatus::Active;
            }
            None => authority.status = AuthorityStatus::Expired,
        }
        authority.height = ctx.height();
        save_authority(ctx, &authority)?;

        tracing::info!(
            name = %authority.name,
            auction_id = %auction.id,
            status = ?authority.status,
            "Name auction settled"
        );
        Ok(())
    }
}
