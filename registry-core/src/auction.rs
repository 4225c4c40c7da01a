//! Commit-reveal auctions
//!
//! Bidders first commit the content hash of a sealed bid, escrowing the
//! commit and reveal fees. During the reveal phase they disclose the bid,
//! which locks the bid amount. At the end of the reveal phase the highest
//! revealed bid wins and pays the second-highest revealed amount
//! (Vickrey pricing). Commit fees, unrevealed escrows and the winning price
//! are burned into the `auction_burn` account.
//!
//! All escrowed coins sit in the `auction` module account until settlement.

use crate::{
    bank, canonical,
    context::{Context, Signer},
    keys,
    store::{KvStore, KvStoreExt},
    types::{Address, Coin, Coins},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Module that owns name authority auctions
pub const AUCTION_OWNER_NAMESERVICE: &str = "nameservice";

/// Settled and cancelled auctions are pruned this long after the reveal phase
pub const RETENTION_HOURS: i64 = 24;

/// Auction lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionStatus {
    /// Accepting commits
    CommitPhase,
    /// Accepting reveals
    RevealPhase,
    /// Settled
    Completed,
    /// Cancelled by the owner during the commit phase
    Cancelled,
}

impl AuctionStatus {
    /// Settled or cancelled
    pub fn is_final(&self) -> bool {
        matches!(self, AuctionStatus::Completed | AuctionStatus::Cancelled)
    }
}

/// Bid lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BidStatus {
    /// Sealed hash committed
    Committed,
    /// Bid disclosed and amount locked
    Revealed,
    /// Winning bid
    Matched,
    /// Losing, unrevealed or refunded bid
    Lost,
}

impl BidStatus {
    /// Bid still holds escrow in the auction module
    pub fn is_open(&self) -> bool {
        matches!(self, BidStatus::Committed | BidStatus::Revealed)
    }
}

/// Auction state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auction {
    /// Derived from the creating transaction
    pub id: String,
    /// Lifecycle status
    pub status: AuctionStatus,
    /// Creator (module address for name auctions)
    pub owner_address: Address,
    /// Creation time
    pub create_time: DateTime<Utc>,
    /// End of the commit phase
    pub commits_end_time: DateTime<Utc>,
    /// End of the reveal phase
    pub reveals_end_time: DateTime<Utc>,
    /// Fee retained from every bid
    pub commit_fee: Coin,
    /// Fee refunded on reveal
    pub reveal_fee: Coin,
    /// Lowest acceptable bid
    pub minimum_bid: Coin,
    /// Winner once settled
    pub winner_address: Option<Address>,
    /// Winner's revealed amount
    pub winning_bid: Option<Coin>,
    /// Price the winner paid
    pub winning_price: Option<Coin>,
}

/// One bidder's bid in an auction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    /// Auction id
    pub auction_id: String,
    /// Bidder
    pub bidder_address: Address,
    /// Lifecycle status
    pub status: BidStatus,
    /// Content hash of the sealed bid
    pub commit_hash: String,
    /// Commit time
    pub commit_time: DateTime<Utc>,
    /// Commit fee at commit time
    pub commit_fee: Coin,
    /// Reveal fee at commit time
    pub reveal_fee: Coin,
    /// Escrowed fees
    pub auction_fee: Coins,
    /// Reveal time
    pub reveal_time: Option<DateTime<Utc>>,
    /// Revealed and locked amount
    pub bid_amount: Option<Coin>,
    /// Disclosed bid JSON
    pub reveal: Option<String>,
}

impl Bid {
    /// Coins this bid holds in the auction module
    pub fn escrow(&self) -> Coins {
        if !self.status.is_open() {
            return Coins::new();
        }
        match &self.bid_amount {
            Some(amount) => self.auction_fee.add(&amount.to_coins()),
            None => self.auction_fee.clone(),
        }
    }
}

/// Terms of a new auction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionTerms {
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

impl AuctionTerms {
    fn validate(&self) -> Result<()> {
        if self.commits_duration_secs <= 0 || self.reveals_duration_secs <= 0 {
            return Err(Error::InvalidInput("Auction durations must be positive".into()));
        }
        if !self.minimum_bid.is_positive() {
            return Err(Error::InvalidInput("Minimum bid must be positive".into()));
        }
        if self.commit_fee.amount.is_sign_negative() || self.reveal_fee.amount.is_sign_negative() {
            return Err(Error::InvalidInput("Auction fees must not be negative".into()));
        }
        Ok(())
    }
}

/// Reacts to settled auctions
pub trait AuctionHooks {
    /// Called once when an auction completes, winner or not
    fn on_auction_completed(&self, ctx: &mut Context<'_>, auction: &Auction) -> Result<()>;
}

/// Counts from one end-block pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuctionSummary {
    /// Moved to the reveal phase
    pub revealing: usize,
    /// Settled
    pub completed: usize,
    /// Pruned
    pub deleted: usize,
}

fn auction_key(id: &str) -> Vec<u8> {
    keys::key(keys::AUCTION, keys::auction::AUCTION, id.as_bytes())
}

fn owner_index_key(owner: &Address, id: &str) -> Vec<u8> {
    keys::index_key(
        keys::AUCTION,
        keys::auction::OWNER_AUCTIONS,
        owner.as_str().as_bytes(),
        id.as_bytes(),
    )
}

fn bid_key(auction_id: &str, bidder: &Address) -> Vec<u8> {
    keys::index_key(
        keys::AUCTION,
        keys::auction::BID,
        auction_id.as_bytes(),
        bidder.as_str().as_bytes(),
    )
}

/// Auction by id
pub fn get_auction(store: &dyn KvStore, id: &str) -> Result<Option<Auction>> {
    store.get_value(&auction_key(id))
}

fn require_auction(store: &dyn KvStore, id: &str) -> Result<Auction> {
    get_auction(store, id)?.ok_or_else(|| Error::NotFound(format!("Auction {} not found", id)))
}

/// Every auction, in id order
pub fn list_auctions(store: &dyn KvStore) -> Result<Vec<Auction>> {
    store.values_with_prefix(&keys::prefix(keys::AUCTION, keys::auction::AUCTION))
}

/// Auctions created by an address
pub fn auctions_by_owner(store: &dyn KvStore, owner: &Address) -> Result<Vec<Auction>> {
    let prefix = keys::index_prefix(
        keys::AUCTION,
        keys::auction::OWNER_AUCTIONS,
        owner.as_str().as_bytes(),
    );
    store
        .keys_with_prefix(&prefix)?
        .into_iter()
        .map(|id| {
            let id = String::from_utf8(id)
                .map_err(|e| Error::Internal(format!("Malformed auction index key: {}", e)))?;
            require_auction(store, &id)
        })
        .collect()
}

/// A bidder's bid
pub fn get_bid(store: &dyn KvStore, auction_id: &str, bidder: &Address) -> Result<Option<Bid>> {
    store.get_value(&bid_key(auction_id, bidder))
}

/// Every bid in an auction, in bidder order
pub fn get_bids(store: &dyn KvStore, auction_id: &str) -> Result<Vec<Bid>> {
    store.values_with_prefix(&keys::index_prefix(
        keys::AUCTION,
        keys::auction::BID,
        auction_id.as_bytes(),
    ))
}

/// Store an auction and index it under its owner
pub(crate) fn save_auction(store: &mut dyn KvStore, auction: &Auction) -> Result<()> {
    store.put_value(&auction_key(&auction.id), auction)?;
    store.set(&owner_index_key(&auction.owner_address, &auction.id), &[])
}

/// Store a bid
pub(crate) fn save_bid(store: &mut dyn KvStore, bid: &Bid) -> Result<()> {
    store.put_value(&bid_key(&bid.auction_id, &bid.bidder_address), bid)
}

fn remove_auction(store: &mut dyn KvStore, auction: &Auction) -> Result<()> {
    for bid in get_bids(store, &auction.id)? {
        store.delete(&bid_key(&auction.id, &bid.bidder_address))?;
    }
    store.delete(&owner_index_key(&auction.owner_address, &auction.id))?;
    store.delete(&auction_key(&auction.id))
}

fn pay_out(store: &mut dyn KvStore, to: &Address, coins: &Coins) -> Result<()> {
    if coins.is_zero() {
        return Ok(());
    }
    bank::send_from_module(store, bank::AUCTION_MODULE, to, coins)
}

fn burn(store: &mut dyn KvStore, coins: &Coins) -> Result<()> {
    if coins.is_zero() {
        return Ok(());
    }
    bank::send_between_modules(store, bank::AUCTION_MODULE, bank::AUCTION_BURN_MODULE, coins)
}

/// Open an auction with an explicit id and owner
pub(crate) fn create_auction_for(
    ctx: &mut Context<'_>,
    terms: &AuctionTerms,
    id: String,
    owner: Address,
) -> Result<Auction> {
    terms.validate()?;
    if get_auction(ctx.store, &id)?.is_some() {
        return Err(Error::Conflict(format!("Auction {} already exists", id)));
    }

    let now = ctx.now();
    let commits_end_time = now + Duration::seconds(terms.commits_duration_secs);
    let auction = Auction {
        id,
        status: AuctionStatus::CommitPhase,
        owner_address: owner,
        create_time: now,
        commits_end_time,
        reveals_end_time: commits_end_time + Duration::seconds(terms.reveals_duration_secs),
        commit_fee: terms.commit_fee.clone(),
        reveal_fee: terms.reveal_fee.clone(),
        minimum_bid: terms.minimum_bid.clone(),
        winner_address: None,
        winning_bid: None,
        winning_price: None,
    };
    save_auction(ctx.store, &auction)?;

    tracing::info!(
        auction_id = %auction.id,
        owner = %auction.owner_address,
        commits_end = %auction.commits_end_time,
        reveals_end = %auction.reveals_end_time,
        "Auction created"
    );
    Ok(auction)
}

/// Open an auction owned by the signer
pub fn create_auction(ctx: &mut Context<'_>, terms: &AuctionTerms, signer: &Signer) -> Result<Auction> {
    create_auction_for(ctx, terms, signer.derive_id(), signer.address.clone())
}

/// Commit a sealed bid, replacing any earlier commit by the same bidder
pub fn commit_bid(
    ctx: &mut Context<'_>,
    auction_id: &str,
    commit_hash: &str,
    auction_fee: &Coins,
    signer: &Signer,
) -> Result<Bid> {
    let auction = require_auction(ctx.store, auction_id)?;
    if auction.status != AuctionStatus::CommitPhase || ctx.now() >= auction.commits_end_time {
        return Err(Error::InvalidInput(format!(
            "Auction {} is not in commit phase",
            auction_id
        )));
    }
    if commit_hash.is_empty() {
        return Err(Error::InvalidInput("Commit hash is required".into()));
    }

    let escrow = auction.commit_fee.to_coins().add(&auction.reveal_fee.to_coins());
    if !auction_fee.is_all_gte(&escrow) {
        return Err(Error::InsufficientFunds(format!(
            "Auction fee {} below commit and reveal fees {}",
            auction_fee, escrow
        )));
    }

    if let Some(previous) = get_bid(ctx.store, auction_id, &signer.address)? {
        pay_out(ctx.store, &signer.address, &previous.escrow())?;
    }
    if !escrow.is_zero() {
        bank::send_to_module(ctx.store, &signer.address, bank::AUCTION_MODULE, &escrow)?;
    }

    let bid = Bid {
        auction_id: auction_id.to_string(),
        bidder_address: signer.address.clone(),
        status: BidStatus::Committed,
        commit_hash: commit_hash.to_string(),
        commit_time: ctx.now(),
        commit_fee: auction.commit_fee.clone(),
        reveal_fee: auction.reveal_fee.clone(),
        auction_fee: escrow,
        reveal_time: None,
        bid_amount: None,
        reveal: None,
    };
    save_bid(ctx.store, &bid)?;

    tracing::info!(auction_id, bidder = %signer.address, "Bid committed");
    Ok(bid)
}

/// Sealed bid contents
///
/// The commit hash is the content id of this JSON object; `noise` makes
/// equal bids hash differently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidReveal {
    /// Chain the bid is valid on
    pub chain_id: String,
    /// Auction the bid is for
    pub auction_id: String,
    /// Bidder
    pub bidder_address: String,
    /// Bid, e.g. `10wire`
    pub bid_amount: String,
    /// Random salt
    #[serde(default)]
    pub noise: String,
}

impl BidReveal {
    /// JSON value whose content id is the commit hash
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Commit hash of this reveal
    pub fn commit_hash(&self) -> Result<String> {
        canonical::content_id(&self.to_value()?)
    }

    /// Hex string submitted in a reveal
    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(canonical::to_canonical_bytes(&self.to_value()?)?))
    }
}

/// Disclose a committed bid and lock its amount
pub fn reveal_bid(ctx: &mut Context<'_>, auction_id: &str, reveal: &str, signer: &Signer) -> Result<Bid> {
    let auction = require_auction(ctx.store, auction_id)?;
    if auction.status != AuctionStatus::RevealPhase || ctx.now() >= auction.reveals_end_time {
        return Err(Error::InvalidInput(format!(
            "Auction {} is not in reveal phase",
            auction_id
        )));
    }

    let mut bid = get_bid(ctx.store, auction_id, &signer.address)?
        .ok_or_else(|| Error::NotFound(format!("Bid not found for {}", signer.address)))?;
    if bid.status != BidStatus::Committed {
        return Err(Error::Conflict("Bid already revealed".into()));
    }

    let bytes = hex::decode(reveal)
        .map_err(|e| Error::InvalidInput(format!("Invalid reveal encoding: {}", e)))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidInput(format!("Invalid reveal JSON: {}", e)))?;
    if canonical::content_id(&value)? != bid.commit_hash {
        return Err(Error::InvalidInput("Commit hash mismatch".into()));
    }
    let sealed: BidReveal = serde_json::from_value(value.clone())
        .map_err(|e| Error::InvalidInput(format!("Invalid reveal: {}", e)))?;

    if sealed.chain_id != ctx.header.chain_id {
        return Err(Error::InvalidInput("Invalid reveal chainId".into()));
    }
    if sealed.auction_id != auction_id {
        return Err(Error::InvalidInput("Invalid reveal auctionId".into()));
    }
    if sealed.bidder_address != signer.address.as_str() {
        return Err(Error::InvalidInput("Invalid reveal bidderAddress".into()));
    }
    let amount: Coin = sealed.bid_amount.parse()?;
    if amount.denom != auction.minimum_bid.denom || amount.amount < auction.minimum_bid.amount {
        return Err(Error::InvalidInput(format!(
            "Bid {} is lower than minimum bid {}",
            amount, auction.minimum_bid
        )));
    }

    bank::send_to_module(ctx.store, &signer.address, bank::AUCTION_MODULE, &amount.to_coins())?;

    bid.status = BidStatus::Revealed;
    bid.reveal_time = Some(ctx.now());
    bid.bid_amount = Some(amount);
    bid.reveal = Some(canonical::canonicalize(&value).to_string());
    save_bid(ctx.store, &bid)?;

    tracing::info!(auction_id, bidder = %signer.address, "Bid revealed");
    Ok(bid)
}

/// Cancel an auction during its commit phase, refunding every bid
pub fn cancel_auction(ctx: &mut Context<'_>, auction_id: &str, signer: &Signer) -> Result<Auction> {
    let mut auction = require_auction(ctx.store, auction_id)?;
    if auction.owner_address != signer.address {
        return Err(Error::Unauthorized("Auction owner mismatch".into()));
    }
    if auction.status != AuctionStatus::CommitPhase {
        return Err(Error::Conflict(format!(
            "Auction {} is not in commit phase",
            auction_id
        )));
    }

    for mut bid in get_bids(ctx.store, auction_id)? {
        pay_out(ctx.store, &bid.bidder_address, &bid.escrow())?;
        bid.status = BidStatus::Lost;
        save_bid(ctx.store, &bid)?;
    }

    auction.status = AuctionStatus::Cancelled;
    save_auction(ctx.store, &auction)?;

    tracing::info!(auction_id, "Auction cancelled");
    Ok(auction)
}

/// Highest amount first; ties go to the earliest commit, then lowest address
fn rank(a: &Bid, b: &Bid) -> Ordering {
    let amount = |bid: &Bid| bid.bid_amount.as_ref().map(|c| c.amount).unwrap_or_default();
    amount(b)
        .cmp(&amount(a))
        .then_with(|| a.commit_time.cmp(&b.commit_time))
        .then_with(|| a.bidder_address.cmp(&b.bidder_address))
}

fn settle(ctx: &mut Context<'_>, auction: &mut Auction) -> Result<()> {
    let bids = get_bids(ctx.store, &auction.id)?;
    let mut revealed: Vec<Bid> = bids
        .iter()
        .filter(|bid| bid.status == BidStatus::Revealed)
        .cloned()
        .collect();
    revealed.sort_by(rank);

    let winner = revealed.first().map(|bid| bid.bidder_address.clone());
    let price = match (revealed.first(), revealed.get(1)) {
        (Some(_), Some(second)) => second.bid_amount.clone(),
        (Some(first), None) => first.bid_amount.clone(),
        _ => None,
    };

    for mut bid in bids {
        match bid.status {
            BidStatus::Committed => {
                burn(ctx.store, &bid.escrow())?;
                bid.status = BidStatus::Lost;
            }
            BidStatus::Revealed => {
                let locked = bid.bid_amount.clone().map(|c| c.to_coins()).unwrap_or_default();
                let mut refund = bid.reveal_fee.to_coins().add(&locked);
                let is_winner = winner.as_ref() == Some(&bid.bidder_address);
                if is_winner {
                    if let Some(price) = &price {
                        refund = refund.checked_sub(&price.to_coins()).ok_or_else(|| {
                            Error::Internal(format!("Winning price {} exceeds escrow", price))
                        })?;
                        burn(ctx.store, &price.to_coins())?;
                    }
                }
                burn(ctx.store, &bid.commit_fee.to_coins())?;
                pay_out(ctx.store, &bid.bidder_address, &refund)?;
                bid.status = if is_winner {
                    BidStatus::Matched
                } else {
                    BidStatus::Lost
                };
            }
            BidStatus::Matched | BidStatus::Lost => continue,
        }
        save_bid(ctx.store, &bid)?;
    }

    auction.winning_bid = revealed.first().and_then(|bid| bid.bid_amount.clone());
    auction.winner_address = winner;
    auction.winning_price = price;
    auction.status = AuctionStatus::Completed;
    save_auction(ctx.store, auction)?;

    tracing::info!(
        auction_id = %auction.id,
        winner = ?auction.winner_address.as_ref().map(Address::as_str),
        price = ?auction.winning_price.as_ref().map(ToString::to_string),
        revealed = revealed.len(),
        "Auction completed"
    );
    Ok(())
}

/// End-block pass over every auction
///
/// Moves auctions past their commit deadline to the reveal phase, settles
/// auctions past their reveal deadline and prunes final auctions after the
/// retention period.
pub fn process_auctions(ctx: &mut Context<'_>, hooks: &[&dyn AuctionHooks]) -> Result<AuctionSummary> {
    let now = ctx.now();
    let mut summary = AuctionSummary::default();

    for mut auction in list_auctions(ctx.store)? {
        if auction.status.is_final() {
            if now >= auction.reveals_end_time + Duration::hours(RETENTION_HOURS) {
                remove_auction(ctx.store, &auction)?;
                summary.deleted += 1;
                tracing::debug!(auction_id = %auction.id, "Auction pruned");
            }
            continue;
        }

        if auction.status == AuctionStatus::CommitPhase && now >= auction.commits_end_time {
            auction.status = AuctionStatus::RevealPhase;
            save_auction(ctx.store, &auction)?;
            summary.revealing += 1;
            tracing::info!(auction_id = %auction.id, "Auction reveal phase started");
        }

        if auction.status == AuctionStatus::RevealPhase && now >= auction.reveals_end_time {
            settle(ctx, &mut auction)?;
            for hook in hooks {
                hook.on_auction_completed(ctx, &auction)?;
            }
            summary.completed += 1;
        }
    }

    Ok(summary)
}
