//! Block-driven application
//!
//! [`RegistryApp`] owns the committed store and drives the block lifecycle:
//! `begin_block`, any number of `deliver_tx`, `end_block`, `commit`.
//!
//! Every transaction is authenticated (signature, account number and
//! sequence) in its own overlay, which is written even when the message then
//! fails, so a rejected transaction still consumes its sequence. The message
//! itself runs in a second overlay that is written back only on success.
//!
//! Both overlays flush into a block overlay. Nothing reaches the committed
//! store until `commit`, which writes the block's changes and its commit
//! record in one batch. Queries and proofs read committed state only.
//!
//! # Example
//!
//! ```no_run
//! use registry_core::{Config, GenesisState, MemStore, Metrics, RegistryApp};
//!
//! fn main() -> registry_core::Result<()> {
//!     let metrics = Metrics::new().map_err(|e| registry_core::Error::Internal(e.to_string()))?;
//!     let mut app = RegistryApp::new(MemStore::new(), Config::default(), metrics)?;
//!     let genesis = GenesisState::from_file("genesis.json")?;
//!     app.init_genesis(&genesis)?;
//!     Ok(())
//! }
//! ```

use crate::{
    auction::{self, AuctionSummary, AuctionTerms},
    bank, bond, changeset,
    context::{Context, Signer},
    genesis::{self, GenesisState},
    invariants, keys,
    merkle::{StateProof, StateTree},
    metrics::Metrics,
    msgs::{Msg, SignedTx},
    naming,
    params::Params,
    record::{self, RecordQuery},
    rent::{self, RecordBondUsage},
    store::{CacheStore, CommitStore, KvStore, KvStoreExt, PendingWrites},
    types::{Address, BlockHeader},
    Config, Error, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

const CHAIN_ID_KEY: u8 = 0x01;

fn chain_id_key() -> Vec<u8> {
    keys::key(keys::PARAMS, CHAIN_ID_KEY, b"")
}

/// Outcome of one delivered transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
    /// 0 on success, otherwise the error kind code
    pub code: u32,
    /// Human-readable outcome
    pub log: String,
    /// Handler result on success
    pub data: Option<Value>,
}

impl TxResult {
    /// Transaction applied
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    fn from_error(err: &Error) -> Self {
        Self {
            code: err.kind().code(),
            log: err.to_string(),
            data: None,
        }
    }
}

/// What the end-block passes did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndBlockSummary {
    /// Records renewed or expired
    pub sweep: rent::SweepSummary,
    /// Auction phase transitions
    pub auctions: AuctionSummary,
}

/// Committed height and app hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitInfo {
    /// Height
    pub height: u64,
    /// Merkle root over the committed state
    pub app_hash: [u8; 32],
}

/// Application status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppInfo {
    /// Chain identifier, once initialised
    pub chain_id: Option<String>,
    /// Last committed height
    pub last_block_height: u64,
    /// Hex app hash of the last commit
    pub last_block_app_hash: String,
}

/// Everything one block produced
#[derive(Debug, Clone, PartialEq)]
pub struct BlockResult {
    /// Per-transaction results, in order
    pub tx_results: Vec<TxResult>,
    /// End-block passes
    pub end_block: EndBlockSummary,
    /// Commit
    pub commit: CommitInfo,
}

/// Read-only queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// Chain parameters
    Params,
    /// Account by address
    Account {
        /// Address
        address: Address,
    },
    /// Module account balance
    ModuleBalance {
        /// Module name
        module: String,
    },
    /// Live record by id
    Record {
        /// Record id
        id: String,
    },
    /// Records matching attributes
    Records {
        /// Predicate
        query: RecordQuery,
    },
    /// Records funded by a bond
    RecordsByBond {
        /// Bond id
        bond_id: String,
    },
    /// Bond by id
    Bond {
        /// Bond id
        id: String,
    },
    /// Every bond
    Bonds,
    /// Bonds owned by an address
    BondsByOwner {
        /// Owner address
        owner: Address,
    },
    /// Authority by name
    Authority {
        /// Bare name
        name: String,
    },
    /// Every authority
    Authorities,
    /// Binding with history
    LookupName {
        /// Full WRN
        wrn: String,
    },
    /// Every binding
    Names,
    /// Resolve a WRN to a record
    Resolve {
        /// Full WRN, optionally with a version range
        wrn: String,
    },
    /// WRNs bound to a record
    NamesForRecord {
        /// Record id
        id: String,
    },
    /// Auction by id
    Auction {
        /// Auction id
        id: String,
    },
    /// Every auction
    Auctions,
    /// Auctions created by an address
    AuctionsByOwner {
        /// Owner address
        owner: Address,
    },
    /// One bidder's bid
    Bid {
        /// Auction id
        auction_id: String,
        /// Bidder address
        bidder: Address,
    },
    /// Every bid in an auction
    Bids {
        /// Auction id
        auction_id: String,
    },
    /// Changes recorded at a height
    Changeset {
        /// Block height
        height: u64,
    },
}

/// Registry state machine over a committed store
pub struct RegistryApp<S: CommitStore> {
    store: S,
    config: Config,
    metrics: Metrics,
    chain_id: Option<String>,
    params: Params,
    header: Option<BlockHeader>,
    pending: PendingWrites,
    last_commit: Option<CommitInfo>,
}

impl<S: CommitStore> std::fmt::Debug for RegistryApp<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryApp")
            .field("chain_id", &self.chain_id)
            .field("header", &self.header)
            .field("pending", &self.pending.len())
            .field("last_commit", &self.last_commit)
            .finish()
    }
}

impl<S: CommitStore> RegistryApp<S> {
    /// Open the application over a (possibly populated) store
    pub fn new(store: S, config: Config, metrics: Metrics) -> Result<Self> {
        let chain_id: Option<String> = store.get_value(&chain_id_key())?;
        let params = Params::load(&store)?;
        let last_commit = store
            .last_commit()?
            .map(|(height, app_hash)| CommitInfo { height, app_hash });

        if let Some(commit) = &last_commit {
            tracing::info!(
                chain_id = ?chain_id,
                height = commit.height,
                app_hash = %hex::encode(commit.app_hash),
                "Registry state loaded"
            );
        }

        Ok(Self {
            store,
            config,
            metrics,
            chain_id,
            params,
            header: None,
            pending: PendingWrites::new(),
            last_commit,
        })
    }

    /// Status of the last commit
    pub fn info(&self) -> AppInfo {
        AppInfo {
            chain_id: self.chain_id.clone(),
            last_block_height: self.last_commit.map_or(0, |c| c.height),
            last_block_app_hash: hex::encode(self.last_commit.map_or([0u8; 32], |c| c.app_hash)),
        }
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Committed store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Import genesis into an empty store and commit it as height 0
    pub fn init_genesis(&mut self, genesis: &GenesisState) -> Result<CommitInfo> {
        if self.chain_id.is_some() || self.last_commit.is_some() {
            return Err(Error::Conflict("Chain already initialised".into()));
        }

        let mut cache = CacheStore::new(&mut self.store);
        genesis::import(&mut cache, genesis)?;
        cache.put_value(&chain_id_key(), &genesis.chain_id)?;
        let app_hash = StateTree::from_store(&cache)?.root();
        let writes = cache.into_writes();
        let commit = self.persist_commit(0, writes, app_hash)?;

        self.chain_id = Some(genesis.chain_id.clone());
        self.params = Params::load(&self.store)?;

        tracing::info!(
            chain_id = %genesis.chain_id,
            app_hash = %hex::encode(commit.app_hash),
            "Chain initialised"
        );
        Ok(commit)
    }

    /// Start the next block
    pub fn begin_block(&mut self, header: BlockHeader) -> Result<()> {
        let chain_id = self
            .chain_id
            .as_deref()
            .ok_or_else(|| Error::Conflict("Chain not initialised".into()))?;
        if header.chain_id != chain_id {
            return Err(Error::InvalidInput(format!(
                "Block for chain {} on chain {}",
                header.chain_id, chain_id
            )));
        }
        if let Some(open) = &self.header {
            return Err(Error::Conflict(format!("Block {} still open", open.height)));
        }
        let expected = self.last_commit.map_or(0, |c| c.height) + 1;
        if header.height != expected {
            return Err(Error::InvalidInput(format!(
                "Expected height {}, got {}",
                expected, header.height
            )));
        }

        self.params = Params::load(&self.store)?;
        self.pending.clear();
        tracing::debug!(height = header.height, time = %header.time, "Block started");
        self.header = Some(header);
        Ok(())
    }

    fn open_header(&self) -> Result<BlockHeader> {
        self.header
            .clone()
            .ok_or_else(|| Error::Conflict("No block in progress".into()))
    }

    /// Authenticate and apply one transaction
    pub fn deliver_tx(&mut self, tx: &SignedTx) -> TxResult {
        let started = Instant::now();
        let msg_name = tx.msg.name();

        match self.try_deliver(tx) {
            Ok(data) => {
                self.metrics.record_delivered(started.elapsed().as_secs_f64());
                tracing::debug!(msg = msg_name, sequence = tx.sequence, "Transaction delivered");
                TxResult {
                    code: 0,
                    log: format!("{} ok", msg_name),
                    data: Some(data),
                }
            }
            Err(err) => {
                self.metrics.record_failed(err.kind(), started.elapsed().as_secs_f64());
                tracing::warn!(
                    msg = msg_name,
                    sender = %tx.signature.address(),
                    code = err.kind().code(),
                    error = %err,
                    "Transaction rejected"
                );
                TxResult::from_error(&err)
            }
        }
    }

    fn try_deliver(&mut self, tx: &SignedTx) -> Result<Value> {
        let header = self.open_header()?;
        if !tx.verify(&header.chain_id)? {
            return Err(Error::Unauthorized("Invalid transaction signature".into()));
        }

        let mut block = CacheStore::with_writes(&mut self.store, std::mem::take(&mut self.pending));
        let result = deliver_in(&mut block, header, self.params.clone(), tx);
        self.pending = block.into_writes();
        result
    }

    /// Run the expiry sweep and the auction pass
    pub fn end_block(&mut self) -> Result<EndBlockSummary> {
        let header = self.open_header()?;
        let height = header.height;

        let mut block = CacheStore::with_writes(&mut self.store, std::mem::take(&mut self.pending));
        let result = end_block_in(&mut block, header, self.params.clone());
        self.pending = block.into_writes();
        let summary = result?;

        self.metrics
            .record_sweep(summary.sweep.renewed.len(), summary.sweep.expired.len());
        self.metrics.record_auctions_completed(summary.auctions.completed);
        tracing::debug!(height, ?summary, "Block ended");
        Ok(summary)
    }

    /// Check invariants when due, then hash and persist the state
    ///
    /// An invariant violation is returned as a fatal error and nothing is
    /// committed.
    pub fn commit(&mut self) -> Result<CommitInfo> {
        let header = self.open_header()?;

        let period = self.config.invariant_check_period;
        let check_due = period > 0 && header.height % period == 0;
        let block = CacheStore::with_writes(&mut self.store, std::mem::take(&mut self.pending));
        let sealed = seal_block(&block, check_due);
        let writes = block.into_writes();
        let app_hash = match sealed {
            Ok(app_hash) => app_hash,
            Err(err) => {
                self.pending = writes;
                return Err(err);
            }
        };

        let commit = self.persist_commit(header.height, writes, app_hash)?;
        self.header = None;

        tracing::info!(
            height = commit.height,
            app_hash = %hex::encode(commit.app_hash),
            "Block committed"
        );
        Ok(commit)
    }

    fn persist_commit(&mut self, height: u64, writes: PendingWrites, app_hash: [u8; 32]) -> Result<CommitInfo> {
        self.store
            .commit_block(writes.into_iter().collect(), height, app_hash)?;
        self.metrics.record_commit(height);

        let commit = CommitInfo { height, app_hash };
        self.last_commit = Some(commit);
        Ok(commit)
    }

    /// Run a whole block
    pub fn apply_block(&mut self, header: BlockHeader, txs: &[SignedTx]) -> Result<BlockResult> {
        self.begin_block(header)?;
        let tx_results = txs.iter().map(|tx| self.deliver_tx(tx)).collect();
        let end_block = self.end_block()?;
        let commit = self.commit()?;
        Ok(BlockResult {
            tx_results,
            end_block,
            commit,
        })
    }

    /// Answer a read-only query against committed state as JSON
    pub fn query(&self, query: &Query) -> Result<Value> {
        let store: &dyn KvStore = &self.store;
        let value = match query {
            Query::Params => serde_json::to_value(Params::load(store)?)?,
            Query::Account { address } => serde_json::to_value(bank::get_account(store, address)?)?,
            Query::ModuleBalance { module } => {
                serde_json::to_value(bank::module_balance(store, module)?)?
            }
            Query::Record { id } => match record::get_record(store, id)? {
                Some(rec) => {
                    let mut value = serde_json::to_value(&rec)?;
                    value["names"] = serde_json::to_value(naming::names_for_record(store, id)?)?;
                    value
                }
                None => Value::Null,
            },
            Query::Records { query } => serde_json::to_value(record::match_records(store, query)?)?,
            Query::RecordsByBond { bond_id } => {
                serde_json::to_value(record::records_by_bond(store, bond_id)?)?
            }
            Query::Bond { id } => serde_json::to_value(bond::get_bond(store, id)?)?,
            Query::Bonds => serde_json::to_value(bond::list_bonds(store)?)?,
            Query::BondsByOwner { owner } => serde_json::to_value(bond::bonds_by_owner(store, owner)?)?,
            Query::Authority { name } => serde_json::to_value(naming::get_authority(store, name)?)?,
            Query::Authorities => serde_json::to_value(naming::list_authorities(store)?)?,
            Query::LookupName { wrn } => serde_json::to_value(naming::lookup_name(store, wrn)?)?,
            Query::Names => serde_json::to_value(naming::list_names(store)?)?,
            Query::Resolve { wrn } => serde_json::to_value(naming::resolve(store, wrn)?)?,
            Query::NamesForRecord { id } => {
                serde_json::to_value(naming::names_for_record(store, id)?)?
            }
            Query::Auction { id } => serde_json::to_value(auction::get_auction(store, id)?)?,
            Query::Auctions => serde_json::to_value(auction::list_auctions(store)?)?,
            Query::AuctionsByOwner { owner } => {
                serde_json::to_value(auction::auctions_by_owner(store, owner)?)?
            }
            Query::Bid { auction_id, bidder } => {
                serde_json::to_value(auction::get_bid(store, auction_id, bidder)?)?
            }
            Query::Bids { auction_id } => serde_json::to_value(auction::get_bids(store, auction_id)?)?,
            Query::Changeset { height } => {
                serde_json::to_value(changeset::get_changeset(store, *height)?)?
            }
        };
        Ok(value)
    }

    /// Proof for `key` against the last committed app hash
    pub fn prove(&self, key: &[u8]) -> Result<(StateProof, CommitInfo)> {
        if let Some(open) = &self.header {
            return Err(Error::Conflict(format!("Block {} in progress", open.height)));
        }
        let commit = self
            .last_commit
            .ok_or_else(|| Error::NotFound("Nothing committed yet".into()))?;
        Ok((StateTree::from_store(&self.store)?.prove(key), commit))
    }

    /// Snapshot committed state as a genesis document
    pub fn export_genesis(&self) -> Result<GenesisState> {
        let chain_id = self
            .chain_id
            .clone()
            .ok_or_else(|| Error::Conflict("Chain not initialised".into()))?;
        let time = self.header.as_ref().map_or_else(chrono::Utc::now, |h| h.time);
        genesis::export(&self.store, chain_id, time)
    }
}

/// Authenticate `tx` then run its message, both over the block overlay
fn deliver_in(block: &mut dyn KvStore, header: BlockHeader, params: Params, tx: &SignedTx) -> Result<Value> {
    let signer = {
        let mut cache = CacheStore::new(&mut *block);
        let signer = authenticate(&mut cache, tx)?;
        cache.write()?;
        signer
    };

    let mut cache = CacheStore::new(block);
    let data = {
        let mut ctx = Context::new(&mut cache, header, params);
        dispatch(&mut ctx, &tx.msg, &signer)?
    };
    cache.write()?;
    Ok(data)
}

fn end_block_in(block: &mut dyn KvStore, header: BlockHeader, params: Params) -> Result<EndBlockSummary> {
    let mut cache = CacheStore::new(block);
    let summary = {
        let mut ctx = Context::new(&mut cache, header, params);
        let sweep = rent::process_expiry_queue(&mut ctx)?;
        let hooks = naming::AuthorityAuctionHooks;
        let auctions = auction::process_auctions(&mut ctx, &[&hooks])?;
        EndBlockSummary { sweep, auctions }
    };
    cache.write()?;
    Ok(summary)
}

/// Invariant check (when due) and app hash of the block's final state
fn seal_block(block: &dyn KvStore, check_invariants: bool) -> Result<[u8; 32]> {
    if check_invariants {
        invariants::check_all(block)?;
    }
    Ok(StateTree::from_store(block)?.root())
}

/// Check account number and sequence, record the key, bump the sequence
fn authenticate(store: &mut dyn KvStore, tx: &SignedTx) -> Result<Signer> {
    let address = tx.signature.address();
    let mut account = bank::get_account(store, &address)?
        .ok_or_else(|| Error::Unauthorized(format!("Unknown account {}", address)))?;

    if account.account_number != tx.account_number {
        return Err(Error::Unauthorized(format!(
            "Account number mismatch: expected {}, got {}",
            account.account_number, tx.account_number
        )));
    }
    if account.sequence != tx.sequence {
        return Err(Error::Unauthorized(format!(
            "Invalid sequence: expected {}, got {}",
            account.sequence, tx.sequence
        )));
    }

    if account.public_key.is_none() {
        account.public_key = Some(tx.signature.public_key.clone());
    }
    account.sequence += 1;
    bank::set_account(store, &account)?;

    Ok(Signer::new(
        tx.signature.public_key.clone(),
        tx.account_number,
        tx.sequence,
    ))
}

/// Route a message to its handler
fn dispatch(ctx: &mut Context<'_>, msg: &Msg, signer: &Signer) -> Result<Value> {
    let value = match msg {
        Msg::SetRecord { payload, bond_id } => {
            serde_json::to_value(record::set_record(ctx, payload, bond_id.as_deref(), signer)?)?
        }
        Msg::RenewRecord { record_id } => {
            serde_json::to_value(record::renew_record(ctx, record_id, signer)?)?
        }
        Msg::AssociateBond { record_id, bond_id } => {
            serde_json::to_value(rent::associate_bond(ctx, record_id, bond_id, signer)?)?
        }
        Msg::DissociateBond { record_id } => {
            serde_json::to_value(rent::dissociate_bond(ctx, record_id, signer)?)?
        }
        Msg::DissociateRecords { bond_id } => {
            serde_json::to_value(rent::dissociate_records(ctx, bond_id, signer)?)?
        }
        Msg::ReassociateRecords {
            old_bond_id,
            new_bond_id,
        } => serde_json::to_value(rent::reassociate_records(
            ctx,
            old_bond_id,
            new_bond_id,
            signer,
        )?)?,
        Msg::CreateBond { coins } => serde_json::to_value(bond::create_bond(ctx, coins, signer)?)?,
        Msg::RefillBond { id, coins } => {
            serde_json::to_value(bond::refill_bond(ctx, id, coins, signer)?)?
        }
        Msg::WithdrawBond { id, coins } => {
            serde_json::to_value(bond::withdraw_bond(ctx, id, coins, signer)?)?
        }
        Msg::CancelBond { id } => {
            serde_json::to_value(bond::cancel_bond(ctx, id, signer, &[&RecordBondUsage])?)?
        }
        Msg::ReserveAuthority { name } => {
            serde_json::to_value(naming::reserve_authority(ctx, name, signer)?)?
        }
        Msg::SetName { wrn, id } => serde_json::to_value(naming::set_name(ctx, wrn, id, signer)?)?,
        Msg::DeleteName { wrn } => serde_json::to_value(naming::delete_name(ctx, wrn, signer)?)?,
        Msg::CreateAuction {
            commits_duration_secs,
            reveals_duration_secs,
            commit_fee,
            reveal_fee,
            minimum_bid,
        } => {
            let terms = AuctionTerms {
                commits_duration_secs: *commits_duration_secs,
                reveals_duration_secs: *reveals_duration_secs,
                commit_fee: commit_fee.clone(),
                reveal_fee: reveal_fee.clone(),
                minimum_bid: minimum_bid.clone(),
            };
            serde_json::to_value(auction::create_auction(ctx, &terms, signer)?)?
        }
        Msg::CommitBid {
            auction_id,
            commit_hash,
            auction_fee,
        } => serde_json::to_value(auction::commit_bid(
            ctx,
            auction_id,
            commit_hash,
            auction_fee,
            signer,
        )?)?,
        Msg::RevealBid { auction_id, reveal } => {
            serde_json::to_value(auction::reveal_bid(ctx, auction_id, reveal, signer)?)?
        }
        Msg::CancelAuction { auction_id } => {
            serde_json::to_value(auction::cancel_auction(ctx, auction_id, signer)?)?
        }
    };
    Ok(value)
}
