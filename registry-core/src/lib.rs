//! Registry Core
//!
//! Deterministic state machine for a bonded content registry: signed records
//! funded by bonds, hierarchical `wrn://` names, rent-based expiry and
//! sealed-bid name auctions.
//!
//! # Architecture
//!
//! - **Key-value substrate**: every component reads and writes through [`KvStore`]
//! - **Transactional overlays**: each message runs in a [`CacheStore`], written back only on success
//! - **Block-time clock**: handlers see time only through the block header
//! - **Merkle app hash**: each commit hashes the full key space into a root with proofs
//!
//! # Invariants
//!
//! - The bond module holds exactly the sum of bond balances
//! - The auction module holds exactly the escrow of open bids
//! - Every bonded record references an existing bond and sits in its index
//! - Same blocks over the same genesis give the same app hash

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod app;
pub mod auction;
pub mod bank;
pub mod bond;
pub mod canonical;
pub mod changeset;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod genesis;
pub mod invariants;
pub mod keys;
pub mod merkle;
pub mod metrics;
pub mod msgs;
pub mod naming;
pub mod params;
pub mod record;
pub mod rent;
pub mod store;
pub mod types;
pub mod version;

// Re-exports
pub use app::{Query, RegistryApp, TxResult};
pub use config::Config;
pub use context::{Context, Signer};
pub use error::{Error, ErrorKind, Result};
pub use genesis::GenesisState;
pub use metrics::Metrics;
pub use msgs::{Msg, SignedTx};
pub use store::{CacheStore, CommitStore, KvStore, KvStoreExt, MemStore};
pub use types::{Address, BlockHeader, Coin, Coins};
