//! Registry Node
//!
//! Process bootstrap for the registry state machine: configuration,
//! store selection, genesis import and replay of a block feed.
//!
//! # Flow
//!
//! ```text
//! genesis.json ──► Node::bootstrap ──► RegistryApp (height 0)
//! blocks.jsonl ──► BlockFeed ──► Node::replay ──► begin / deliver / end / commit
//! ```
//!
//! Rejected transactions are logged and counted. An invariant violation at
//! commit stops the replay and the binary exits non-zero.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod feed;
pub mod node;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use feed::{BlockFeed, FeedBlock};
pub use node::{Node, ReplaySummary};

use registry_core::{config::StoreBackend, CommitStore, GenesisState, MemStore};
use std::{fs::File, io::BufReader};

/// Bootstrap from `config` and replay its block feed
pub fn run(config: &Config) -> Result<ReplaySummary> {
    match config.registry.backend {
        StoreBackend::Memory => run_with(MemStore::new(), config),
        #[cfg(feature = "rocksdb")]
        StoreBackend::Rocksdb => {
            let store =
                registry_core::store::RocksStore::open(&config.registry.data_dir, &config.registry.rocksdb)?;
            run_with(store, config)
        }
        #[cfg(not(feature = "rocksdb"))]
        StoreBackend::Rocksdb => Err(Error::Config(
            "Built without the rocksdb feature".to_string(),
        )),
    }
}

fn run_with<S: CommitStore>(store: S, config: &Config) -> Result<ReplaySummary> {
    let mut node = Node::open(store, config)?;

    let genesis = GenesisState::from_file(&config.genesis_path)?;
    node.bootstrap(&genesis)?;

    let feed = BlockFeed::new(BufReader::new(File::open(&config.blocks_path)?));
    let summary = node.replay(feed)?;

    if let Some(path) = &config.export_path {
        node.export(path)?;
        tracing::info!(path = %path.display(), "State exported");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use registry_core::{bank::Account, crypto::KeyPair, Coin, Msg, SignedTx};
    use rust_decimal::Decimal;
    use std::io::Write;

    #[test]
    fn test_run_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let mut genesis = GenesisState::new("registry-test", start);
        genesis.accounts.push(Account {
            address: alice.address(),
            public_key: None,
            account_number: 0,
            sequence: 0,
            coins: Coin::new("wire", Decimal::from(100)).to_coins(),
        });
        let genesis_path = dir.path().join("genesis.json");
        genesis.to_file(&genesis_path).unwrap();

        let tx = SignedTx::sign(
            Msg::ReserveAuthority { name: "alice".into() },
            "registry-test",
            0,
            0,
            &alice,
        )
        .unwrap();
        let blocks_path = dir.path().join("blocks.jsonl");
        let mut file = File::create(&blocks_path).unwrap();
        for height in 1..=3u64 {
            let block = FeedBlock {
                height,
                time: start + chrono::Duration::hours(height as i64),
                txs: if height == 1 { vec![tx.clone()] } else { vec![] },
            };
            writeln!(file, "{}", block.to_line().unwrap()).unwrap();
        }

        let export_path = dir.path().join("export.json");
        let config = Config {
            chain_id: "registry-test".into(),
            genesis_path,
            blocks_path,
            export_path: Some(export_path.clone()),
            ..Config::default()
        };

        let summary = run(&config).unwrap();
        assert_eq!(summary.blocks, 3);
        assert_eq!(summary.txs_ok, 1);
        assert_eq!(summary.height, 3);
        assert_eq!(summary.app_hash.len(), 64);

        let exported = GenesisState::from_file(&export_path).unwrap();
        assert_eq!(exported.authorities.len(), 1);
        assert_eq!(exported.authorities[0].name, "alice");
    }

    #[test]
    fn test_run_missing_feed_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let genesis_path = dir.path().join("genesis.json");
        GenesisState::new("registry-test", Utc::now())
            .to_file(&genesis_path)
            .unwrap();

        let config = Config {
            chain_id: "registry-test".into(),
            genesis_path,
            blocks_path: dir.path().join("missing.jsonl"),
            ..Config::default()
        };
        assert!(matches!(run(&config), Err(Error::Io(_))));
    }
}
