//! Replay driver
//!
//! [`Node`] bootstraps a [`RegistryApp`] from genesis (or resumes a store that
//! already holds committed state) and feeds it blocks. Blocks at or below the
//! last committed height are skipped, so a feed can be replayed against a
//! persistent store after a restart.

use crate::{config::Config, feed::FeedBlock, Error, Result};
use registry_core::{CommitStore, GenesisState, Metrics, RegistryApp};
use tracing::{info, warn};

/// Outcome of a replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Blocks applied
    pub blocks: u64,
    /// Blocks skipped as already committed
    pub skipped: u64,
    /// Transactions applied
    pub txs_ok: u64,
    /// Transactions rejected
    pub txs_failed: u64,
    /// Last committed height
    pub height: u64,
    /// Hex app hash at that height
    pub app_hash: String,
}

/// Registry node over a committed store
#[derive(Debug)]
pub struct Node<S: CommitStore> {
    app: RegistryApp<S>,
    chain_id: String,
}

impl<S: CommitStore> Node<S> {
    /// Open the application over `store`
    pub fn open(store: S, config: &Config) -> Result<Self> {
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;
        let app = RegistryApp::new(store, config.registry.clone(), metrics)?;
        Ok(Self {
            app,
            chain_id: config.chain_id.clone(),
        })
    }

    /// The application
    pub fn app(&self) -> &RegistryApp<S> {
        &self.app
    }

    /// Import `genesis` unless the store is already initialised
    pub fn bootstrap(&mut self, genesis: &GenesisState) -> Result<()> {
        if genesis.chain_id != self.chain_id {
            return Err(Error::Genesis(format!(
                "Genesis is for chain {}, node expects {}",
                genesis.chain_id, self.chain_id
            )));
        }

        match self.app.info().chain_id {
            Some(stored) if stored == self.chain_id => {
                info!(
                    chain_id = %stored,
                    height = self.app.info().last_block_height,
                    "Resuming from stored state"
                );
                Ok(())
            }
            Some(stored) => Err(Error::Genesis(format!(
                "Store holds chain {}, node expects {}",
                stored, self.chain_id
            ))),
            None => {
                let commit = self.app.init_genesis(genesis)?;
                info!(
                    chain_id = %self.chain_id,
                    app_hash = %hex::encode(commit.app_hash),
                    "Genesis imported"
                );
                Ok(())
            }
        }
    }

    /// Apply every block of `blocks` in order
    ///
    /// Stops at the first block that cannot be applied. Rejected
    /// transactions are counted, not errors.
    pub fn replay<I>(&mut self, blocks: I) -> Result<ReplaySummary>
    where
        I: IntoIterator<Item = Result<FeedBlock>>,
    {
        let mut summary = ReplaySummary::default();

        for block in blocks {
            let block = block?;
            if block.height <= self.app.info().last_block_height {
                summary.skipped += 1;
                continue;
            }

            let result = self.app.apply_block(block.header(&self.chain_id), &block.txs)?;
            for (index, tx) in result.tx_results.iter().enumerate() {
                if tx.is_ok() {
                    summary.txs_ok += 1;
                } else {
                    summary.txs_failed += 1;
                    warn!(height = block.height, index, code = tx.code, log = %tx.log, "Transaction failed");
                }
            }
            summary.blocks += 1;
        }

        let info = self.app.info();
        summary.height = info.last_block_height;
        summary.app_hash = info.last_block_app_hash;
        info!(
            blocks = summary.blocks,
            skipped = summary.skipped,
            txs_ok = summary.txs_ok,
            txs_failed = summary.txs_failed,
            height = summary.height,
            app_hash = %summary.app_hash,
            "Replay finished"
        );
        Ok(summary)
    }

    /// Write the current state as a genesis document
    pub fn export(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        self.app.export_genesis()?.to_file(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use registry_core::{bank::Account, crypto::KeyPair, Coin, MemStore, Msg, Query, SignedTx};
    use rust_decimal::Decimal;

    const CHAIN_ID: &str = "registry-test";

    fn genesis_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn config() -> Config {
        Config {
            chain_id: CHAIN_ID.to_string(),
            ..Config::default()
        }
    }

    fn genesis(keypair: &KeyPair) -> GenesisState {
        let mut genesis = GenesisState::new(CHAIN_ID, genesis_time());
        genesis.accounts.push(Account {
            address: keypair.address(),
            public_key: None,
            account_number: 0,
            sequence: 0,
            coins: Coin::new("wire", Decimal::from(100)).to_coins(),
        });
        genesis
    }

    fn block(height: u64, txs: Vec<SignedTx>) -> Result<FeedBlock> {
        Ok(FeedBlock {
            height,
            time: genesis_time() + Duration::hours(height as i64),
            txs,
        })
    }

    fn create_bond(keypair: &KeyPair, sequence: u64, amount: u64) -> SignedTx {
        SignedTx::sign(
            Msg::CreateBond {
                coins: Coin::new("wire", Decimal::from(amount)).to_coins(),
            },
            CHAIN_ID,
            0,
            sequence,
            keypair,
        )
        .unwrap()
    }

    #[test]
    fn test_replay_counts_results() {
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let mut node = Node::open(MemStore::new(), &config()).unwrap();
        node.bootstrap(&genesis(&alice)).unwrap();

        let summary = node
            .replay(vec![
                block(1, vec![create_bond(&alice, 0, 10)]),
                block(2, vec![create_bond(&alice, 1, 500), create_bond(&alice, 2, 5)]),
                block(3, vec![]),
            ])
            .unwrap();

        assert_eq!(summary.blocks, 3);
        assert_eq!(summary.txs_ok, 2);
        assert_eq!(summary.txs_failed, 1);
        assert_eq!(summary.height, 3);

        let bonds = node.app().query(&Query::Bonds).unwrap();
        assert_eq!(bonds.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_replay_skips_committed_blocks() {
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let mut node = Node::open(MemStore::new(), &config()).unwrap();
        node.bootstrap(&genesis(&alice)).unwrap();
        node.replay(vec![block(1, vec![create_bond(&alice, 0, 10)])]).unwrap();

        let summary = node
            .replay(vec![
                block(1, vec![create_bond(&alice, 0, 10)]),
                block(2, vec![]),
            ])
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.blocks, 1);
        assert_eq!(summary.txs_ok, 0);
    }

    #[test]
    fn test_bootstrap_rejects_foreign_genesis() {
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let mut node = Node::open(MemStore::new(), &config()).unwrap();

        let mut foreign = genesis(&alice);
        foreign.chain_id = "other-chain".into();
        assert!(matches!(node.bootstrap(&foreign), Err(Error::Genesis(_))));

        node.bootstrap(&genesis(&alice)).unwrap();
        // second bootstrap resumes instead of re-importing
        node.bootstrap(&genesis(&alice)).unwrap();
    }

    #[test]
    fn test_height_gap_stops_replay() {
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let mut node = Node::open(MemStore::new(), &config()).unwrap();
        node.bootstrap(&genesis(&alice)).unwrap();

        let err = node.replay(vec![block(2, vec![])]).unwrap_err();
        assert!(matches!(
            err,
            Error::Registry(registry_core::Error::InvalidInput(_))
        ));
        assert_eq!(node.app().info().last_block_height, 0);
    }

    #[test]
    fn test_export_round_trips_through_genesis() {
        let alice = KeyPair::from_seed(&[1u8; 32]);
        let mut node = Node::open(MemStore::new(), &config()).unwrap();
        node.bootstrap(&genesis(&alice)).unwrap();
        node.replay(vec![block(1, vec![create_bond(&alice, 0, 10)])]).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        node.export(&path).unwrap();

        let exported = GenesisState::from_file(&path).unwrap();
        let mut restored = Node::open(MemStore::new(), &config()).unwrap();
        restored.bootstrap(&exported).unwrap();
        assert_eq!(
            restored.app().query(&Query::Bonds).unwrap(),
            node.app().query(&Query::Bonds).unwrap()
        );
    }
}
