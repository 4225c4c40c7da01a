//! Persistent store using RocksDB
//!
//! # Column Families
//!
//! - `state` - Application state (every module's keys)
//! - `commits` - Commit info per height (key: big-endian height)

use super::{CommitStore, KvStore, WriteOp};
use crate::{
    config::RocksDbConfig,
    error::{Error, Result},
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use std::fmt;
use std::path::Path;

/// Column family names
const CF_STATE: &str = "state";
const CF_COMMITS: &str = "commits";

/// RocksDB-backed store
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create database
    pub fn open(path: impl AsRef<Path>, config: &RocksDbConfig) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.max_background_jobs);
        if config.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_STATE, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_COMMITS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        tracing::info!(path = ?path, "Opened RocksDB store");

        Ok(Self { db })
    }

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }
}

impl fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl KvStore for RocksStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(CF_STATE)?;
        Ok(self.db.get_cf(cf, key)?)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf_handle(CF_STATE)?;
        self.db.put_cf(cf, key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        let cf = self.cf_handle(CF_STATE)?;
        self.db.delete_cf(cf, key)?;
        Ok(())
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf_handle(CF_STATE)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn apply(&mut self, batch: Vec<WriteOp>) -> Result<()> {
        let count = batch.len();
        let write_batch = self.state_batch(batch)?;
        self.db.write(write_batch)?;
        tracing::debug!(writes = count, "Batch written atomically");
        Ok(())
    }
}

impl RocksStore {
    fn state_batch(&self, batch: Vec<WriteOp>) -> Result<WriteBatch> {
        let cf = self.cf_handle(CF_STATE)?;
        let mut write_batch = WriteBatch::default();
        for (key, value) in batch {
            match value {
                Some(value) => write_batch.put_cf(cf, key, value),
                None => write_batch.delete_cf(cf, key),
            }
        }
        Ok(write_batch)
    }
}

fn hash_from_bytes(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| Error::Storage("Malformed app hash".to_string()))
}

impl CommitStore for RocksStore {
    fn save_commit(&mut self, height: u64, app_hash: [u8; 32]) -> Result<()> {
        let cf = self.cf_handle(CF_COMMITS)?;
        self.db.put_cf(cf, height.to_be_bytes(), app_hash)?;
        Ok(())
    }

    fn commit_at(&self, height: u64) -> Result<Option<[u8; 32]>> {
        let cf = self.cf_handle(CF_COMMITS)?;
        self.db
            .get_cf(cf, height.to_be_bytes())?
            .map(|bytes| hash_from_bytes(&bytes))
            .transpose()
    }

    fn last_commit(&self) -> Result<Option<(u64, [u8; 32])>> {
        let cf = self.cf_handle(CF_COMMITS)?;
        let mut iter = self.db.iterator_cf(cf, IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (key, value) = item?;
                let height_bytes: [u8; 8] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| Error::Storage("Malformed commit key".to_string()))?;
                Ok(Some((u64::from_be_bytes(height_bytes), hash_from_bytes(&value)?)))
            }
            None => Ok(None),
        }
    }

    fn commit_block(&mut self, batch: Vec<WriteOp>, height: u64, app_hash: [u8; 32]) -> Result<()> {
        let count = batch.len();
        let mut write_batch = self.state_batch(batch)?;
        let cf = self.cf_handle(CF_COMMITS)?;
        write_batch.put_cf(cf, height.to_be_bytes(), app_hash);

        self.db.write(write_batch)?;
        tracing::debug!(height, writes = count, "Block written atomically");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (RocksStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path(), &RocksDbConfig::default()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_put_get_delete() {
        let (mut store, _temp) = open_temp();
        store.set(b"key", b"value").unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(b"value".to_vec()));
        store.delete(b"key").unwrap();
        assert_eq!(store.get(b"key").unwrap(), None);
    }

    #[test]
    fn test_prefix_iteration_stops_at_boundary() {
        let (mut store, _temp) = open_temp();
        store
            .apply(vec![
                (b"a/1".to_vec(), Some(b"1".to_vec())),
                (b"a/2".to_vec(), Some(b"2".to_vec())),
                (b"b/1".to_vec(), Some(b"3".to_vec())),
            ])
            .unwrap();

        let entries = store.iter_prefix(b"a/").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].1, b"2".to_vec());
    }

    #[test]
    fn test_commit_info_roundtrip() {
        let (mut store, _temp) = open_temp();
        assert!(store.last_commit().unwrap().is_none());

        store.save_commit(1, [1u8; 32]).unwrap();
        store.save_commit(2, [2u8; 32]).unwrap();
        assert_eq!(store.last_commit().unwrap(), Some((2, [2u8; 32])));
        assert_eq!(store.commit_at(1).unwrap(), Some([1u8; 32]));
        assert_eq!(store.commit_at(3).unwrap(), None);
    }

    #[test]
    fn test_commit_block_writes_state_and_commit() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut store = RocksStore::open(temp_dir.path(), &RocksDbConfig::default()).unwrap();
            store.set(b"gone", b"x").unwrap();
            store
                .commit_block(
                    vec![
                        (b"kept".to_vec(), Some(b"1".to_vec())),
                        (b"gone".to_vec(), None),
                    ],
                    7,
                    [7u8; 32],
                )
                .unwrap();
        }

        let store = RocksStore::open(temp_dir.path(), &RocksDbConfig::default()).unwrap();
        assert_eq!(store.get(b"kept").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"gone").unwrap(), None);
        assert_eq!(store.last_commit().unwrap(), Some((7, [7u8; 32])));
    }
}
