//! Key-value substrate
//!
//! Every component reads and writes through [`KvStore`]: an ordered,
//! prefix-iterable byte-string map. Values are encoded with bincode via
//! [`KvStoreExt`].
//!
//! # Implementations
//!
//! - [`MemStore`] - in-memory `BTreeMap`, used by tests and ephemeral nodes
//! - [`CacheStore`] - write-buffering overlay, written back only on success
//! - `RocksStore` - persistent RocksDB store (feature `rocksdb`)
//!
//! [`MemStore`] and `RocksStore` also implement [`CommitStore`].

mod cache;
mod memory;
#[cfg(feature = "rocksdb")]
mod rocks;

pub use cache::{CacheStore, PendingWrites};
pub use memory::MemStore;
#[cfg(feature = "rocksdb")]
pub use rocks::RocksStore;

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};

/// One pending write: `None` deletes the key
pub type WriteOp = (Vec<u8>, Option<Vec<u8>>);

/// Ordered byte-string key-value store
pub trait KvStore {
    /// Read a key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write a key
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a key
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order
    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Key presence
    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Apply a batch of writes atomically
    fn apply(&mut self, batch: Vec<WriteOp>) -> Result<()> {
        for (key, value) in batch {
            match value {
                Some(value) => self.set(&key, &value)?,
                None => self.delete(&key)?,
            }
        }
        Ok(())
    }
}

/// Store that also keeps the app hash of every committed height
///
/// Commit info lives outside the key space so it never feeds back into the
/// hash it records.
pub trait CommitStore: KvStore {
    /// Record the app hash committed at `height`
    fn save_commit(&mut self, height: u64, app_hash: [u8; 32]) -> Result<()>;

    /// App hash committed at `height`
    fn commit_at(&self, height: u64) -> Result<Option<[u8; 32]>>;

    /// Latest committed `(height, app_hash)`
    fn last_commit(&self) -> Result<Option<(u64, [u8; 32])>>;

    /// Write a block's state changes together with its commit record
    ///
    /// Stores that can do so write both in one atomic batch, so a crash never
    /// leaves state for a height that was not recorded as committed.
    fn commit_block(&mut self, batch: Vec<WriteOp>, height: u64, app_hash: [u8; 32]) -> Result<()> {
        self.apply(batch)?;
        self.save_commit(height, app_hash)
    }
}

/// Typed access on top of [`KvStore`]
pub trait KvStoreExt: KvStore {
    /// Read and decode a value
    fn get_value<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encode and write a value
    fn put_value<T: Serialize>(&mut self, key: &[u8], value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.set(key, &bytes)
    }

    /// Decode every value under a prefix
    fn values_with_prefix<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        self.iter_prefix(prefix)?
            .into_iter()
            .map(|(_, bytes)| bincode::deserialize(&bytes).map_err(Error::from))
            .collect()
    }

    /// Key suffixes (after `prefix`) of every entry under a prefix
    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .iter_prefix(prefix)?
            .into_iter()
            .map(|(key, _)| key[prefix.len()..].to_vec())
            .collect())
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}
