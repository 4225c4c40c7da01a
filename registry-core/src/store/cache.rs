//! Write-buffering overlay
//!
//! A transaction runs against a [`CacheStore`] layered over the committed
//! state. Reads fall through to the parent; writes stay in the overlay until
//! [`CacheStore::write`] flushes them as one batch. Dropping the overlay
//! discards every write, so a failed handler leaves no trace.

use super::{KvStore, WriteOp};
use crate::Result;
use std::collections::BTreeMap;
use std::fmt;

/// Buffered writes of an overlay, detached from its parent
pub type PendingWrites = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Overlay over a parent store
pub struct CacheStore<'p> {
    parent: &'p mut dyn KvStore,
    writes: PendingWrites,
}

impl<'p> CacheStore<'p> {
    /// Layer a fresh overlay over `parent`
    pub fn new(parent: &'p mut dyn KvStore) -> Self {
        Self::with_writes(parent, PendingWrites::new())
    }

    /// Layer an overlay holding earlier buffered `writes` over `parent`
    pub fn with_writes(parent: &'p mut dyn KvStore, writes: PendingWrites) -> Self {
        Self { parent, writes }
    }

    /// Number of buffered writes
    pub fn pending(&self) -> usize {
        self.writes.len()
    }

    /// Release the parent and keep the buffered writes
    pub fn into_writes(self) -> PendingWrites {
        self.writes
    }

    /// Flush buffered writes into the parent atomically
    pub fn write(self) -> Result<()> {
        let batch: Vec<WriteOp> = self.writes.into_iter().collect();
        tracing::debug!(writes = batch.len(), "Flushing cache store");
        self.parent.apply(batch)
    }
}

impl fmt::Debug for CacheStore<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("pending", &self.writes.len())
            .finish()
    }
}

impl KvStore for CacheStore<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(value) => Ok(value.clone()),
            None => self.parent.get(key),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.parent.iter_prefix(prefix)?.into_iter().collect();

        for (key, value) in self
            .writes
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged.into_iter().collect())
    }
}
