//! In-memory store

use super::{CommitStore, KvStore, WriteOp};
use crate::Result;
use std::collections::BTreeMap;

/// `BTreeMap`-backed store
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    commits: BTreeMap<u64, [u8; 32]>,
}

impl MemStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Store holds no keys
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .data
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn apply(&mut self, batch: Vec<WriteOp>) -> Result<()> {
        for (key, value) in batch {
            match value {
                Some(value) => {
                    self.data.insert(key, value);
                }
                None => {
                    self.data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

impl CommitStore for MemStore {
    fn save_commit(&mut self, height: u64, app_hash: [u8; 32]) -> Result<()> {
        self.commits.insert(height, app_hash);
        Ok(())
    }

    fn commit_at(&self, height: u64) -> Result<Option<[u8; 32]>> {
        Ok(self.commits.get(&height).copied())
    }

    fn last_commit(&self) -> Result<Option<(u64, [u8; 32])>> {
        Ok(self.commits.iter().next_back().map(|(h, hash)| (*h, *hash)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KvStoreExt;

    #[test]
    fn test_set_get_delete() {
        let mut store = MemStore::new();
        store.set(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(store.has(b"a").unwrap());

        store.delete(b"a").unwrap();
        assert!(!store.has(b"a").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_iter_prefix_ordered() {
        let mut store = MemStore::new();
        store.set(b"p/b", b"2").unwrap();
        store.set(b"p/a", b"1").unwrap();
        store.set(b"q/a", b"3").unwrap();
        store.set(b"p", b"0").unwrap();

        let entries = store.iter_prefix(b"p/").unwrap();
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"p/a".as_slice(), b"p/b".as_slice()]);
    }

    #[test]
    fn test_typed_values() {
        let mut store = MemStore::new();
        store.put_value(b"k", &vec![1u64, 2, 3]).unwrap();
        let value: Option<Vec<u64>> = store.get_value(b"k").unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));

        let keys = store.keys_with_prefix(b"").unwrap();
        assert_eq!(keys, vec![b"k".to_vec()]);
    }

    #[test]
    fn test_commits_outside_key_space() {
        let mut store = MemStore::new();
        assert_eq!(store.last_commit().unwrap(), None);

        store.save_commit(1, [1u8; 32]).unwrap();
        store.save_commit(2, [2u8; 32]).unwrap();
        assert_eq!(store.last_commit().unwrap(), Some((2, [2u8; 32])));
        assert_eq!(store.commit_at(1).unwrap(), Some([1u8; 32]));
        assert!(store.is_empty());
    }
}
