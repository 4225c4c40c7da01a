//! State commitment
//!
//! The app hash is the root of a binary SHA-256 Merkle tree whose leaves are
//! the committed key/value pairs in key order. A proof for a key is either an
//! inclusion proof for its leaf or, when the key is absent, inclusion proofs
//! for the two adjacent leaves that bracket it.
//!
//! # Design
//!
//! - Leaf hash: `SHA-256(0x00 || len(key) || key || SHA-256(value))`
//! - Internal hash: `SHA-256(0x01 || left || right)`
//! - An odd node at the end of a level is paired with itself

use crate::{store::KvStore, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Root of an empty tree
pub const EMPTY_ROOT: [u8; 32] = [0u8; 32];

/// Hash of one key/value leaf
pub fn leaf_hash(key: &[u8], value: &[u8]) -> [u8; 32] {
    let value_hash: [u8; 32] = Sha256::digest(value).into();
    leaf_hash_from_value_hash(key, &value_hash)
}

fn leaf_hash_from_value_hash(key: &[u8], value_hash: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update((key.len() as u64).to_be_bytes());
    hasher.update(key);
    hasher.update(value_hash);
    hasher.finalize().into()
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Direction of a sibling on the path to the root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Sibling is on the left
    Left,
    /// Sibling is on the right
    Right,
}

/// Inclusion proof for one leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafProof {
    /// Leaf key
    pub key: Vec<u8>,
    /// SHA-256 of the leaf value
    pub value_hash: [u8; 32],
    /// Leaf position
    pub index: usize,
    /// Sibling hashes from leaf to root
    pub siblings: Vec<(Direction, [u8; 32])>,
}

impl LeafProof {
    fn root(&self) -> [u8; 32] {
        let mut current = leaf_hash_from_value_hash(&self.key, &self.value_hash);
        for (direction, sibling) in &self.siblings {
            current = match direction {
                Direction::Left => hash_pair(sibling, &current),
                Direction::Right => hash_pair(&current, sibling),
            };
        }
        current
    }

    /// Leaf position implied by the sibling directions
    fn path_index(&self) -> usize {
        self.siblings
            .iter()
            .enumerate()
            .filter(|(_, (direction, _))| *direction == Direction::Left)
            .fold(0, |index, (depth, _)| index | (1 << depth))
    }

    /// Does the proof hash to `root` at its claimed position
    pub fn verify(&self, root: &[u8; 32]) -> bool {
        self.path_index() == self.index && self.root() == *root
    }
}

/// Proof of a key's presence or absence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateProof {
    /// The key is committed
    Inclusion(LeafProof),
    /// The key is absent; the neighbours bracket where it would sit
    Exclusion {
        /// Total leaves in the tree
        leaf_count: usize,
        /// Greatest committed key below the missing key
        left: Option<LeafProof>,
        /// Least committed key above the missing key
        right: Option<LeafProof>,
    },
}

impl StateProof {
    /// Check the proof for `key` (and `value` when proving inclusion)
    pub fn verify(&self, root: &[u8; 32], key: &[u8], value: Option<&[u8]>) -> bool {
        match (self, value) {
            (StateProof::Inclusion(proof), Some(value)) => {
                let value_hash: [u8; 32] = Sha256::digest(value).into();
                proof.key == key && proof.value_hash == value_hash && proof.verify(root)
            }
            (
                StateProof::Exclusion {
                    leaf_count,
                    left,
                    right,
                },
                None,
            ) => {
                if *leaf_count == 0 {
                    return left.is_none() && right.is_none() && *root == EMPTY_ROOT;
                }
                let left_ok = left
                    .as_ref()
                    .map_or(true, |p| p.key.as_slice() < key && p.verify(root));
                let right_ok = right
                    .as_ref()
                    .map_or(true, |p| p.key.as_slice() > key && p.verify(root));
                let adjacent = match (left, right) {
                    (Some(l), Some(r)) => l.index + 1 == r.index,
                    (None, Some(r)) => r.index == 0,
                    (Some(l), None) => l.index + 1 == *leaf_count,
                    (None, None) => false,
                };
                left_ok && right_ok && adjacent
            }
            _ => false,
        }
    }
}

/// Merkle tree over sorted key/value leaves
#[derive(Debug, Clone, Default)]
pub struct StateTree {
    keys: Vec<Vec<u8>>,
    value_hashes: Vec<[u8; 32]>,
    levels: Vec<Vec<[u8; 32]>>,
}

impl StateTree {
    /// Build from entries already sorted by key
    pub fn from_entries(entries: &[(Vec<u8>, Vec<u8>)]) -> Self {
        let mut keys = Vec::with_capacity(entries.len());
        let mut value_hashes = Vec::with_capacity(entries.len());
        let mut leaves = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let value_hash: [u8; 32] = Sha256::digest(value).into();
            leaves.push(leaf_hash_from_value_hash(key, &value_hash));
            keys.push(key.clone());
            value_hashes.push(value_hash);
        }

        let mut levels = vec![leaves];
        while levels.last().map_or(false, |level| level.len() > 1) {
            let current = &levels[levels.len() - 1];
            let next = current
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            levels.push(next);
        }

        Self {
            keys,
            value_hashes,
            levels,
        }
    }

    /// Build over the whole store
    pub fn from_store(store: &dyn KvStore) -> Result<Self> {
        Ok(Self::from_entries(&store.iter_prefix(&[])?))
    }

    /// Number of leaves
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// No leaves
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Root hash
    pub fn root(&self) -> [u8; 32] {
        self.levels
            .last()
            .and_then(|level| level.first().copied())
            .unwrap_or(EMPTY_ROOT)
    }

    fn leaf_proof(&self, index: usize) -> LeafProof {
        let mut siblings = Vec::new();
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let (direction, sibling) = if position % 2 == 0 {
                (Direction::Right, *level.get(position + 1).unwrap_or(&level[position]))
            } else {
                (Direction::Left, level[position - 1])
            };
            siblings.push((direction, sibling));
            position /= 2;
        }
        LeafProof {
            key: self.keys[index].clone(),
            value_hash: self.value_hashes[index],
            index,
            siblings,
        }
    }

    /// Inclusion or exclusion proof for `key`
    pub fn prove(&self, key: &[u8]) -> StateProof {
        match self.keys.binary_search_by(|k| k.as_slice().cmp(key)) {
            Ok(index) => StateProof::Inclusion(self.leaf_proof(index)),
            Err(insert_at) => StateProof::Exclusion {
                leaf_count: self.len(),
                left: insert_at.checked_sub(1).map(|i| self.leaf_proof(i)),
                right: (insert_at < self.len()).then(|| self.leaf_proof(insert_at)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(keys: &[&str]) -> Vec<(Vec<u8>, Vec<u8>)> {
        keys.iter()
            .map(|k| (k.as_bytes().to_vec(), format!("value-{}", k).into_bytes()))
            .collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = StateTree::from_entries(&[]);
        assert!(tree.is_empty());
        assert_eq!(tree.root(), EMPTY_ROOT);

        let proof = tree.prove(b"a");
        assert!(proof.verify(&EMPTY_ROOT, b"a", None));
    }

    #[test]
    fn test_single_leaf() {
        let tree = StateTree::from_entries(&entries(&["a"]));
        assert_eq!(tree.root(), leaf_hash(b"a", b"value-a"));

        let proof = tree.prove(b"a");
        assert!(proof.verify(&tree.root(), b"a", Some(b"value-a")));
    }

    #[test]
    fn test_odd_number_leaves() {
        let tree = StateTree::from_entries(&entries(&["a", "b", "c"]));
        let (a, b, c) = (
            leaf_hash(b"a", b"value-a"),
            leaf_hash(b"b", b"value-b"),
            leaf_hash(b"c", b"value-c"),
        );
        let expected = hash_pair(&hash_pair(&a, &b), &hash_pair(&c, &c));
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn test_inclusion_proofs() {
        let keys = ["a", "b", "c", "d", "e"];
        let tree = StateTree::from_entries(&entries(&keys));
        let root = tree.root();

        for key in keys {
            let value = format!("value-{}", key);
            let proof = tree.prove(key.as_bytes());
            assert!(matches!(proof, StateProof::Inclusion(_)));
            assert!(proof.verify(&root, key.as_bytes(), Some(value.as_bytes())));
            assert!(!proof.verify(&root, key.as_bytes(), Some(b"tampered")));
            assert!(!proof.verify(&[7u8; 32], key.as_bytes(), Some(value.as_bytes())));
        }
    }

    #[test]
    fn test_exclusion_proofs() {
        let tree = StateTree::from_entries(&entries(&["b", "d", "f"]));
        let root = tree.root();

        for missing in ["a", "c", "e", "g"] {
            let proof = tree.prove(missing.as_bytes());
            assert!(matches!(proof, StateProof::Exclusion { .. }));
            assert!(proof.verify(&root, missing.as_bytes(), None));
        }

        // bracketing "c" does not prove "e" absent
        let proof = tree.prove(b"c");
        assert!(!proof.verify(&root, b"e", None));
    }

    #[test]
    fn test_root_changes_with_values() {
        let before = StateTree::from_entries(&entries(&["a", "b"])).root();
        let mut changed = entries(&["a", "b"]);
        changed[1].1 = b"other".to_vec();
        assert_ne!(before, StateTree::from_entries(&changed).root());
    }
}
