use std::collections::HashMap;

use ethereum_types::H256;
use parking_lot::RwLock;

/// The local key/value store that holds trie nodes by their keccak hash.
///
/// `put_batch` must apply all writes atomically: a reader either sees none
/// of the batch or all of it.
pub trait NodeStore: Send + Sync + 'static {
    fn contains(&self, hash: &H256) -> bool;

    fn get(&self, hash: &H256) -> Option<Vec<u8>>;

    fn put_batch(&self, nodes: &[(H256, Vec<u8>)]);
}

/// An in-memory store, used by the tests and by tools that replay sync
/// traces without a database.
#[derive(Default)]
pub struct MemoryNodeStore {
    nodes: RwLock<HashMap<H256, Vec<u8>>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl NodeStore for MemoryNodeStore {
    fn contains(&self, hash: &H256) -> bool {
        self.nodes.read().contains_key(hash)
    }

    fn get(&self, hash: &H256) -> Option<Vec<u8>> {
        self.nodes.read().get(hash).cloned()
    }

    fn put_batch(&self, nodes: &[(H256, Vec<u8>)]) {
        let mut guard = self.nodes.write();
        for (hash, bytes) in nodes {
            guard.insert(*hash, bytes.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_writes_become_visible_together() {
        let store = MemoryNodeStore::new();
        let first = (H256::from_low_u64_be(1), vec![1]);
        let second = (H256::from_low_u64_be(2), vec![2]);

        assert!(!store.contains(&first.0));
        store.put_batch(&[first.clone(), second.clone()]);
        assert_eq!(store.get(&first.0), Some(vec![1]));
        assert_eq!(store.get(&second.0), Some(vec![2]));
        assert_eq!(store.len(), 2);
    }
}
