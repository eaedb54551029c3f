//! Content-addressed byte store port.

use std::collections::HashMap;

use crate::bytes::Bytes;
use crate::crypto::Hash32;

/// Content-addressed byte store consumed by the trie.
///
/// Keys are 32-byte node hashes; values are RLP node serializations. The
/// trie never assumes the store is transactional: writes may be visible
/// before a flush completes.
pub trait Store {
    fn get(&self, key: &Hash32) -> Option<Bytes>;
    fn put(&mut self, key: Hash32, value: Bytes);
    fn delete(&mut self, key: &Hash32);
}

/// In-memory store backed by a hash map. Reference implementation for
/// tests and ephemeral tries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<Hash32, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &Hash32) -> bool {
        self.entries.contains_key(key)
    }

    /// The stored serializations, for structural inspection in tests.
    pub fn values(&self) -> impl Iterator<Item = &Bytes> {
        self.entries.values()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &Hash32) -> Option<Bytes> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: Hash32, value: Bytes) {
        self.entries.insert(key, value);
    }

    fn delete(&mut self, key: &Hash32) {
        self.entries.remove(key);
    }
}
