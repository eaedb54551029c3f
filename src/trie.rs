//! Persistent Merkle Patricia Trie over a content-addressed store.
//!
//! An authenticated, ordered key-value map: every node is stored under the
//! hash of its RLP serialization and the root hash authenticates the whole
//! map. Reloading a previously observed root hash against the same store
//! yields the same logical map, which makes snapshots and rollback a
//! matter of keeping 32 bytes.
//!
//! Note: an empty trie has root
//!
//!   keccak256(RLP(b''))
//!       ==
//!   56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421

use tracing::trace;

use crate::bytes::Bytes;
use crate::crypto::{Hash32, Keccak256, NodeHasher};
use crate::exceptions::TrieException;
use crate::nibbles::NibbleKey;
use crate::node::{Compaction, NodeKind, NodeRecord, ValueOrNode};
use crate::rlp;
use crate::store::Store;

/// Single-owner handle over a backing store.
///
/// Mutation is single-threaded; callers wanting concurrent readers should
/// snapshot via [`Trie::root_hash`] and open an independent instance with
/// [`Trie::set_root`].
pub struct Trie<'db, H: NodeHasher = Keccak256> {
    db: &'db mut dyn Store,
    hasher: H,
    root: Option<NodeRecord>,
    empty_trie_hash: Hash32,
}

impl<'db> Trie<'db> {
    /// An empty trie over `db`, hashing with keccak256.
    pub fn new(db: &'db mut dyn Store) -> Self {
        Self::with_hasher(db, Keccak256)
    }
}

impl<'db, H: NodeHasher> Trie<'db, H> {
    pub fn with_hasher(db: &'db mut dyn Store, hasher: H) -> Self {
        let mut encoded_empty = Bytes::default();
        rlp::encode_bytes(&mut encoded_empty, b"");
        let empty_trie_hash = hasher.hash(&encoded_empty);
        Self { db, hasher, root: None, empty_trie_hash }
    }

    /// The sentinel root hash of an empty map: the hash of the RLP-encoded
    /// empty byte string.
    pub fn empty_trie_hash(&self) -> &Hash32 {
        &self.empty_trie_hash
    }

    /// Looks up `key`, resolving stored nodes along the path as needed.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>, TrieException> {
        let path = NibbleKey::from_normal(key);
        match self.root.as_mut() {
            Some(root) => Self::get_at(&*self.db, root, path),
            None => Ok(None),
        }
    }

    /// Associates `value` with `key`. An empty value deletes the key.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), TrieException> {
        if value.is_empty() {
            return self.delete(key);
        }
        trace!(target: "mpt::trie", key = ?Bytes::from(key), len = value.len(), "put");
        let path = NibbleKey::from_normal(key);
        let value = Bytes::from(value);
        let root = match self.root.take() {
            Some(root) => Self::insert_at(&mut *self.db, root, path, ValueOrNode::Value(value))?,
            None => NodeRecord::leaf(path, value),
        };
        self.root = Some(root);
        Ok(())
    }

    /// Removes `key`. Removing an absent key is a no-op.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), TrieException> {
        trace!(target: "mpt::trie", key = ?Bytes::from(key), "delete");
        let path = NibbleKey::from_normal(key);
        if let Some(root) = self.root.take() {
            self.root = Self::delete_at(&mut *self.db, root, path)?;
        }
        Ok(())
    }

    /// Forces encoding of the current root and returns its hash. Every
    /// reachable dirty node is stored before the hash is returned.
    pub fn root_hash(&mut self) -> Result<Hash32, TrieException> {
        let Some(root) = self.root.as_mut() else {
            return Ok(self.empty_trie_hash.clone());
        };
        root.encode(&mut *self.db, &self.hasher, true)?;
        let Some(hash) = root.hash() else {
            return Err(TrieException::InvalidState("encoded root has no hash"));
        };
        trace!(target: "mpt::trie", root = ?hash, "root hash");
        Ok(hash.clone())
    }

    /// Discards the in-memory root. `None` and the empty-trie hash yield an
    /// empty map; any other hash becomes a stub resolved lazily against the
    /// store on first access.
    pub fn set_root(&mut self, hash: Option<Hash32>) {
        self.root = match hash {
            None => None,
            Some(hash) if hash == self.empty_trie_hash => None,
            Some(hash) => Some(NodeRecord::from_hash(hash)),
        };
    }

    /// If the root is dirty, encodes it (populating the store) and
    /// collapses the in-memory root to a hash-only stub, releasing all
    /// resolved children. Returns whether anything was written.
    pub fn flush(&mut self) -> Result<bool, TrieException> {
        let Some(root) = self.root.as_mut() else {
            return Ok(false);
        };
        if !root.is_dirty() {
            return Ok(false);
        }
        root.encode(&mut *self.db, &self.hasher, true)?;
        let Some(hash) = root.hash().cloned() else {
            return Err(TrieException::InvalidState("encoded root has no hash"));
        };
        trace!(target: "mpt::trie", root = ?hash, "flushed");
        self.root = Some(NodeRecord::from_hash(hash));
        Ok(true)
    }

    fn get_at(
        db: &dyn Store,
        node: &mut NodeRecord,
        key: NibbleKey,
    ) -> Result<Option<Bytes>, TrieException> {
        match node.kind_mut(db)? {
            NodeKind::Branch { children, value } => {
                if key.is_empty() {
                    return Ok(value.clone());
                }
                match &mut children[key.get_hex(0) as usize] {
                    Some(child) => Self::get_at(db, child, key.shift(1)),
                    None => Ok(None),
                }
            }
            NodeKind::Leaf { key: node_key, value } => match key.match_and_shift(node_key) {
                Some(rest) if rest.is_empty() => Ok(Some(value.clone())),
                _ => Ok(None),
            },
            NodeKind::Extension { key: node_key, child } => {
                match key.match_and_shift(node_key) {
                    Some(rest) => Self::get_at(db, child, rest),
                    None => Ok(None),
                }
            }
        }
    }

    /// Inserts `to_insert` under `key` below `node`, consuming the node and
    /// returning its replacement.
    fn insert_at(
        db: &mut dyn Store,
        mut node: NodeRecord,
        key: NibbleKey,
        to_insert: ValueOrNode,
    ) -> Result<NodeRecord, TrieException> {
        match node.take_kind(&*db)? {
            NodeKind::Branch { mut children, mut value } => {
                if key.is_empty() {
                    let ValueOrNode::Value(payload) = to_insert else {
                        return Err(TrieException::InvalidState(
                            "branch value slot takes a byte payload",
                        ));
                    };
                    value = Some(payload);
                } else {
                    let slot = key.get_hex(0) as usize;
                    let rest = key.shift(1);
                    children[slot] = Some(Box::new(match children[slot].take() {
                        Some(child) => Self::insert_at(db, *child, rest, to_insert)?,
                        None => Self::node_for(rest, to_insert),
                    }));
                }
                node.replace_kind(NodeKind::Branch { children, value });
                node.mark_dirty();
                Ok(node)
            }
            NodeKind::Extension { key: node_key, child } => {
                let prefix = key.common_prefix(&node_key);
                if prefix.len() == node_key.len() {
                    // key segment fully matched, descend into the child
                    let rest = key.shift(prefix.len());
                    let child = Self::insert_at(db, *child, rest, to_insert)?;
                    node.replace_kind(NodeKind::Extension {
                        key: node_key,
                        child: Box::new(child),
                    });
                    node.mark_dirty();
                    Ok(node)
                } else if prefix.is_empty() {
                    // nothing shared: split into a branch
                    let branch =
                        Self::branch_of(db, node_key, ValueOrNode::Node(*child), key, to_insert)?;
                    node.dispose(db);
                    Ok(branch)
                } else {
                    // partial overlap: push both residues one level down
                    let branch = Self::branch_of(
                        db,
                        node_key.shift(prefix.len()),
                        ValueOrNode::Node(*child),
                        key.shift(prefix.len()),
                        to_insert,
                    )?;
                    node.dispose(db);
                    Ok(NodeRecord::extension(prefix, branch))
                }
            }
            NodeKind::Leaf { key: node_key, value } => {
                let prefix = key.common_prefix(&node_key);
                if prefix.len() == key.len() && prefix.len() == node_key.len() {
                    // identical path: overwrite in place
                    let kind = match to_insert {
                        ValueOrNode::Value(payload) => {
                            NodeKind::Leaf { key: node_key, value: payload }
                        }
                        ValueOrNode::Node(child) => {
                            NodeKind::Extension { key: node_key, child: Box::new(child) }
                        }
                    };
                    node.replace_kind(kind);
                    node.mark_dirty();
                    Ok(node)
                } else if prefix.is_empty() {
                    let branch =
                        Self::branch_of(db, node_key, ValueOrNode::Value(value), key, to_insert)?;
                    node.dispose(db);
                    Ok(branch)
                } else {
                    let branch = Self::branch_of(
                        db,
                        node_key.shift(prefix.len()),
                        ValueOrNode::Value(value),
                        key.shift(prefix.len()),
                        to_insert,
                    )?;
                    node.dispose(db);
                    Ok(NodeRecord::extension(prefix, branch))
                }
            }
        }
    }

    /// A fresh branch holding two entries whose keys disagree on their
    /// first nibble (or are empty, landing in the value slot).
    fn branch_of(
        db: &mut dyn Store,
        first_key: NibbleKey,
        first: ValueOrNode,
        second_key: NibbleKey,
        second: ValueOrNode,
    ) -> Result<NodeRecord, TrieException> {
        let branch = NodeRecord::branch();
        let branch = Self::insert_at(db, branch, first_key, first)?;
        Self::insert_at(db, branch, second_key, second)
    }

    /// The node representing `payload` under `key` in an empty slot.
    fn node_for(key: NibbleKey, payload: ValueOrNode) -> NodeRecord {
        match payload {
            ValueOrNode::Value(value) => NodeRecord::leaf(key, value),
            ValueOrNode::Node(child) => {
                if key.is_empty() {
                    child
                } else {
                    NodeRecord::extension(key, child)
                }
            }
        }
    }

    /// Removes `key` below `node`, consuming the node. Returns `None` when
    /// the node itself vanished.
    fn delete_at(
        db: &mut dyn Store,
        mut node: NodeRecord,
        key: NibbleKey,
    ) -> Result<Option<NodeRecord>, TrieException> {
        match node.take_kind(&*db)? {
            NodeKind::Branch { mut children, mut value } => {
                if key.is_empty() {
                    if value.is_none() {
                        node.replace_kind(NodeKind::Branch { children, value });
                        return Ok(Some(node));
                    }
                    value = None;
                } else {
                    let slot = key.get_hex(0) as usize;
                    let Some(child) = children[slot].take() else {
                        node.replace_kind(NodeKind::Branch { children, value });
                        return Ok(Some(node));
                    };
                    children[slot] = Self::delete_at(db, *child, key.shift(1))?.map(Box::new);
                }
                let kind = NodeKind::Branch { children, value };
                match kind.branch_compaction() {
                    Compaction::None => {
                        node.replace_kind(kind);
                        node.mark_dirty();
                        Ok(Some(node))
                    }
                    Compaction::Value => {
                        let NodeKind::Branch { value: Some(value), .. } = kind else {
                            return Err(TrieException::InvalidState(
                                "branch compaction without a value",
                            ));
                        };
                        node.dispose(db);
                        Ok(Some(NodeRecord::leaf(NibbleKey::empty(), value)))
                    }
                    Compaction::Child(index) => {
                        let NodeKind::Branch { mut children, .. } = kind else {
                            return Err(TrieException::InvalidState(
                                "branch compaction without a child",
                            ));
                        };
                        let Some(child) = children[index as usize].take() else {
                            return Err(TrieException::InvalidState(
                                "branch compaction without a child",
                            ));
                        };
                        node.dispose(db);
                        Ok(Some(Self::merge_kv(db, NibbleKey::single_hex(index), *child)?))
                    }
                }
            }
            NodeKind::Leaf { key: node_key, value } => {
                match key.match_and_shift(&node_key) {
                    Some(rest) if rest.is_empty() => {
                        node.dispose(db);
                        Ok(None)
                    }
                    _ => {
                        node.replace_kind(NodeKind::Leaf { key: node_key, value });
                        Ok(Some(node))
                    }
                }
            }
            NodeKind::Extension { key: node_key, child } => {
                let Some(rest) = key.match_and_shift(&node_key) else {
                    node.replace_kind(NodeKind::Extension { key: node_key, child });
                    return Ok(Some(node));
                };
                match Self::delete_at(db, *child, rest)? {
                    None => Err(TrieException::InvalidState("extension lost its child")),
                    Some(child) => {
                        let merged = Self::merge_kv(db, node_key, child)?;
                        node.dispose(db);
                        Ok(Some(merged))
                    }
                }
            }
        }
    }

    /// Joins a shortened path onto `child`. A leaf or extension child folds
    /// into a single key-value node (disposing the child's stored form); a
    /// branch child hangs off a new extension.
    fn merge_kv(
        db: &mut dyn Store,
        key: NibbleKey,
        mut child: NodeRecord,
    ) -> Result<NodeRecord, TrieException> {
        match child.take_kind(&*db)? {
            NodeKind::Leaf { key: child_key, value } => {
                child.dispose(db);
                Ok(NodeRecord::leaf(key.concat(&child_key)?, value))
            }
            NodeKind::Extension { key: child_key, child: grandchild } => {
                child.dispose(db);
                Ok(NodeRecord::extension(key.concat(&child_key)?, *grandchild))
            }
            kind @ NodeKind::Branch { .. } => {
                child.replace_kind(kind);
                Ok(NodeRecord::extension(key, child))
            }
        }
    }
}

impl<H: NodeHasher> std::fmt::Debug for Trie<'_, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trie")
            .field("root", &self.root)
            .field("empty_trie_hash", &self.empty_trie_hash)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
