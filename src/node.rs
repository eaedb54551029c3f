//! In-memory trie node records: lazy resolution, serialization, hashing
//! and dirty tracking.

use tracing::trace;

use crate::bytes::Bytes;
use crate::crypto::{Hash32, NodeHasher};
use crate::exceptions::TrieException;
use crate::nibbles::NibbleKey;
use crate::rlp::{self, Item};
use crate::store::Store;

/// Payload of a key-value node: leaves hold bytes, extensions hold a
/// child node.
#[derive(Debug)]
pub enum ValueOrNode {
    Value(Bytes),
    Node(NodeRecord),
}

/// Structural view of a node record.
#[derive(Debug)]
pub enum NodeKind {
    /// 16 child slots, one per nibble value, plus a terminal value slot.
    Branch {
        children: [Option<Box<NodeRecord>>; 16],
        value: Option<Bytes>,
    },
    /// A non-terminal key segment and a single child.
    Extension {
        key: NibbleKey,
        child: Box<NodeRecord>,
    },
    /// A terminal key suffix and a stored value.
    Leaf {
        key: NibbleKey,
        value: Bytes,
    },
}

/// How a branch collapses once a delete leaves it with a single occupant.
#[derive(Debug, PartialEq)]
pub enum Compaction {
    /// Two or more occupants remain; the branch stays a branch.
    None,
    /// Only the value slot remains.
    Value,
    /// Only the child at this nibble remains.
    Child(u8),
}

impl NodeKind {
    /// Scans a branch's slots for compaction. Anything but a branch, or a
    /// branch still carrying two or more occupants, does not compact.
    pub fn branch_compaction(&self) -> Compaction {
        let NodeKind::Branch { children, value } = self else {
            return Compaction::None;
        };
        let mut single = None;
        for (i, child) in children.iter().enumerate() {
            if child.is_some() {
                if single.is_some() {
                    return Compaction::None;
                }
                single = Some(i as u8);
            }
        }
        match (single, value) {
            (Some(_), Some(_)) | (None, None) => Compaction::None,
            (Some(i), None) => Compaction::Child(i),
            (None, Some(_)) => Compaction::Value,
        }
    }
}

/// A single trie node addressed by the hash of its serialization.
///
/// At least one of `hash`, `serialized` and `parsed` is always populated.
/// While `dirty` is set, `hash` and `serialized` are stale: `hash` is kept
/// only so the superseded store mapping can be deleted on the next encode.
#[derive(Debug)]
pub struct NodeRecord {
    hash: Option<Hash32>,
    serialized: Option<Bytes>,
    parsed: Option<NodeKind>,
    dirty: bool,
}

impl NodeRecord {
    /// A record holding only a content address, to be resolved lazily.
    pub fn from_hash(hash: Hash32) -> Self {
        Self { hash: Some(hash), serialized: None, parsed: None, dirty: false }
    }

    /// A record holding a cached serialization, parsed on demand. Used for
    /// children embedded inline in their parent's serialization.
    pub fn from_serialized(serialized: Bytes) -> Self {
        Self { hash: None, serialized: Some(serialized), parsed: None, dirty: false }
    }

    /// A fresh leaf; the key is normalized to terminal.
    pub fn leaf(key: NibbleKey, value: Bytes) -> Self {
        Self::from_kind(NodeKind::Leaf { key: key.to_terminal(), value })
    }

    /// A fresh extension over `child`.
    pub fn extension(key: NibbleKey, child: NodeRecord) -> Self {
        Self::from_kind(NodeKind::Extension { key, child: Box::new(child) })
    }

    /// A fresh branch with no occupants. Transient: insertions populate it
    /// before it can be encoded.
    pub fn branch() -> Self {
        Self::from_kind(NodeKind::Branch { children: Default::default(), value: None })
    }

    fn from_kind(kind: NodeKind) -> Self {
        Self { hash: None, serialized: None, parsed: Some(kind), dirty: true }
    }

    /// The stored content address, if this record has one.
    pub fn hash(&self) -> Option<&Hash32> {
        self.hash.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Fetches the serialization from the store when only the hash is held
    /// in memory.
    pub fn resolve(&mut self, store: &dyn Store) -> Result<(), TrieException> {
        if self.serialized.is_some() || self.parsed.is_some() {
            return Ok(());
        }
        let Some(hash) = &self.hash else {
            return Err(TrieException::InvalidState("empty node record"));
        };
        match store.get(hash) {
            Some(serialized) => {
                trace!(target: "mpt::node", hash = ?hash, len = serialized.len(), "resolved node");
                self.serialized = Some(serialized);
                Ok(())
            }
            None => Err(TrieException::ResolutionError(hash.clone())),
        }
    }

    /// Decodes the cached serialization into its structural view, resolving
    /// from the store first if needed.
    pub fn parse(&mut self, store: &dyn Store) -> Result<(), TrieException> {
        if self.parsed.is_some() {
            return Ok(());
        }
        self.resolve(store)?;
        let Some(serialized) = &self.serialized else {
            return Err(TrieException::InvalidState("node has no content to parse"));
        };
        let item = rlp::decode(serialized)?;
        self.parsed = Some(Self::kind_from_item(item)?);
        Ok(())
    }

    /// The parsed view, materializing it first.
    pub fn kind_mut(&mut self, store: &dyn Store) -> Result<&mut NodeKind, TrieException> {
        self.parse(store)?;
        match self.parsed.as_mut() {
            Some(kind) => Ok(kind),
            None => Err(TrieException::InvalidState("node has no parsed view")),
        }
    }

    /// Detaches the parsed view for by-value restructuring; pair with
    /// [`NodeRecord::replace_kind`].
    pub(crate) fn take_kind(&mut self, store: &dyn Store) -> Result<NodeKind, TrieException> {
        self.parse(store)?;
        match self.parsed.take() {
            Some(kind) => Ok(kind),
            None => Err(TrieException::InvalidState("node has no parsed view")),
        }
    }

    /// Reattaches a parsed view. Does not touch the dirty flag: callers
    /// that changed the structure follow up with [`NodeRecord::mark_dirty`].
    pub(crate) fn replace_kind(&mut self, kind: NodeKind) {
        self.parsed = Some(kind);
    }

    /// Records that the in-memory structure diverged from the stored form.
    /// The stale hash is kept so encode can delete the superseded mapping.
    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
        self.serialized = None;
    }

    fn kind_from_item(item: Item) -> Result<NodeKind, TrieException> {
        let Item::List(items) = item else {
            return Err(TrieException::InvalidState("node record must be a list"));
        };
        match items.len() {
            2 => {
                let mut items = items.into_iter();
                let Some(Item::Str(packed)) = items.next() else {
                    return Err(TrieException::InvalidState("node key must be a byte string"));
                };
                let key = NibbleKey::from_packed(&packed);
                let payload = items.next().ok_or(TrieException::InvalidState("missing payload"))?;
                if key.is_terminal() {
                    let Item::Str(value) = payload else {
                        return Err(TrieException::InvalidState("leaf value must be a byte string"));
                    };
                    Ok(NodeKind::Leaf { key, value })
                } else {
                    Ok(NodeKind::Extension {
                        key,
                        child: Box::new(Self::child_from_item(payload)?),
                    })
                }
            }
            17 => {
                let mut items = items.into_iter();
                let mut children: [Option<Box<NodeRecord>>; 16] = Default::default();
                for slot in children.iter_mut() {
                    let item = items.next().ok_or(TrieException::InvalidState("missing slot"))?;
                    if !matches!(&item, Item::Str(bytes) if bytes.is_empty()) {
                        *slot = Some(Box::new(Self::child_from_item(item)?));
                    }
                }
                let Some(Item::Str(value)) = items.next() else {
                    return Err(TrieException::InvalidState("branch value must be a byte string"));
                };
                let value = if value.is_empty() { None } else { Some(value) };
                Ok(NodeKind::Branch { children, value })
            }
            _ => Err(TrieException::InvalidState("node record must have 2 or 17 items")),
        }
    }

    /// Classifies a child slot item. A 32-byte string is a hash reference;
    /// a nested list is an inline child carried verbatim. Serializations
    /// of 32 bytes or more are always stored and referenced by hash, so
    /// the length check is unambiguous.
    fn child_from_item(item: Item) -> Result<NodeRecord, TrieException> {
        match item {
            Item::Str(bytes) => {
                if bytes.len() == 32 {
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(&bytes);
                    Ok(NodeRecord::from_hash(Hash32::from(hash)))
                } else {
                    Err(TrieException::InvalidState("child reference must be a 32-byte hash"))
                }
            }
            list @ Item::List(_) => {
                let mut raw = Bytes::default();
                list.encode(&mut raw);
                Ok(NodeRecord::from_serialized(raw))
            }
        }
    }

    /// Serializes this node, storing it under its hash unless it inlines.
    ///
    /// Returns the bytes the parent splices into its own serialization:
    /// the RLP of the 32-byte hash, or the literal serialization when it is
    /// shorter than 32 bytes and `force_hash` is false. The trie root is
    /// always encoded with `force_hash` set.
    ///
    /// Dirty subtrees are written children-first; the superseded store
    /// mapping, if any, is deleted before the new one is written.
    pub fn encode(
        &mut self,
        store: &mut dyn Store,
        hasher: &dyn NodeHasher,
        force_hash: bool,
    ) -> Result<Bytes, TrieException> {
        if !self.dirty {
            if let Some(hash) = &self.hash {
                let mut reference = Bytes::default();
                rlp::encode_bytes(&mut reference, &hash.0);
                return Ok(reference);
            }
            if let Some(serialized) = &self.serialized {
                if serialized.len() < 32 && !force_hash {
                    return Ok(serialized.clone());
                }
            }
        }
        let serialized = match (self.dirty, self.serialized.take()) {
            (false, Some(serialized)) => serialized,
            _ => self.serialize_kind(store, hasher)?,
        };
        if let Some(old) = self.hash.take() {
            store.delete(&old);
        }
        if serialized.len() < 32 && !force_hash {
            self.serialized = Some(serialized.clone());
            self.dirty = false;
            return Ok(serialized);
        }
        let hash = hasher.hash(&serialized);
        trace!(target: "mpt::node", hash = ?hash, len = serialized.len(), "stored node");
        store.put(hash.clone(), serialized.clone());
        let mut reference = Bytes::default();
        rlp::encode_bytes(&mut reference, &hash.0);
        self.hash = Some(hash);
        self.serialized = Some(serialized);
        self.dirty = false;
        Ok(reference)
    }

    fn serialize_kind(
        &mut self,
        store: &mut dyn Store,
        hasher: &dyn NodeHasher,
    ) -> Result<Bytes, TrieException> {
        let Some(kind) = self.parsed.as_mut() else {
            return Err(TrieException::InvalidState("no parsed view to serialize"));
        };
        let mut joined_encodings = Bytes::default();
        match kind {
            NodeKind::Leaf { key, value } => {
                rlp::encode_bytes(&mut joined_encodings, &key.to_packed());
                rlp::encode_bytes(&mut joined_encodings, value);
            }
            NodeKind::Extension { key, child } => {
                rlp::encode_bytes(&mut joined_encodings, &key.to_packed());
                let reference = child.encode(store, hasher, false)?;
                joined_encodings.extend(reference.0);
            }
            NodeKind::Branch { children, value } => {
                for slot in children.iter_mut() {
                    match slot {
                        Some(child) => {
                            let reference = child.encode(store, hasher, false)?;
                            joined_encodings.extend(reference.0);
                        }
                        None => rlp::encode_bytes(&mut joined_encodings, b""),
                    }
                }
                match value {
                    Some(value) => rlp::encode_bytes(&mut joined_encodings, value),
                    None => rlp::encode_bytes(&mut joined_encodings, b""),
                }
            }
        }
        let mut serialized = Bytes::default();
        rlp::encode_joined_encodings(&mut serialized, &joined_encodings);
        Ok(serialized)
    }

    /// Deletes this record's stored mapping when its content is being
    /// replaced. Never recurses: children may still be reachable through
    /// other roots.
    pub fn dispose(&self, store: &mut dyn Store) {
        if let Some(hash) = &self.hash {
            store.delete(hash);
        }
    }
}
