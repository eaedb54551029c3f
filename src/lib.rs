//! Persistent Merkle Patricia Trie.
//!
//! An authenticated key-value map in which every node is addressed by the
//! keccak256 hash of its RLP serialization, and the hash of the root node
//! authenticates the entire map. Inserting or removing a key produces a
//! new root hash; reloading any previously observed root hash against the
//! same backing store yields the same logical map.
//!
//! The backing store and the node hasher are ports ([`Store`],
//! [`crypto::NodeHasher`]); [`MemoryStore`] and keccak256 are the
//! reference implementations.

pub mod bytes;
pub mod crypto;
pub mod exceptions;
pub mod nibbles;
pub mod node;
pub mod rlp;
pub mod store;
pub mod trie;

pub use bytes::Bytes;
pub use crypto::{Hash32, Keccak256, keccak256};
pub use exceptions::TrieException;
pub use nibbles::NibbleKey;
pub use store::{MemoryStore, Store};
pub use trie::Trie;
