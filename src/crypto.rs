//! Hashing port and its keccak256 reference implementation.

use tiny_keccak::Hasher;

use crate::bytes::fmt_hex;

/// 32-byte content address of a stored node serialization.
#[derive(Clone, Default, PartialEq, PartialOrd, Eq, Ord, Hash)]
pub struct Hash32(pub(crate) [u8; 32]);

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buf = [0; 32 * 2 + 2];
        f.write_str(fmt_hex(&mut buf, &self.0))
    }
}

impl std::ops::Deref for Hash32 {
    type Target = [u8; 32];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; 32]> for Hash32 {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

/// Deterministic, collision-resistant hash over node serializations.
///
/// The 32-byte output length is load-bearing: node records distinguish a
/// hash reference from an inline encoding purely by blob length.
pub trait NodeHasher {
    fn hash(&self, buffer: &[u8]) -> Hash32;
}

/// Keccak-256, the canonical node hasher.
#[derive(Debug, Clone, Copy, Default)]
pub struct Keccak256;

impl NodeHasher for Keccak256 {
    fn hash(&self, buffer: &[u8]) -> Hash32 {
        keccak256(buffer)
    }
}

/// Computes the keccak256 hash of the input `buffer`.
pub fn keccak256(buffer: &[u8]) -> Hash32 {
    let mut hasher = tiny_keccak::Keccak::v256();
    hasher.update(buffer);
    let mut output = [0; 32];
    hasher.finalize(&mut output);
    Hash32(output)
}
