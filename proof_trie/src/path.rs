//! Bounded nibble sequences used as trie keys and node positions.

use core::fmt;

use copyvec::CopyVec;
use ethereum_types::H256;
use u4::{AsNibbles, U4};

use crate::ProofError;

/// Bounded sequence of [`U4`] nibbles.
///
/// Doubles as a full lookup key (64 nibbles for a hashed address or hashed
/// storage slot) and as the position of a node on the path from its trie
/// root (any shorter prefix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TriePath(CopyVec<U4, 64>);

impl fmt::Display for TriePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for u in self.0 {
            f.write_fmt(format_args!("{u:x}"))?
        }
        Ok(())
    }
}

impl TriePath {
    /// Builds a path from at most 64 nibbles.
    pub fn new(components: impl IntoIterator<Item = U4>) -> Result<Self, ProofError> {
        match CopyVec::try_from_iter(components) {
            Ok(it) => Ok(Self(it)),
            Err(_) => Err(ProofError::PathOverflow),
        }
    }

    /// The 64-nibble key corresponding to a 32-byte hash.
    pub fn from_hash(H256(bytes): H256) -> Self {
        Self::new(AsNibbles(bytes)).expect("32 bytes is 64 nibbles, which fits")
    }

    /// Packs a full-length path back into a hash.
    ///
    /// Returns [`None`] for paths shorter than 64 nibbles.
    pub fn into_hash(self) -> Option<H256> {
        let Self(nibbles) = self;
        let mut bytes = [0; 32];
        AsNibbles(&mut bytes).pack_from_slice(&nibbles.into_array()?);
        Some(H256(bytes))
    }

    /// Number of nibbles in the path.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path holds no nibbles (the position of a root node).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The nibbles of this path.
    pub fn nibbles(&self) -> &[U4] {
        &self.0
    }

    /// Appends one nibble.
    pub fn push(&mut self, nibble: U4) -> Result<(), ProofError> {
        self.0.try_push(nibble).map_err(|_| ProofError::PathOverflow)
    }

    /// Appends every nibble of `other`.
    pub fn extend(&mut self, other: &TriePath) -> Result<(), ProofError> {
        for nibble in other.0 {
            self.push(nibble)?;
        }
        Ok(())
    }

    /// Decodes a compact (hex-prefix) path encoding.
    ///
    /// Returns the path and whether the flag nibble marked a leaf.
    pub fn from_hex_prefix(encoded: &[u8]) -> Result<(Self, bool), ProofError> {
        let first = *encoded.first().ok_or(ProofError::InvalidHexPrefix)?;
        let is_leaf = match first >> 4 {
            0 | 1 => false,
            2 | 3 => true,
            _ => return Err(ProofError::InvalidHexPrefix),
        };
        let mut path = Self::default();
        if (first >> 4) & 1 == 1 {
            path.push(U4::new(first & 0x0f).expect("masked to four bits"))?;
        }
        for byte in &encoded[1..] {
            path.push(U4::new(byte >> 4).expect("shifted to four bits"))?;
            path.push(U4::new(byte & 0x0f).expect("masked to four bits"))?;
        }
        Ok((path, is_leaf))
    }

    /// Encodes this path with the compact (hex-prefix) scheme.
    pub fn to_hex_prefix(&self, is_leaf: bool) -> Vec<u8> {
        let odd = self.len() % 2 == 1;
        let flag = match (is_leaf, odd) {
            (false, false) => 0u8,
            (false, true) => 1,
            (true, false) => 2,
            (true, true) => 3,
        };
        let mut nibbles = self.0.iter().map(|it| *it as u8);
        let mut out = Vec::with_capacity(1 + self.len() / 2);
        match odd {
            true => out.push(flag << 4 | nibbles.next().expect("odd length implies non-empty")),
            false => out.push(flag << 4),
        }
        let rest = nibbles.collect::<Vec<_>>();
        for pair in rest.chunks(2) {
            out.push(pair[0] << 4 | pair[1]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_round_trip() {
        assert_eq!(TriePath::new([]).unwrap().into_hash(), None);
        let h = H256(core::array::from_fn(|ix| ix as u8));
        assert_eq!(TriePath::from_hash(h).into_hash(), Some(h));
        assert_eq!(TriePath::from_hash(h).len(), 64);
    }

    #[test]
    fn hex_prefix_round_trip() {
        for (nibbles, is_leaf) in [
            (vec![], false),
            (vec![0x1], false),
            (vec![0x1, 0x2], true),
            (vec![0xf, 0x0, 0xa], true),
            (vec![0x0, 0x1, 0x2, 0x3], false),
        ] {
            let path =
                TriePath::new(nibbles.iter().map(|it| U4::new(*it).unwrap())).unwrap();
            let encoded = path.to_hex_prefix(is_leaf);
            assert_eq!(
                TriePath::from_hex_prefix(&encoded).unwrap(),
                (path, is_leaf),
            );
        }
    }

    #[test]
    fn hex_prefix_flags() {
        // Worked examples from the yellow paper's appendix C.
        let even_ext =
            TriePath::new([U4::new(1).unwrap(), U4::new(2).unwrap()]).unwrap();
        assert_eq!(even_ext.to_hex_prefix(false), vec![0x00, 0x12]);
        let odd_leaf = TriePath::new([U4::new(0xf).unwrap()]).unwrap();
        assert_eq!(odd_leaf.to_hex_prefix(true), vec![0x3f]);
    }

    #[test]
    fn display_is_lower_hex() {
        let path = TriePath::new(
            [0x0, 0xa, 0xf].map(|it| U4::new(it).unwrap()),
        )
        .unwrap();
        assert_eq!(path.to_string(), "0af");
    }

    #[test]
    fn overflow_is_reported() {
        let mut path = TriePath::from_hash(H256::zero());
        assert_eq!(path.push(u4::u4!(0)), Err(ProofError::PathOverflow));
    }
}
