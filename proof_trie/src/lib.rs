//! Reconstruction of partial Merkle-Patricia tries from Ethereum state proofs.
//!
//! An Ethereum node answering [`eth_getProof`](https://eips.ethereum.org/EIPS/eip-1186)
//! returns, per account and per storage slot, the ordered list of RLP-encoded
//! trie nodes on the path from a trie root down to the proven entry. This
//! crate turns collections of such paths into a [`NodeSet`]: a hash-addressed
//! batch of encoded nodes, keyed by the trie that owns them, that can be
//! committed into a node store and later re-walked.
//!
//! Three layers build on each other:
//! - [`path`] defines the bounded nibble sequence used both as a lookup key
//!   and as a node's position within its trie.
//! - [`node`] decodes individual RLP node encodings (branch, extension,
//!   leaf) without ever building a linked trie in memory.
//! - [`walk`] resolves a key through hash-addressed encodings, and
//!   [`node_set`] uses that walk to verify proof paths hop by hop while
//!   collecting their nodes.
//!
//! Nothing here mutates tries. Post-state roots are reached by committing
//! the union of pre- and post-proof nodes, not by replaying writes.

#![deny(rustdoc::broken_intra_doc_links)]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]

use ethereum_types::H256;

pub mod node;
pub mod node_set;
pub mod path;
pub mod proofs;
pub mod walk;

pub use node::{
    decode_node, hashed_address, hashed_slot, Account, ChildRef, Node, EMPTY_CODE_HASH,
    EMPTY_TRIE_HASH,
};
pub use node_set::{NodeSet, ProofNode, STATE_TRIE_OWNER};
pub use path::TriePath;
pub use proofs::{AccountProof, StorageProof};
pub use walk::resolve_path;

/// Errors arising while decoding, walking, or unioning proof nodes.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ProofError {
    /// A proof's root-level node does not hash to the declared trie root.
    #[error("proof for owner {owner:x} does not hash to declared root (expected {expected:x}, got {actual:x})")]
    RootMismatch {
        /// Trie the proof claims to belong to ([`STATE_TRIE_OWNER`] for the
        /// state trie, hashed account address for a storage trie).
        owner: H256,
        /// Root the caller declared.
        expected: H256,
        /// Hash of the root-level node actually supplied.
        actual: H256,
    },

    /// A node referenced on a proof path is absent from the supplied nodes.
    ///
    /// When surfaced from [`node_set`], this means a mid-path node was
    /// tampered with or dropped: its parent references a hash no supplied
    /// encoding produces.
    #[error("missing trie node {hash:x} at path '{path}'")]
    MissingNode {
        /// Hash the parent node references.
        hash: H256,
        /// Nibble position of the missing node within its trie.
        path: TriePath,
    },

    /// Two encodings were registered under the same node hash.
    #[error("conflicting encodings registered for node {hash:x}")]
    ConflictingNode {
        /// The contested node hash.
        hash: H256,
    },

    /// An account proof declares a storage root that disagrees with the
    /// storage root carried by the proven account leaf.
    #[error("account {address:x} carries storage root {actual:x} but its proof declares {declared:x}")]
    StorageRootMismatch {
        /// The proven account's address.
        address: ethereum_types::Address,
        /// Storage root the proof record declares.
        declared: H256,
        /// Storage root found in the account leaf.
        actual: H256,
    },

    /// A node encoding is neither a 17-item nor a well-formed 2-item list.
    #[error("malformed trie node encoding")]
    MalformedNode,

    /// A compact path encoding carries an unknown flag nibble.
    #[error("invalid hex-prefix encoding")]
    InvalidHexPrefix,

    /// A nibble sequence would exceed the 64 nibbles of a hashed key.
    #[error("nibble path longer than 64")]
    PathOverflow,

    /// RLP-level decoding failure.
    #[error("rlp: {0}")]
    Rlp(#[from] rlp::DecoderError),
}

/// Like `#[serde(with = "hex")`, but tolerates and emits leading `0x`
/// prefixes, and handles lists of byte blobs.
pub(crate) mod hex {
    use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer, T>(data: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: hex::ToHex,
    {
        let s = data.encode_hex::<String>();
        serializer.serialize_str(&format!("0x{s}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, T>(deserializer: D) -> Result<T, D::Error>
    where
        T: hex::FromHex,
        T::Error: std::fmt::Display,
    {
        let s = String::deserialize(deserializer)?;
        match s.strip_prefix("0x") {
            Some(rest) => T::from_hex(rest),
            None => T::from_hex(&*s),
        }
        .map_err(D::Error::custom)
    }

    pub mod list {
        use serde::{de::Error as _, ser::SerializeSeq as _, Deserialize as _, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            data: &[Vec<u8>],
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            let mut seq = serializer.serialize_seq(Some(data.len()))?;
            for blob in data {
                seq.serialize_element(&format!("0x{}", hex::encode(blob)))?;
            }
            seq.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<Vec<u8>>, D::Error> {
            Vec::<String>::deserialize(deserializer)?
                .iter()
                .map(|s| {
                    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(D::Error::custom)
                })
                .collect()
        }
    }
}
