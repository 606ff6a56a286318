//! Decoding of individual RLP trie-node encodings.
//!
//! Nodes are never linked into an in-memory trie here. Each encoding is
//! decoded on its own, and children are kept as [`ChildRef`]s: a 32-byte
//! hash for nodes that live in the backing store, or the raw bytes of a
//! short node embedded directly in its parent.

use ethereum_types::{Address, H256, U256};
use rlp::{Prototype, Rlp, RlpStream};

use crate::{path::TriePath, ProofError};

/// The root hash of an empty trie (`keccak256(rlp(""))`).
pub const EMPTY_TRIE_HASH: H256 = H256([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
]);

/// The code hash of an account without code (`keccak256("")`).
pub const EMPTY_CODE_HASH: H256 = H256([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
]);

/// Reference to a child node inside a branch or extension encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildRef {
    /// No child at this position.
    Empty,
    /// Child stored out-of-line, addressed by the hash of its encoding.
    Hash(H256),
    /// Child shorter than 32 bytes, embedded verbatim in the parent.
    Inline(Vec<u8>),
}

/// A decoded trie node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// 17-item node: one child per nibble, plus a value.
    Branch {
        /// Children indexed by nibble.
        children: Box<[ChildRef; 16]>,
        /// Value stored at this (even-length) key, empty in state tries.
        value: Vec<u8>,
    },
    /// 2-item node forwarding a shared nibble run to a single child.
    Extension {
        /// The shared nibble run.
        path: TriePath,
        /// The forwarded-to child.
        child: ChildRef,
    },
    /// 2-item node terminating a key with its value.
    Leaf {
        /// Remaining nibbles of the key.
        path: TriePath,
        /// RLP value payload (an [`Account`] in the state trie).
        value: Vec<u8>,
    },
}

/// Decodes one RLP node encoding.
pub fn decode_node(encoded: &[u8]) -> Result<Node, ProofError> {
    let rlp = Rlp::new(encoded);
    match rlp.prototype()? {
        Prototype::List(17) => {
            let mut children = Vec::with_capacity(16);
            for ix in 0..16 {
                children.push(child_ref(&rlp.at(ix)?)?);
            }
            Ok(Node::Branch {
                children: Box::new(children.try_into().expect("exactly sixteen children")),
                value: rlp.at(16)?.data()?.to_vec(),
            })
        }
        Prototype::List(2) => {
            let (path, is_leaf) = TriePath::from_hex_prefix(rlp.at(0)?.data()?)?;
            Ok(match is_leaf {
                true => Node::Leaf {
                    path,
                    value: rlp.at(1)?.data()?.to_vec(),
                },
                false => Node::Extension {
                    path,
                    child: child_ref(&rlp.at(1)?)?,
                },
            })
        }
        _ => Err(ProofError::MalformedNode),
    }
}

fn child_ref(item: &Rlp<'_>) -> Result<ChildRef, ProofError> {
    if item.is_list() {
        return Ok(ChildRef::Inline(item.as_raw().to_vec()));
    }
    let data = item.data()?;
    match data.len() {
        0 => Ok(ChildRef::Empty),
        32 => Ok(ChildRef::Hash(H256::from_slice(data))),
        _ => Err(ProofError::MalformedNode),
    }
}

/// The state-trie leaf payload of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    /// Transaction count.
    pub nonce: U256,
    /// Balance in wei.
    pub balance: U256,
    /// Root of the account's storage trie.
    pub storage_root: H256,
    /// Hash of the account's bytecode.
    pub code_hash: H256,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            nonce: U256::zero(),
            balance: U256::zero(),
            storage_root: EMPTY_TRIE_HASH,
            code_hash: EMPTY_CODE_HASH,
        }
    }
}

impl Account {
    /// Whether this account has associated bytecode.
    pub fn has_code(&self) -> bool {
        self.code_hash != EMPTY_CODE_HASH
    }
}

impl rlp::Encodable for Account {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4)
            .append(&self.nonce)
            .append(&self.balance)
            .append(&self.storage_root)
            .append(&self.code_hash);
    }
}

impl rlp::Decodable for Account {
    fn decode(rlp: &Rlp) -> Result<Self, rlp::DecoderError> {
        Ok(Self {
            nonce: rlp.val_at(0)?,
            balance: rlp.val_at(1)?,
            storage_root: rlp.val_at(2)?,
            code_hash: rlp.val_at(3)?,
        })
    }
}

/// Hashed location of `address` in the state trie.
pub fn hashed_address(address: Address) -> H256 {
    keccak_hash::keccak(address)
}

/// Hashed location of `slot` in a storage trie.
pub fn hashed_slot(slot: H256) -> H256 {
    keccak_hash::keccak(slot)
}
