//! Proof records in the shape produced by `eth_getProof`.

use ethereum_types::{Address, H256};
use serde::{Deserialize, Serialize};

/// Merkle paths covering one account and a subset of its storage slots.
///
/// `proof` runs from the state root to the account's node; each entry of
/// [`Self::storage_proofs`] runs from [`Self::storage_hash`] to one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProof {
    /// The proven account's address.
    pub address: Address,
    /// Ordered node encodings from the state root to the account.
    #[serde(with = "crate::hex::list")]
    pub proof: Vec<Vec<u8>>,
    /// Root of the account's storage trie, as declared by the responder.
    pub storage_hash: H256,
    /// Merkle paths for the touched storage slots.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage_proofs: Vec<StorageProof>,
}

/// Merkle path for one storage slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProof {
    /// The (unhashed) storage slot key.
    pub key: H256,
    /// Ordered node encodings from the storage root to the slot.
    #[serde(with = "crate::hex::list")]
    pub proof: Vec<Vec<u8>>,
}
