//! Owner-keyed batches of proof nodes, and their construction from
//! state-transition proofs.

use std::collections::{btree_map::Entry, BTreeMap};

use ethereum_types::H256;
use keccak_hash::keccak;
use log::debug;

use crate::{
    node::{hashed_address, hashed_slot, Account, EMPTY_TRIE_HASH},
    path::TriePath,
    proofs::AccountProof,
    walk::resolve_path,
    ProofError,
};

/// Owner key under which state-trie nodes are filed.
///
/// Storage-trie nodes are filed under the hashed address of the account
/// that owns them.
pub const STATE_TRIE_OWNER: H256 = H256::zero();

/// One encoded node together with its position in its trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofNode {
    /// Nibble prefix from the trie root to this node.
    pub path: TriePath,
    /// The node's RLP encoding.
    pub encoded: Vec<u8>,
}

/// A hash-addressed batch of trie nodes to be committed under a root
/// transition.
///
/// Nodes are deduplicated by `(owner, node hash)`; iteration order is the
/// byte order of the keys and carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet {
    tries: BTreeMap<H256, BTreeMap<H256, ProofNode>>,
}

impl NodeSet {
    /// Registers one node, returning whether it was new.
    ///
    /// Registering a different encoding under an already-present hash is a
    /// hard error: the proof material is internally inconsistent.
    pub fn insert(
        &mut self,
        owner: H256,
        path: TriePath,
        encoded: Vec<u8>,
    ) -> Result<bool, ProofError> {
        let hash = keccak(&encoded);
        match self.tries.entry(owner).or_default().entry(hash) {
            Entry::Occupied(prev) => match prev.get().encoded == encoded {
                true => Ok(false),
                false => Err(ProofError::ConflictingNode { hash }),
            },
            Entry::Vacant(slot) => {
                slot.insert(ProofNode { path, encoded });
                Ok(true)
            }
        }
    }

    /// Every `(owner, node hash, node)` entry.
    pub fn iter(&self) -> impl Iterator<Item = (H256, H256, &ProofNode)> + '_ {
        self.tries
            .iter()
            .flat_map(|(owner, nodes)| nodes.iter().map(|(hash, node)| (*owner, *hash, node)))
    }

    /// Every `(node hash, encoding)` pair, across owners.
    ///
    /// A node shared between owners is yielded once per owner; consumers
    /// installing into a hash-addressed store overwrite with equal bytes.
    pub fn nodes(&self) -> impl Iterator<Item = (H256, &[u8])> + '_ {
        self.iter()
            .map(|(_, hash, node)| (hash, node.encoded.as_slice()))
    }

    /// Looks up one node by owner and hash.
    pub fn get(&self, owner: H256, hash: H256) -> Option<&ProofNode> {
        self.tries.get(&owner)?.get(&hash)
    }

    /// Total number of registered `(owner, node)` entries.
    pub fn len(&self) -> usize {
        self.tries.values().map(BTreeMap::len).sum()
    }

    /// Whether no node is registered.
    pub fn is_empty(&self) -> bool {
        self.tries.values().all(BTreeMap::is_empty)
    }

    /// Builds the node set bracketing one state transition.
    ///
    /// Every path in `pre_proofs` must verify against `pre_root` and every
    /// path in `post_proofs` against `post_root`; committing the union
    /// under the transition makes any pre-proven key readable and the
    /// post-state root reachable.
    pub fn from_state_transition_proofs(
        pre_root: H256,
        post_root: H256,
        pre_proofs: &[AccountProof],
        post_proofs: &[AccountProof],
    ) -> Result<Self, ProofError> {
        let mut set = Self::default();
        for (root, proofs) in [(pre_root, pre_proofs), (post_root, post_proofs)] {
            for proof in proofs {
                set.ingest_account_proof(root, proof)?;
            }
        }
        debug!(
            "collected {} nodes from {} pre and {} post account proofs",
            set.len(),
            pre_proofs.len(),
            post_proofs.len(),
        );
        Ok(set)
    }

    fn ingest_account_proof(
        &mut self,
        state_root: H256,
        proof: &AccountProof,
    ) -> Result<(), ProofError> {
        let account_key = TriePath::from_hash(hashed_address(proof.address));
        let leaf = self.ingest_path(STATE_TRIE_OWNER, state_root, &account_key, &proof.proof)?;

        // Where the account is proven present, its leaf pins the storage
        // root the storage paths must verify against.
        if let Some(encoded) = leaf {
            let account = rlp::decode::<Account>(&encoded)?;
            if account.storage_root != proof.storage_hash {
                return Err(ProofError::StorageRootMismatch {
                    address: proof.address,
                    declared: proof.storage_hash,
                    actual: account.storage_root,
                });
            }
        }

        let owner = hashed_address(proof.address);
        for storage in &proof.storage_proofs {
            let key = TriePath::from_hash(hashed_slot(storage.key));
            self.ingest_path(owner, proof.storage_hash, &key, &storage.proof)?;
        }
        Ok(())
    }

    /// Verifies one proof path hop by hop and registers its nodes.
    ///
    /// Returns the proven value when the path is an inclusion proof.
    fn ingest_path(
        &mut self,
        owner: H256,
        root: H256,
        key: &TriePath,
        proof: &[Vec<u8>],
    ) -> Result<Option<Vec<u8>>, ProofError> {
        if proof.is_empty() {
            return match root == EMPTY_TRIE_HASH || root == H256::zero() {
                true => Ok(None),
                false => Err(ProofError::RootMismatch {
                    owner,
                    expected: root,
                    actual: EMPTY_TRIE_HASH,
                }),
            };
        }

        let actual = keccak(&proof[0]);
        if actual != root {
            return Err(ProofError::RootMismatch {
                owner,
                expected: root,
                actual,
            });
        }

        let by_hash = proof
            .iter()
            .map(|node| (keccak(node), node.as_slice()))
            .collect::<BTreeMap<_, _>>();

        let mut visited = vec![];
        let value = resolve_path(
            root,
            key,
            |hash| by_hash.get(&hash).map(|node| node.to_vec()),
            |path, encoded| visited.push((*path, encoded.to_vec())),
        )?;
        for (path, encoded) in visited {
            self.insert(owner, path, encoded)?;
        }
        Ok(value)
    }
}
