//! Content-addressed trie-node storage over the in-memory store.

use ethereum_types::H256;
use proof_trie::{NodeSet, EMPTY_TRIE_HASH};
use tracing::debug;

use crate::store::MemoryStore;

/// Hash-addressed node database with batch commits.
///
/// Nodes are stored under their raw 32-byte keccak hash in the same flat
/// store that carries the header and code spaces, so the hydration stage
/// can reach everything through [`TrieDb::disk`].
#[derive(Debug, Clone)]
pub struct TrieDb {
    disk: MemoryStore,
}

/// Failures of the node database.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrieDbError {
    /// A node was requested that no commit installed.
    #[error("missing trie node {0:x}")]
    MissingNode(H256),

    /// A committed batch does not make its declared root resolvable.
    #[error(
        "committing {nodes} nodes for block {block_number} leaves root {root:x} unresolvable"
    )]
    UnresolvableRoot {
        /// The root the transition declared.
        root: H256,
        /// Number of nodes in the rejected batch.
        nodes: usize,
        /// Accounting label of the rejected transition.
        block_number: u64,
    },
}

impl TrieDb {
    /// A node database over `disk`.
    pub fn new(disk: MemoryStore) -> Self {
        Self { disk }
    }

    /// The backing store, shared with the header and code spaces.
    pub fn disk(&self) -> &MemoryStore {
        &self.disk
    }

    /// Returns the encoding committed under `hash`.
    pub fn get(&self, hash: H256) -> Result<Vec<u8>, TrieDbError> {
        self.disk
            .get(hash.as_bytes())
            .ok_or(TrieDbError::MissingNode(hash))
    }

    /// Whether `hash` is resolvable.
    pub fn contains(&self, hash: H256) -> bool {
        self.disk.get(hash.as_bytes()).is_some()
    }

    /// Atomically installs every node of `nodes` under the transition
    /// `parent_root -> new_root` labelled with `block_number`.
    ///
    /// A no-op when the roots agree and the batch is empty. Fails when the
    /// batch leaves `new_root` unresolvable: the proof set the batch was
    /// built from is inconsistent with the declared root.
    pub fn update(
        &self,
        parent_root: H256,
        new_root: H256,
        block_number: u64,
        nodes: &NodeSet,
    ) -> Result<(), TrieDbError> {
        if parent_root == new_root && nodes.is_empty() {
            return Ok(());
        }
        for (hash, encoded) in nodes.nodes() {
            self.disk.put(hash.as_bytes(), encoded);
        }
        if new_root != EMPTY_TRIE_HASH && !self.contains(new_root) {
            return Err(TrieDbError::UnresolvableRoot {
                root: new_root,
                nodes: nodes.len(),
                block_number,
            });
        }
        debug!(
            nodes = nodes.len(),
            block_number, "committed trie node batch"
        );
        Ok(())
    }
}
