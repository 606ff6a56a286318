//! The trie-backed state database and its access-tracking decorator.
//!
//! Reads are expressed against a trait so the tracking decorator composes
//! at compile time. Every method takes a [`NodeObserver`]: the database
//! invokes it once per trie node it resolves, which is how both the
//! executor's witness and the diagnostic access tracker see traffic
//! without owning the database.

use std::collections::BTreeMap;

use ethereum_types::{Address, H256};
use keccak_hash::keccak;
use parking_lot::Mutex;
use proof_trie::{
    hashed_address, hashed_slot, resolve_path, Account, ProofError, TriePath, STATE_TRIE_OWNER,
};
use std::sync::Arc;

use crate::{store, triedb::TrieDb};

/// Observer of individual trie-node resolutions.
pub trait NodeObserver {
    /// Called once per resolved node with the owning trie, the node's
    /// position, and its encoding.
    fn on_node(&mut self, owner: H256, path: &TriePath, encoded: &[u8]);
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl NodeObserver for NoopObserver {
    fn on_node(&mut self, _owner: H256, _path: &TriePath, _encoded: &[u8]) {}
}

/// Failures while reading state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// A node on the resolution path is absent from the trie database.
    ///
    /// Carries the owning trie and nibble position so an incomplete
    /// preflight can be attributed to a concrete account or slot.
    #[error("missing trie node {hash:x} for owner {owner:x} at path '{path}'")]
    MissingNode {
        /// [`STATE_TRIE_OWNER`] or the hashed account address.
        owner: H256,
        /// Position of the missing node in its trie.
        path: TriePath,
        /// Hash the walk could not resolve.
        hash: H256,
    },

    /// A bytecode was requested that hydration never wrote.
    #[error("missing bytecode {0:x}")]
    MissingCode(H256),

    /// A resolved node or leaf payload failed to decode.
    #[error(transparent)]
    Proof(#[from] ProofError),
}

/// Conventional read interface of a trie-backed state database.
pub trait StateDatabase {
    /// Resolves the root node at `root`, erroring when it is unreachable.
    fn open(&self, root: H256, obs: &mut dyn NodeObserver) -> Result<(), StateError>;

    /// Reads the account at `address` from the state trie rooted at
    /// `root`.
    fn account(
        &self,
        root: H256,
        address: Address,
        obs: &mut dyn NodeObserver,
    ) -> Result<Option<Account>, StateError>;

    /// Reads the RLP value of `slot` from the storage trie of the account
    /// hashed as `owner`, rooted at `storage_root`.
    fn storage(
        &self,
        owner: H256,
        storage_root: H256,
        slot: H256,
        obs: &mut dyn NodeObserver,
    ) -> Result<Option<Vec<u8>>, StateError>;

    /// Reads a bytecode from the code space.
    fn code(&self, code_hash: H256) -> Result<Vec<u8>, StateError>;
}

/// The conventional implementation: nibble-walks through the hash-
/// addressed [`TrieDb`].
#[derive(Debug, Clone)]
pub struct TrieStateDb {
    triedb: TrieDb,
}

impl TrieStateDb {
    /// A state database over `triedb`.
    pub fn new(triedb: TrieDb) -> Self {
        Self { triedb }
    }

    /// The underlying node database.
    pub fn trie_db(&self) -> &TrieDb {
        &self.triedb
    }

    fn walk(
        &self,
        owner: H256,
        root: H256,
        key: &TriePath,
        obs: &mut dyn NodeObserver,
    ) -> Result<Option<Vec<u8>>, StateError> {
        resolve_path(
            root,
            key,
            |hash| self.triedb.get(hash).ok(),
            |path, encoded| obs.on_node(owner, path, encoded),
        )
        .map_err(|err| match err {
            ProofError::MissingNode { hash, path } => StateError::MissingNode { owner, path, hash },
            other => StateError::Proof(other),
        })
    }
}

impl StateDatabase for TrieStateDb {
    fn open(&self, root: H256, obs: &mut dyn NodeObserver) -> Result<(), StateError> {
        if root == proof_trie::EMPTY_TRIE_HASH {
            return Ok(());
        }
        let position = TriePath::default();
        let encoded = self
            .triedb
            .get(root)
            .map_err(|_| StateError::MissingNode {
                owner: STATE_TRIE_OWNER,
                path: position,
                hash: root,
            })?;
        obs.on_node(STATE_TRIE_OWNER, &position, &encoded);
        Ok(())
    }

    fn account(
        &self,
        root: H256,
        address: Address,
        obs: &mut dyn NodeObserver,
    ) -> Result<Option<Account>, StateError> {
        let key = TriePath::from_hash(hashed_address(address));
        let value = self.walk(STATE_TRIE_OWNER, root, &key, obs)?;
        Ok(match value {
            Some(encoded) => Some(rlp::decode::<Account>(&encoded).map_err(ProofError::from)?),
            None => None,
        })
    }

    fn storage(
        &self,
        owner: H256,
        storage_root: H256,
        slot: H256,
        obs: &mut dyn NodeObserver,
    ) -> Result<Option<Vec<u8>>, StateError> {
        let key = TriePath::from_hash(hashed_slot(slot));
        self.walk(owner, storage_root, &key, obs)
    }

    fn code(&self, code_hash: H256) -> Result<Vec<u8>, StateError> {
        store::read_code(self.triedb.disk(), code_hash)
            .ok_or(StateError::MissingCode(code_hash))
    }
}

/// Per-trie record of the nodes returned while resolving keys.
#[derive(Debug, Clone, Default)]
pub struct TrieAccessTracker {
    /// For every resolved key, the node hashes returned, in resolution
    /// order.
    pub accesses: BTreeMap<TriePath, Vec<H256>>,
    /// Encodings of every node seen, deduplicated by hash.
    pub nodes: BTreeMap<H256, Vec<u8>>,
}

/// Per-invocation recorder of every node the state database resolves.
///
/// This is a shadow of the executor's own witness, kept for cross-checking
/// and for attributing missing-node failures; it never feeds the output
/// record.
#[derive(Debug, Clone, Default)]
pub struct AccessTrackerManager {
    inner: Arc<Mutex<BTreeMap<H256, TrieAccessTracker>>>,
}

impl AccessTrackerManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one resolved node under `(owner, key)`.
    pub fn record(&self, owner: H256, key: &TriePath, encoded: &[u8]) {
        let hash = keccak(encoded);
        let mut tries = self.inner.lock();
        let tracker = tries.entry(owner).or_default();
        tracker
            .nodes
            .entry(hash)
            .or_insert_with(|| encoded.to_vec());
        tracker.accesses.entry(*key).or_default().push(hash);
    }

    /// Snapshot of every tracked trie.
    pub fn snapshot(&self) -> BTreeMap<H256, TrieAccessTracker> {
        self.inner.lock().clone()
    }

    /// Total number of distinct nodes recorded, across tries.
    pub fn node_count(&self) -> usize {
        self.inner.lock().values().map(|t| t.nodes.len()).sum()
    }
}

/// Decorator adding access tracking to any [`StateDatabase`].
///
/// Behaves indistinguishably from the wrapped database; the only effect is
/// that every resolved node is also forwarded to the
/// [`AccessTrackerManager`], keyed by the lookup that triggered it.
#[derive(Debug, Clone)]
pub struct AccessTrackedStateDb<D> {
    inner: D,
    trackers: AccessTrackerManager,
}

impl<D> AccessTrackedStateDb<D> {
    /// Wraps `inner`, recording into `trackers`.
    pub fn new(inner: D, trackers: AccessTrackerManager) -> Self {
        Self { inner, trackers }
    }

    /// The wrapped database.
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

struct TrackingObserver<'a> {
    trackers: &'a AccessTrackerManager,
    key: TriePath,
    inner: &'a mut dyn NodeObserver,
}

impl NodeObserver for TrackingObserver<'_> {
    fn on_node(&mut self, owner: H256, path: &TriePath, encoded: &[u8]) {
        self.trackers.record(owner, &self.key, encoded);
        self.inner.on_node(owner, path, encoded);
    }
}

impl<D: StateDatabase> StateDatabase for AccessTrackedStateDb<D> {
    fn open(&self, root: H256, obs: &mut dyn NodeObserver) -> Result<(), StateError> {
        let mut tee = TrackingObserver {
            trackers: &self.trackers,
            key: TriePath::default(),
            inner: obs,
        };
        self.inner.open(root, &mut tee)
    }

    fn account(
        &self,
        root: H256,
        address: Address,
        obs: &mut dyn NodeObserver,
    ) -> Result<Option<Account>, StateError> {
        let mut tee = TrackingObserver {
            trackers: &self.trackers,
            key: TriePath::from_hash(hashed_address(address)),
            inner: obs,
        };
        self.inner.account(root, address, &mut tee)
    }

    fn storage(
        &self,
        owner: H256,
        storage_root: H256,
        slot: H256,
        obs: &mut dyn NodeObserver,
    ) -> Result<Option<Vec<u8>>, StateError> {
        let mut tee = TrackingObserver {
            trackers: &self.trackers,
            key: TriePath::from_hash(hashed_slot(slot)),
            inner: obs,
        };
        self.inner.storage(owner, storage_root, slot, &mut tee)
    }

    fn code(&self, code_hash: H256) -> Result<Vec<u8>, StateError> {
        self.inner.code(code_hash)
    }
}

#[cfg(test)]
mod tests {
    use proof_trie::{NodeSet, EMPTY_TRIE_HASH};

    use super::*;
    use crate::store::MemoryStore;

    /// A state trie holding exactly one account: the root node is the
    /// account's leaf.
    fn single_account_db(address: Address, account: Account) -> (TrieStateDb, H256) {
        let key = TriePath::from_hash(hashed_address(address));
        let mut leaf = rlp::RlpStream::new_list(2);
        leaf.append(&key.to_hex_prefix(true))
            .append(&rlp::encode(&account).to_vec());
        let leaf = leaf.out().to_vec();
        let root = keccak(&leaf);

        let mut set = NodeSet::default();
        set.insert(STATE_TRIE_OWNER, TriePath::default(), leaf)
            .unwrap();
        let triedb = TrieDb::new(MemoryStore::new());
        triedb.update(root, root, 0, &set).unwrap();
        (TrieStateDb::new(triedb), root)
    }

    #[test]
    fn account_reads_resolve_and_observe() {
        let address = Address::repeat_byte(0x01);
        let account = Account {
            balance: 999.into(),
            ..Account::default()
        };
        let (db, root) = single_account_db(address, account);

        let mut seen = vec![];
        struct Collect<'a>(&'a mut Vec<(H256, TriePath)>);
        impl NodeObserver for Collect<'_> {
            fn on_node(&mut self, owner: H256, path: &TriePath, _encoded: &[u8]) {
                self.0.push((owner, *path));
            }
        }
        let got = db
            .account(root, address, &mut Collect(&mut seen))
            .unwrap();
        assert_eq!(got, Some(account));
        assert_eq!(seen, [(STATE_TRIE_OWNER, TriePath::default())]);

        let absent = db
            .account(root, Address::repeat_byte(0x02), &mut NoopObserver)
            .unwrap();
        assert_eq!(absent, None);
    }

    #[test]
    fn unresolvable_root_is_attributed() {
        let db = TrieStateDb::new(TrieDb::new(MemoryStore::new()));
        let root = keccak(b"never hydrated");
        let err = db.open(root, &mut NoopObserver).unwrap_err();
        assert_eq!(
            err,
            StateError::MissingNode {
                owner: STATE_TRIE_OWNER,
                path: TriePath::default(),
                hash: root,
            }
        );
        assert!(db.open(EMPTY_TRIE_HASH, &mut NoopObserver).is_ok());
    }

    #[test]
    fn decorator_records_into_the_manager() {
        let address = Address::repeat_byte(0x03);
        let (db, root) = single_account_db(address, Account::default());
        let trackers = AccessTrackerManager::new();
        let tracked = AccessTrackedStateDb::new(db, trackers.clone());

        tracked
            .account(root, address, &mut NoopObserver)
            .unwrap();
        // Repeated lookups coalesce on the same node entry.
        tracked
            .account(root, address, &mut NoopObserver)
            .unwrap();

        assert_eq!(trackers.node_count(), 1);
        let snapshot = trackers.snapshot();
        let tracker = &snapshot[&STATE_TRIE_OWNER];
        let key = TriePath::from_hash(hashed_address(address));
        assert_eq!(tracker.accesses[&key].len(), 2);
        assert_eq!(tracker.nodes[&root][..], rlp_of_root(&tracked, root)[..]);
    }

    fn rlp_of_root(db: &AccessTrackedStateDb<TrieStateDb>, root: H256) -> Vec<u8> {
        db.inner().trie_db().get(root).unwrap()
    }

    #[test]
    fn missing_code_is_reported() {
        let db = TrieStateDb::new(TrieDb::new(MemoryStore::new()));
        let hash = keccak(b"some contract");
        assert_eq!(db.code(hash), Err(StateError::MissingCode(hash)));
        crate::store::write_code(db.trie_db().disk(), b"some contract");
        assert_eq!(db.code(hash).unwrap(), b"some contract");
    }
}
