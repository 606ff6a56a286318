//! The flat in-memory store backing one preparation run, and the key
//! schemas layered on top of it.
//!
//! Three key spaces share the store:
//! - trie nodes, keyed by their raw 32-byte hash;
//! - headers, under `'h' || be64(number) || hash` with a reverse index
//!   `'H' || hash -> be64(number)`;
//! - bytecodes, under `'c' || code_hash`.

use ethereum_types::H256;
use keccak_hash::keccak;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

use crate::types::Header;

/// A shared handle to a flat key-value map.
///
/// Clones address the same map. One preparation run is the only writer;
/// the lock exists to keep the handle freely clonable across the context's
/// components, not for cross-thread sharing.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites `key`.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.inner.write().insert(key.into(), value.into());
    }

    /// Reads `key`.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().get(key).cloned()
    }

    /// Removes `key`.
    pub fn delete(&self, key: &[u8]) {
        self.inner.write().remove(key);
    }

    /// Number of stored entries, across all key spaces.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    fn find_with_prefix(&self, prefix: &[u8]) -> Option<Vec<u8>> {
        self.inner
            .read()
            .iter()
            .find(|(key, _)| key.starts_with(prefix))
            .map(|(_, value)| value.clone())
    }
}

fn header_key(number: u64, hash: H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 + 32);
    key.push(b'h');
    key.extend_from_slice(&number.to_be_bytes());
    key.extend_from_slice(hash.as_bytes());
    key
}

fn header_number_key(hash: H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32);
    key.push(b'H');
    key.extend_from_slice(hash.as_bytes());
    key
}

fn code_key(hash: H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32);
    key.push(b'c');
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Writes `header` into the header space, indexed both ways.
pub fn write_header(store: &MemoryStore, header: &Header) {
    let hash = header.hash();
    store.put(header_key(header.number, hash), rlp::encode(header).to_vec());
    store.put(header_number_key(hash), header.number.to_be_bytes());
}

/// Reads a header by hash.
pub fn read_header(store: &MemoryStore, hash: H256) -> Option<Header> {
    let number = store.get(&header_number_key(hash))?;
    let number = u64::from_be_bytes(number.try_into().ok()?);
    let encoded = store.get(&header_key(number, hash))?;
    rlp::decode(&encoded).ok()
}

/// Reads a header by number.
///
/// The header space carries no canonical-number index; the store is
/// scanned for the `'h' || be64(number)` prefix, which is unambiguous
/// because hydration writes one chain of headers.
pub fn read_header_by_number(store: &MemoryStore, number: u64) -> Option<Header> {
    let mut prefix = Vec::with_capacity(1 + 8);
    prefix.push(b'h');
    prefix.extend_from_slice(&number.to_be_bytes());
    let encoded = store.find_with_prefix(&prefix)?;
    rlp::decode(&encoded).ok()
}

/// Writes `code` into the code space, returning the hash it is keyed by.
pub fn write_code(store: &MemoryStore, code: &[u8]) -> H256 {
    let hash = keccak(code);
    store.put(code_key(hash), code);
    hash
}

/// Reads a bytecode by hash.
pub fn read_code(store: &MemoryStore, hash: H256) -> Option<Vec<u8>> {
    store.get(&code_key(hash))
}
