//! Read-only header chain over the store's header space.

use ethereum_types::H256;

use crate::{
    store::{self, MemoryStore},
    types::{ChainConfig, Header},
};

/// A chain abstraction answering header lookups for exactly the headers
/// hydration wrote, and carrying the chain configuration the executor
/// consults for fork activations.
///
/// The chain never fetches: a header outside the hydrated range is simply
/// not found, and callers must not ask for one.
#[derive(Debug, Clone)]
pub struct HeaderChain {
    config: ChainConfig,
    store: MemoryStore,
}

impl HeaderChain {
    /// A chain over the header space of `store`.
    pub fn new(config: ChainConfig, store: MemoryStore) -> Self {
        Self { config, store }
    }

    /// The chain configuration.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// The header at height `number`, if hydrated.
    pub fn header_by_number(&self, number: u64) -> Option<Header> {
        store::read_header_by_number(&self.store, number)
    }

    /// The header with the given hash, if hydrated.
    pub fn header_by_hash(&self, hash: H256) -> Option<Header> {
        store::read_header(&self.store, hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_for_hydrated_headers_only() {
        let store = MemoryStore::new();
        let mut parent = Header {
            number: 41,
            ..Header::default()
        };
        let child = Header {
            number: 42,
            parent_hash: parent.hash(),
            ..Header::default()
        };
        store::write_header(&store, &parent);
        store::write_header(&store, &child);

        let chain = HeaderChain::new(
            ChainConfig {
                chain_id: 1,
                london_block: None,
                shanghai_time: None,
                cancun_time: None,
                prague_time: None,
            },
            store,
        );
        assert_eq!(chain.config().chain_id, 1);
        assert_eq!(chain.header_by_number(42), Some(child.clone()));
        assert_eq!(chain.header_by_hash(child.parent_hash).as_ref(), Some(&parent));
        assert_eq!(chain.header_by_number(40), None);

        parent.number = 40;
        assert_eq!(chain.header_by_hash(parent.hash()), None);
    }
}
