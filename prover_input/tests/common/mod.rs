//! Shared fixtures: a miniature trie compiler, a canned chain, and a
//! scripted executor standing in for the out-of-scope EVM.

use std::collections::{BTreeSet, HashMap};

use ethereum_types::{Address, H256, U256};
pub use keccak_hash::keccak as k;
use proof_trie::{
    hashed_address, hashed_slot, resolve_path, Account, AccountProof, StorageProof, TriePath,
    EMPTY_TRIE_HASH,
};
use prover_input::{
    cancel::CancelToken,
    evm::{ExecError, ExecOutput, ExecParams, Executor},
    prepare::PreparerStateDb,
    types::{Block, ChainConfig, Header, PreflightData},
};
use rlp::RlpStream;
use u4::U4;

/// Compiles sorted `(hashed key, rlp value)` pairs into the encoded nodes
/// of a Merkle-Patricia trie, for building proof material the crate can
/// verify against itself.
#[derive(Debug, Default)]
pub struct TrieBuilder {
    pairs: Vec<(H256, Vec<u8>)>,
}

/// A compiled trie: its root and every hash-addressed node encoding.
#[derive(Debug, Clone)]
pub struct BuiltTrie {
    pub root: H256,
    nodes: HashMap<H256, Vec<u8>>,
}

impl TrieBuilder {
    pub fn insert(mut self, key: H256, value: Vec<u8>) -> Self {
        self.pairs.push((key, value));
        self
    }

    pub fn build(mut self) -> BuiltTrie {
        if self.pairs.is_empty() {
            return BuiltTrie::empty();
        }
        self.pairs.sort();
        let entries = self
            .pairs
            .iter()
            .map(|(key, value)| (nibbles_of(*key), value.clone()))
            .collect::<Vec<_>>();
        let borrowed = entries
            .iter()
            .map(|(path, value)| (path.as_slice(), value.as_slice()))
            .collect::<Vec<_>>();
        let mut nodes = HashMap::new();
        let encoded = encode_subtrie(&borrowed, &mut nodes);
        let root = k(&encoded);
        nodes.insert(root, encoded);
        BuiltTrie { root, nodes }
    }
}

impl BuiltTrie {
    pub fn empty() -> Self {
        Self {
            root: EMPTY_TRIE_HASH,
            nodes: HashMap::new(),
        }
    }

    /// The ordered node path proving `key`, as `eth_getProof` would return
    /// it.
    pub fn proof(&self, key: H256) -> Vec<Vec<u8>> {
        let mut visited = vec![];
        resolve_path(
            self.root,
            &TriePath::from_hash(key),
            |hash| self.nodes.get(&hash).cloned(),
            |_, encoded| visited.push(encoded.to_vec()),
        )
        .expect("built tries are complete");
        visited
    }

    pub fn node(&self, hash: H256) -> Option<&Vec<u8>> {
        self.nodes.get(&hash)
    }
}

fn nibbles_of(key: H256) -> Vec<u8> {
    key.as_bytes()
        .iter()
        .flat_map(|byte| [byte >> 4, byte & 0x0f])
        .collect()
}

fn trie_path(nibbles: &[u8]) -> TriePath {
    TriePath::new(nibbles.iter().map(|n| U4::new(*n).unwrap())).unwrap()
}

fn encode_subtrie(entries: &[(&[u8], &[u8])], nodes: &mut HashMap<H256, Vec<u8>>) -> Vec<u8> {
    assert!(!entries.is_empty(), "subtrie must hold at least one entry");
    if entries.len() == 1 {
        let (path, value) = entries[0];
        let mut s = RlpStream::new_list(2);
        s.append(&trie_path(path).to_hex_prefix(true))
            .append(&value.to_vec());
        return s.out().to_vec();
    }

    let first = entries[0].0;
    let lcp = (0..first.len())
        .take_while(|ix| entries.iter().all(|(path, _)| path.get(*ix) == first.get(*ix)))
        .count();
    if lcp > 0 {
        let stripped = entries
            .iter()
            .map(|(path, value)| (&path[lcp..], *value))
            .collect::<Vec<_>>();
        let child = encode_subtrie(&stripped, nodes);
        let mut s = RlpStream::new_list(2);
        s.append(&trie_path(&first[..lcp]).to_hex_prefix(false));
        append_child(&mut s, child, nodes);
        return s.out().to_vec();
    }

    let mut s = RlpStream::new_list(17);
    for nibble in 0..16u8 {
        let group = entries
            .iter()
            .filter(|(path, _)| path[0] == nibble)
            .map(|(path, value)| (&path[1..], *value))
            .collect::<Vec<_>>();
        match group.is_empty() {
            true => {
                s.append_empty_data();
            }
            false => {
                let child = encode_subtrie(&group, nodes);
                append_child(&mut s, child, nodes);
            }
        }
    }
    s.append_empty_data();
    s.out().to_vec()
}

fn append_child(s: &mut RlpStream, child: Vec<u8>, nodes: &mut HashMap<H256, Vec<u8>>) {
    match child.len() < 32 {
        true => {
            s.append_raw(&child, 1);
        }
        false => {
            let hash = k(&child);
            s.append(&hash);
            nodes.insert(hash, child);
        }
    }
}

pub fn account_rlp(account: &Account) -> Vec<u8> {
    rlp::encode(account).to_vec()
}

/// Proof record for `address` out of `state`, with storage paths for
/// `slots` out of `storage`.
pub fn account_proof(
    state: &BuiltTrie,
    address: Address,
    storage: &BuiltTrie,
    slots: &[H256],
) -> AccountProof {
    AccountProof {
        address,
        proof: state.proof(hashed_address(address)),
        storage_hash: storage.root,
        storage_proofs: slots
            .iter()
            .map(|slot| StorageProof {
                key: *slot,
                proof: storage.proof(hashed_slot(*slot)),
            })
            .collect(),
    }
}

pub fn chain_config() -> ChainConfig {
    ChainConfig {
        chain_id: 1,
        london_block: Some(0),
        shanghai_time: Some(0),
        cancun_time: None,
        prague_time: None,
    }
}

/// A linked header chain; index 0 is the newest header (the parent) and
/// carries `parent_state_root`.
pub fn ancestor_chain(depth: usize, parent_state_root: H256) -> Vec<Header> {
    let base = 100u64;
    let mut headers: Vec<Header> = Vec::with_capacity(depth);
    for ix in 0..depth {
        let number = base + ix as u64;
        let mut header = Header {
            number,
            timestamp: 1_700_000_000 + number,
            gas_limit: 30_000_000,
            base_fee_per_gas: Some(U256::from(7)),
            ..Header::default()
        };
        if ix == depth - 1 {
            header.state_root = parent_state_root;
        }
        if let Some(prev) = headers.last() {
            header.parent_hash = prev.hash();
        }
        headers.push(header);
    }
    headers.reverse();
    headers
}

/// One state access a [`ScriptedExecutor`] performs, in order.
#[derive(Debug, Clone)]
pub enum Access {
    Account(Address),
    Slot(Address, H256),
    Code(H256),
    Ancestor(u64),
}

/// Stand-in for the EVM collaborator: replays a fixed access script
/// through the pre-state, then "recomputes" the post root it was
/// configured with and validates it against the header.
#[derive(Debug, Clone)]
pub struct ScriptedExecutor {
    pub accesses: Vec<Access>,
    pub post_root: H256,
}

impl ScriptedExecutor {
    pub fn new(post_root: H256, accesses: Vec<Access>) -> Self {
        Self {
            accesses,
            post_root,
        }
    }
}

impl Executor<PreparerStateDb> for ScriptedExecutor {
    fn execute(
        &self,
        cancel: &CancelToken,
        params: &ExecParams<'_, PreparerStateDb>,
    ) -> Result<ExecOutput, ExecError> {
        cancel.ensure_active()?;
        for access in &self.accesses {
            match access {
                Access::Account(address) => {
                    params.state.account(*address)?;
                }
                Access::Slot(address, slot) => {
                    params.state.storage(*address, *slot)?;
                }
                Access::Code(hash) => {
                    params.state.code(*hash)?;
                }
                Access::Ancestor(number) => {
                    let header = params
                        .chain
                        .header_by_number(*number)
                        .ok_or(ExecError::MissingAncestor(*number))?;
                    params.state.observe_header(&header);
                }
            }
        }
        if params.validate && self.post_root != params.block.header.state_root {
            return Err(ExecError::StateRootMismatch {
                computed: self.post_root,
                declared: params.block.header.state_root,
            });
        }
        Ok(ExecOutput {
            receipts: params.block.transactions.iter().map(|_| vec![0x01]).collect(),
            witness: params.state.take_witness(),
        })
    }
}

pub const CODE: &[u8] = &[0x60, 0x01, 0x54, 0x60, 0x02, 0x55];

/// A three-account world: two EOAs and a contract with two populated
/// storage slots, bracketed by a 1-wei transfer between the EOAs.
pub struct Fixture {
    pub preflight: PreflightData,
    pub pre: BuiltTrie,
    pub post: BuiltTrie,
    pub storage: BuiltTrie,
    pub alice: Address,
    pub bob: Address,
    pub contract: Address,
    pub code_hash: H256,
    pub slot1: H256,
    pub slot2: H256,
}

pub fn fixture() -> Fixture {
    let alice = Address::repeat_byte(0xa1);
    let bob = Address::repeat_byte(0xb0);
    let contract = Address::repeat_byte(0xcc);
    let code_hash = k(CODE);
    let slot1 = H256::from_low_u64_be(1);
    let slot2 = H256::from_low_u64_be(2);

    let storage = TrieBuilder::default()
        .insert(hashed_slot(slot1), rlp::encode(&U256::from(42)).to_vec())
        .insert(hashed_slot(slot2), rlp::encode(&U256::from(7)).to_vec())
        .build();

    let alice_pre = Account {
        nonce: 1.into(),
        balance: 1_000.into(),
        ..Account::default()
    };
    let bob_pre = Account {
        balance: 2_000.into(),
        ..Account::default()
    };
    let contract_account = Account {
        nonce: 1.into(),
        storage_root: storage.root,
        code_hash,
        ..Account::default()
    };

    let pre = TrieBuilder::default()
        .insert(hashed_address(alice), account_rlp(&alice_pre))
        .insert(hashed_address(bob), account_rlp(&bob_pre))
        .insert(hashed_address(contract), account_rlp(&contract_account))
        .build();

    let alice_post = Account {
        nonce: 2.into(),
        balance: 999.into(),
        ..alice_pre
    };
    let bob_post = Account {
        balance: 2_001.into(),
        ..bob_pre
    };
    let post = TrieBuilder::default()
        .insert(hashed_address(alice), account_rlp(&alice_post))
        .insert(hashed_address(bob), account_rlp(&bob_post))
        .insert(hashed_address(contract), account_rlp(&contract_account))
        .build();

    let ancestors = ancestor_chain(7, pre.root);
    let parent = &ancestors[0];
    let block = Block {
        header: Header {
            number: parent.number + 1,
            parent_hash: parent.hash(),
            state_root: post.root,
            timestamp: parent.timestamp + 12,
            gas_limit: 30_000_000,
            gas_used: 21_000,
            base_fee_per_gas: Some(U256::from(7)),
            ..Header::default()
        },
        transactions: vec![vec![0x02, 0xf8, 0x6f, 0x01]],
        uncles: vec![],
        withdrawals: None,
    };

    let pre_state_proofs = vec![
        account_proof(&pre, alice, &BuiltTrie::empty(), &[]),
        account_proof(&pre, bob, &BuiltTrie::empty(), &[]),
        account_proof(&pre, contract, &storage, &[slot1, slot2]),
    ];
    let post_state_proofs = vec![
        account_proof(&post, alice, &BuiltTrie::empty(), &[]),
        account_proof(&post, bob, &BuiltTrie::empty(), &[]),
        account_proof(&post, contract, &storage, &[slot1, slot2]),
    ];

    Fixture {
        preflight: PreflightData {
            chain_config: chain_config(),
            block,
            ancestors: nunny::Vec::new(ancestors).unwrap(),
            pre_state_proofs,
            post_state_proofs,
            codes: BTreeSet::from([CODE.to_vec()]),
        },
        pre,
        post,
        storage,
        alice,
        bob,
        contract,
        code_hash,
        slot1,
        slot2,
    }
}
