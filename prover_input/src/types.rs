//! Public types for this crate: the preflight input record, the prover
//! input output record, and the chain primitives they share.

use std::collections::BTreeSet;

use ethereum_types::{Address, Bloom, H256, H64, U256};
use keccak_hash::keccak;
use rlp::{DecoderError, Rlp, RlpStream};
use serde::{Deserialize, Serialize};

pub use proof_trie::{AccountProof, StorageProof};

/// Immutable parameters identifying a chain: its id and the activation
/// schedule of the forks relevant to replay.
///
/// Carried through preparation untouched and copied verbatim into the
/// output record for the prover to consult.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Numeric chain id (EIP-155).
    pub chain_id: u64,
    /// London activation block, if scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub london_block: Option<u64>,
    /// Shanghai activation timestamp, if scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shanghai_time: Option<u64>,
    /// Cancun activation timestamp, if scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancun_time: Option<u64>,
    /// Prague activation timestamp, if scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prague_time: Option<u64>,
}

impl ChainConfig {
    /// Whether London is active at block `number`.
    pub fn is_london_active_at_block(&self, number: u64) -> bool {
        self.london_block.is_some_and(|at| number >= at)
    }
    /// Whether Shanghai is active at `timestamp`.
    pub fn is_shanghai_active_at_time(&self, timestamp: u64) -> bool {
        self.shanghai_time.is_some_and(|at| timestamp >= at)
    }
    /// Whether Cancun is active at `timestamp`.
    pub fn is_cancun_active_at_time(&self, timestamp: u64) -> bool {
        self.cancun_time.is_some_and(|at| timestamp >= at)
    }
    /// Whether Prague is active at `timestamp`.
    pub fn is_prague_active_at_time(&self, timestamp: u64) -> bool {
        self.prague_time.is_some_and(|at| timestamp >= at)
    }
}

/// An Ethereum block header.
///
/// The trailing fields appeared with successive forks and participate in
/// the RLP encoding only from their fork onwards, so [`Header::hash`]
/// agrees with the canonical hash for headers of any era.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Hash of the parent block's header.
    pub parent_hash: H256,
    /// Hash of the uncles list.
    pub ommers_hash: H256,
    /// Fee recipient.
    pub beneficiary: Address,
    /// State trie root after this block.
    pub state_root: H256,
    /// Transactions trie root.
    pub transactions_root: H256,
    /// Receipts trie root.
    pub receipts_root: H256,
    /// Bloom of the logs emitted by this block.
    pub logs_bloom: Bloom,
    /// Proof-of-work difficulty; zero after the merge.
    pub difficulty: U256,
    /// Block height.
    pub number: u64,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas consumed by the block.
    pub gas_used: u64,
    /// Unix timestamp.
    pub timestamp: u64,
    /// Arbitrary extra bytes chosen by the proposer.
    #[serde(with = "crate::hex")]
    pub extra_data: Vec<u8>,
    /// PoW mix hash; `prevRandao` after the merge.
    pub mix_hash: H256,
    /// PoW nonce; zero after the merge.
    pub nonce: H64,
    /// Base fee per gas (London).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<U256>,
    /// Withdrawals trie root (Shanghai).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawals_root: Option<H256>,
    /// Blob gas consumed (Cancun).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_gas_used: Option<u64>,
    /// Running blob gas excess (Cancun).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excess_blob_gas: Option<u64>,
    /// Beacon block root of the parent slot (Cancun).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_beacon_block_root: Option<H256>,
    /// Hash of the execution-layer requests (Prague).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_hash: Option<H256>,
}

impl Header {
    /// `keccak256` of the RLP encoding.
    pub fn hash(&self) -> H256 {
        keccak(rlp::encode(self))
    }

    /// How many of the optional trailing fields participate in the
    /// encoding. Presence must be contiguous; a gap ends the list.
    fn tail_len(&self) -> usize {
        [
            self.base_fee_per_gas.is_some(),
            self.withdrawals_root.is_some(),
            self.blob_gas_used.is_some(),
            self.excess_blob_gas.is_some(),
            self.parent_beacon_block_root.is_some(),
            self.requests_hash.is_some(),
        ]
        .iter()
        .take_while(|present| **present)
        .count()
    }
}

impl rlp::Encodable for Header {
    fn rlp_append(&self, s: &mut RlpStream) {
        let tail = self.tail_len();
        s.begin_list(15 + tail);
        s.append(&self.parent_hash)
            .append(&self.ommers_hash)
            .append(&self.beneficiary)
            .append(&self.state_root)
            .append(&self.transactions_root)
            .append(&self.receipts_root)
            .append(&self.logs_bloom)
            .append(&self.difficulty)
            .append(&self.number)
            .append(&self.gas_limit)
            .append(&self.gas_used)
            .append(&self.timestamp)
            .append(&self.extra_data)
            .append(&self.mix_hash)
            .append(&self.nonce);
        if tail >= 1 {
            s.append(&self.base_fee_per_gas.expect("tail is contiguous"));
        }
        if tail >= 2 {
            s.append(&self.withdrawals_root.expect("tail is contiguous"));
        }
        if tail >= 3 {
            s.append(&self.blob_gas_used.expect("tail is contiguous"));
        }
        if tail >= 4 {
            s.append(&self.excess_blob_gas.expect("tail is contiguous"));
        }
        if tail >= 5 {
            s.append(&self.parent_beacon_block_root.expect("tail is contiguous"));
        }
        if tail >= 6 {
            s.append(&self.requests_hash.expect("tail is contiguous"));
        }
    }
}

impl rlp::Decodable for Header {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let count = rlp.item_count()?;
        if !(15..=21).contains(&count) {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            parent_hash: rlp.val_at(0)?,
            ommers_hash: rlp.val_at(1)?,
            beneficiary: rlp.val_at(2)?,
            state_root: rlp.val_at(3)?,
            transactions_root: rlp.val_at(4)?,
            receipts_root: rlp.val_at(5)?,
            logs_bloom: rlp.val_at(6)?,
            difficulty: rlp.val_at(7)?,
            number: rlp.val_at(8)?,
            gas_limit: rlp.val_at(9)?,
            gas_used: rlp.val_at(10)?,
            timestamp: rlp.val_at(11)?,
            extra_data: rlp.val_at(12)?,
            mix_hash: rlp.val_at(13)?,
            nonce: rlp.val_at(14)?,
            base_fee_per_gas: (count > 15).then(|| rlp.val_at(15)).transpose()?,
            withdrawals_root: (count > 16).then(|| rlp.val_at(16)).transpose()?,
            blob_gas_used: (count > 17).then(|| rlp.val_at(17)).transpose()?,
            excess_blob_gas: (count > 18).then(|| rlp.val_at(18)).transpose()?,
            parent_beacon_block_root: (count > 19).then(|| rlp.val_at(19)).transpose()?,
            requests_hash: (count > 20).then(|| rlp.val_at(20)).transpose()?,
        })
    }
}

/// One validator withdrawal (Shanghai).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    /// Monotonically increasing withdrawal index.
    pub index: u64,
    /// Index of the withdrawing validator.
    pub validator_index: u64,
    /// Recipient of the withdrawn amount.
    pub address: Address,
    /// Amount in gwei.
    pub amount: u64,
}

impl rlp::Encodable for Withdrawal {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4)
            .append(&self.index)
            .append(&self.validator_index)
            .append(&self.address)
            .append(&self.amount);
    }
}

impl rlp::Decodable for Withdrawal {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            index: rlp.val_at(0)?,
            validator_index: rlp.val_at(1)?,
            address: rlp.val_at(2)?,
            amount: rlp.val_at(3)?,
        })
    }
}

/// A block: header plus body.
///
/// Transactions are carried as their opaque signed envelopes; nothing in
/// preparation ever decodes one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The block header.
    pub header: Header,
    /// Signed transaction envelopes, in block order.
    #[serde(with = "crate::hex::list")]
    pub transactions: Vec<Vec<u8>>,
    /// Uncle headers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uncles: Vec<Header>,
    /// Withdrawals list, present from Shanghai onwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawals: Option<Vec<Withdrawal>>,
}

impl Block {
    /// The header hash.
    pub fn hash(&self) -> H256 {
        self.header.hash()
    }
}

/// Everything preflight collected for one block: the raw material the
/// [`Preparer`](crate::Preparer) turns into a [`ProverInput`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightData {
    /// Chain id and fork schedule.
    pub chain_config: ChainConfig,
    /// The block to prepare.
    pub block: Block,
    /// Ancestor headers; index 0 is the parent, deeper ancestors follow in
    /// order of increasing distance.
    pub ancestors: nunny::Vec<Header>,
    /// Account and storage proofs rooted at the parent state root.
    pub pre_state_proofs: Vec<AccountProof>,
    /// Account and storage proofs rooted at the block's declared
    /// post-state root.
    pub post_state_proofs: Vec<AccountProof>,
    /// Bytecodes of every contract the block may execute, keyed by their
    /// keccak hash when written to the code space.
    #[serde(default, with = "crate::hex::set")]
    pub codes: BTreeSet<Vec<u8>>,
}

impl PreflightData {
    /// The parent header (ancestor at distance 1).
    pub fn parent(&self) -> &Header {
        self.ancestors.first()
    }
}

/// The capture of one stateless execution: everything replay needs beyond
/// the block itself.
///
/// The byte-blob collections are sets; their serialization order is the
/// lexicographic order of the encodings and carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    /// Ancestor headers actually consulted via `BLOCKHASH`, in order of
    /// first consultation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ancestors: Vec<Header>,
    /// Bytecodes executed or inspected.
    #[serde(default, with = "crate::hex::set")]
    pub codes: BTreeSet<Vec<u8>>,
    /// Encoded trie nodes resolved during execution.
    #[serde(default, with = "crate::hex::set")]
    pub state: BTreeSet<Vec<u8>>,
}

/// The finished prover input: one replayable block plus the witness that
/// makes its replay self-contained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProverInput {
    /// Chain id and fork schedule, copied from the preflight record.
    pub chain_config: ChainConfig,
    /// The blocks to replay. Preparation emits exactly one per
    /// invocation; the sequence leaves room for batches downstream.
    pub blocks: Vec<Block>,
    /// The execution witness.
    pub witness: Witness,
}
