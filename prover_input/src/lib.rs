//! A zk-EVM prover re-executes one Ethereum _block_ statelessly and proves
//! the execution correct. Doing that without a node at hand requires a
//! self-contained _prover input_: the block itself, every trie node and
//! contract bytecode the execution touches, and the ancestor headers
//! `BLOCKHASH` may consult.
//!
//! An upstream _preflight_ phase gathers the raw material over RPC (the
//! block, its ancestors, `eth_getProof` responses bracketing the state
//! transition, and bytecodes) into a [`PreflightData`] record. This crate
//! owns the step between preflight and proving: the [`Preparer`] hydrates
//! an in-memory trie database from the proofs, re-executes the block
//! against it under stateless self-validation, and distills the recorded
//! witness into a [`ProverInput`].
//!
//! The EVM itself is a collaborator, not a resident: the preparer drives
//! any [`evm::Executor`] implementation and never interprets opcodes.

#![deny(rustdoc::broken_intra_doc_links)]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]

pub mod cancel;
pub mod chain;
pub mod evm;
pub mod prepare;
pub mod state;
pub mod store;
pub mod triedb;
pub mod types;

pub use cancel::{CancelToken, Cancelled};
pub use prepare::Preparer;
pub use types::{Block, ChainConfig, Header, PreflightData, ProverInput, Withdrawal, Witness};

/// Like `#[serde(with = "hex")`, but tolerates and emits leading `0x`
/// prefixes, with variants for lists and sets of byte blobs.
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

    pub mod set {
        use std::collections::BTreeSet;

        use serde::{de::Error as _, ser::SerializeSeq as _, Deserialize as _, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            data: &BTreeSet<Vec<u8>>,
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
        ) -> Result<BTreeSet<Vec<u8>>, D::Error> {
            Vec::<String>::deserialize(deserializer)?
                .iter()
                .map(|s| {
                    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(D::Error::custom)
                })
                .collect()
        }
    }
}
