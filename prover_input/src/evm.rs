//! The EVM executor collaborator interface.
//!
//! Opcode semantics live outside this crate. The preparer only needs a
//! capability it can drive: [`Executor::execute`] takes the block, the
//! header chain, and a [`PreState`] opened at the parent root, and returns
//! receipts plus the witness of everything it touched. Logging and span
//! tagging wrap any executor by plain composition, so nothing on the
//! execution path is dynamically dispatched.

use std::{
    cell::RefCell,
    collections::{BTreeSet, HashMap},
};

use ethereum_types::{Address, H256, U256};
use proof_trie::{hashed_address, Account, ProofError, EMPTY_CODE_HASH};
use tracing::{debug, error, info, info_span};

use crate::{
    cancel::{CancelToken, Cancelled},
    chain::HeaderChain,
    state::{NodeObserver, StateDatabase, StateError},
    types::{Block, Header, Witness},
};

/// Knobs of the virtual machine relevant to preparation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmConfig {
    /// Refuse any state access that is not servable from the hydrated trie
    /// database, and record a witness of every access.
    pub stateless_self_validation: bool,
}

/// The state object an execution runs against: reads at a fixed root,
/// witness collection on the side.
///
/// Every account, slot, code, and ancestor-header access flows through
/// here. Under [`VmConfig::stateless_self_validation`] each access is
/// recorded into the [`Witness`] the executor hands back.
#[derive(Debug)]
pub struct PreState<D> {
    db: D,
    root: H256,
    config: VmConfig,
    inner: RefCell<PreStateInner>,
}

#[derive(Debug, Default)]
struct PreStateInner {
    witness: Witness,
    seen_headers: BTreeSet<H256>,
    accounts: HashMap<Address, Option<Account>>,
}

struct WitnessObserver<'a> {
    witness: &'a mut Witness,
    enabled: bool,
}

impl NodeObserver for WitnessObserver<'_> {
    fn on_node(&mut self, _owner: H256, _path: &proof_trie::TriePath, encoded: &[u8]) {
        if self.enabled {
            self.witness.state.insert(encoded.to_vec());
        }
    }
}

impl<D: StateDatabase> PreState<D> {
    /// Opens the state rooted at `root`, resolving (and witnessing) the
    /// root node up front so an unreachable root fails here rather than
    /// mid-execution.
    pub fn open(db: D, root: H256, config: VmConfig) -> Result<Self, StateError> {
        let state = Self {
            db,
            root,
            config,
            inner: RefCell::new(PreStateInner::default()),
        };
        {
            let inner = &mut *state.inner.borrow_mut();
            let mut obs = WitnessObserver {
                witness: &mut inner.witness,
                enabled: config.stateless_self_validation,
            };
            state.db.open(root, &mut obs)?;
        }
        Ok(state)
    }

    /// The root this state reads at.
    pub fn root(&self) -> H256 {
        self.root
    }

    /// Reads one account. Repeated reads are served from a cache and do
    /// not re-walk the trie.
    pub fn account(&self, address: Address) -> Result<Option<Account>, StateError> {
        let inner = &mut *self.inner.borrow_mut();
        if let Some(cached) = inner.accounts.get(&address) {
            return Ok(*cached);
        }
        let mut obs = WitnessObserver {
            witness: &mut inner.witness,
            enabled: self.config.stateless_self_validation,
        };
        let account = self.db.account(self.root, address, &mut obs)?;
        inner.accounts.insert(address, account);
        Ok(account)
    }

    /// Reads one storage slot, zero for absent slots and absent accounts.
    pub fn storage(&self, address: Address, slot: H256) -> Result<U256, StateError> {
        let Some(account) = self.account(address)? else {
            return Ok(U256::zero());
        };
        let inner = &mut *self.inner.borrow_mut();
        let mut obs = WitnessObserver {
            witness: &mut inner.witness,
            enabled: self.config.stateless_self_validation,
        };
        let value = self.db.storage(
            hashed_address(address),
            account.storage_root,
            slot,
            &mut obs,
        )?;
        Ok(match value {
            Some(encoded) => rlp::decode(&encoded).map_err(ProofError::from)?,
            None => U256::zero(),
        })
    }

    /// Reads one bytecode, recording it in the witness.
    pub fn code(&self, code_hash: H256) -> Result<Vec<u8>, StateError> {
        if code_hash == EMPTY_CODE_HASH {
            return Ok(vec![]);
        }
        let code = self.db.code(code_hash)?;
        if self.config.stateless_self_validation {
            self.inner.borrow_mut().witness.codes.insert(code.clone());
        }
        Ok(code)
    }

    /// Records an ancestor header consulted via `BLOCKHASH`, once per
    /// header.
    pub fn observe_header(&self, header: &Header) {
        if !self.config.stateless_self_validation {
            return;
        }
        let inner = &mut *self.inner.borrow_mut();
        if inner.seen_headers.insert(header.hash()) {
            inner.witness.ancestors.push(header.clone());
        }
    }

    /// Takes the witness accumulated so far, leaving an empty one behind.
    pub fn take_witness(&self) -> Witness {
        std::mem::take(&mut self.inner.borrow_mut().witness)
    }
}

/// Parameters of one execution.
#[derive(Debug)]
pub struct ExecParams<'a, D> {
    /// The block to execute.
    pub block: &'a Block,
    /// Chain abstraction for fork activations and `BLOCKHASH`.
    pub chain: &'a HeaderChain,
    /// State opened at the parent root.
    pub state: &'a PreState<D>,
    /// VM configuration.
    pub vm_config: VmConfig,
    /// Compare the recomputed post-state root, receipts root, and gas
    /// used against the block header, failing on disagreement.
    pub validate: bool,
}

/// What an execution produced.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Encoded receipts, in transaction order.
    pub receipts: Vec<Vec<u8>>,
    /// Witness of every access, when self-validation was on.
    pub witness: Witness,
}

/// Execution failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    /// The recomputed post-state root disagrees with the block header.
    #[error("post-state root mismatch: computed {computed:x}, header declares {declared:x}")]
    StateRootMismatch {
        /// Root the execution arrived at.
        computed: H256,
        /// Root the header declares.
        declared: H256,
    },

    /// The recomputed receipts root disagrees with the block header.
    #[error("receipts root mismatch: computed {computed:x}, header declares {declared:x}")]
    ReceiptsRootMismatch {
        /// Root the execution arrived at.
        computed: H256,
        /// Root the header declares.
        declared: H256,
    },

    /// The recomputed gas total disagrees with the block header.
    #[error("gas used mismatch: computed {computed}, header declares {declared}")]
    GasUsedMismatch {
        /// Gas the execution consumed.
        computed: u64,
        /// Gas the header declares.
        declared: u64,
    },

    /// A needed ancestor header was never hydrated.
    #[error("ancestor header {0} not hydrated")]
    MissingAncestor(u64),

    /// A state access could not be served.
    #[error(transparent)]
    State(#[from] StateError),

    /// The run was cancelled mid-execution.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// The executor capability the preparer drives.
pub trait Executor<D: StateDatabase> {
    /// Executes `params.block` against `params.state`.
    fn execute(
        &self,
        cancel: &CancelToken,
        params: &ExecParams<'_, D>,
    ) -> Result<ExecOutput, ExecError>;
}

impl<D: StateDatabase, E: Executor<D> + ?Sized> Executor<D> for &E {
    fn execute(
        &self,
        cancel: &CancelToken,
        params: &ExecParams<'_, D>,
    ) -> Result<ExecOutput, ExecError> {
        (**self).execute(cancel, params)
    }
}

/// Decorator logging the outcome of every execution.
#[derive(Debug, Clone)]
pub struct LoggedExecutor<E> {
    inner: E,
}

impl<E> LoggedExecutor<E> {
    /// Wraps `inner`.
    pub fn new(inner: E) -> Self {
        Self { inner }
    }
}

impl<D: StateDatabase, E: Executor<D>> Executor<D> for LoggedExecutor<E> {
    fn execute(
        &self,
        cancel: &CancelToken,
        params: &ExecParams<'_, D>,
    ) -> Result<ExecOutput, ExecError> {
        debug!(txs = params.block.transactions.len(), "executing block");
        match self.inner.execute(cancel, params) {
            Ok(output) => {
                info!(receipts = output.receipts.len(), "block execution succeeded");
                Ok(output)
            }
            Err(err) => {
                error!(%err, "block execution failed");
                Err(err)
            }
        }
    }
}

/// Decorator running the execution inside a span tagged with the block
/// identity.
#[derive(Debug, Clone)]
pub struct TaggedExecutor<E> {
    inner: E,
    component: &'static str,
}

impl<E> TaggedExecutor<E> {
    /// Wraps `inner`, tagging its span as `component`.
    pub fn new(component: &'static str, inner: E) -> Self {
        Self { inner, component }
    }
}

impl<D: StateDatabase, E: Executor<D>> Executor<D> for TaggedExecutor<E> {
    fn execute(
        &self,
        cancel: &CancelToken,
        params: &ExecParams<'_, D>,
    ) -> Result<ExecOutput, ExecError> {
        let span = info_span!(
            "execute",
            component = self.component,
            block.number = params.block.header.number,
            block.hash = %params.block.hash(),
        );
        let _enter = span.enter();
        self.inner.execute(cancel, params)
    }
}
