//! The four-stage preparation pipeline.
//!
//! One [`Preparer::prepare`] call owns its context exclusively: the store,
//! trie database, state database, and header chain are built fresh, live
//! for the invocation, and are dropped with it. Stages run strictly in
//! sequence; the cancellation token is checked between them.

use anyhow::Context as _;
use proof_trie::NodeSet;
use tracing::{debug, error, info, info_span};

use crate::{
    cancel::CancelToken,
    chain::HeaderChain,
    evm::{ExecParams, Executor, LoggedExecutor, PreState, TaggedExecutor, VmConfig},
    state::{AccessTrackedStateDb, AccessTrackerManager, TrieStateDb},
    store::{self, MemoryStore},
    types::{PreflightData, ProverInput, Witness},
    triedb::TrieDb,
};

/// The state database the pipeline wires up: the conventional trie-backed
/// database behind the access-tracking decorator.
pub type PreparerStateDb = AccessTrackedStateDb<TrieStateDb>;

/// Prepares prover inputs by hydrating a trie database from preflight
/// proofs and re-executing the block statelessly through the supplied
/// executor.
///
/// The preparer holds no state of its own; invocations are independent
/// and may run concurrently from separate calls.
#[derive(Debug, Clone)]
pub struct Preparer<E> {
    executor: E,
}

struct PrepareContext {
    trackers: AccessTrackerManager,
    state_db: PreparerStateDb,
    chain: HeaderChain,
}

impl<E: Executor<PreparerStateDb>> Preparer<E> {
    /// A preparer driving `executor`.
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    /// Prepares the prover input for `preflight`'s block.
    pub fn prepare(
        &self,
        cancel: &CancelToken,
        preflight: &PreflightData,
    ) -> anyhow::Result<ProverInput> {
        let span = info_span!(
            "prepare",
            chain.id = preflight.chain_config.chain_id,
            block.number = preflight.block.header.number,
            block.hash = %preflight.block.hash(),
        );
        let _enter = span.enter();

        match self.run(cancel, preflight) {
            Ok(input) => {
                info!("prover input preparation succeeded");
                Ok(input)
            }
            Err(err) => {
                error!("prover input preparation failed: {err:#}");
                Err(err)
            }
        }
    }

    fn run(&self, cancel: &CancelToken, preflight: &PreflightData) -> anyhow::Result<ProverInput> {
        debug!("preparing context");
        let ctx = prepare_context(preflight).context("failed to prepare validation context")?;

        cancel.ensure_active()?;
        info!("prefilling validation database");
        prepare_pre_state(&ctx, preflight).context("failed to prefill validation database")?;

        cancel.ensure_active()?;
        debug!("preparing execution parameters");
        let state = prepare_exec_state(&ctx, preflight)
            .context("failed to prepare validation exec params")?;

        info!("executing block");
        let params = ExecParams {
            block: &preflight.block,
            chain: &ctx.chain,
            state: &state,
            vm_config: VmConfig {
                stateless_self_validation: true,
            },
            // The execution must reproduce the committed header exactly;
            // anything else means the preflight captured bad data.
            validate: true,
        };
        let output = TaggedExecutor::new("evm", LoggedExecutor::new(&self.executor))
            .execute(cancel, &params)
            .context("validation execution failed")?;

        cancel.ensure_active()?;
        debug!(
            tracked_nodes = ctx.trackers.node_count(),
            "assembling prover input"
        );
        Ok(prepare_prover_input(&ctx, preflight, output.witness))
    }
}

fn prepare_context(preflight: &PreflightData) -> anyhow::Result<PrepareContext> {
    let trackers = AccessTrackerManager::new();
    let store = MemoryStore::new();
    let trie_db = TrieDb::new(store.clone());
    let state_db = AccessTrackedStateDb::new(TrieStateDb::new(trie_db), trackers.clone());
    let chain = HeaderChain::new(preflight.chain_config.clone(), store);
    Ok(PrepareContext {
        trackers,
        state_db,
        chain,
    })
}

fn prepare_pre_state(ctx: &PrepareContext, preflight: &PreflightData) -> anyhow::Result<()> {
    let trie_db = ctx.state_db.inner().trie_db();

    // Ancestor headers first: order among them is irrelevant, the chain
    // invariants were established upstream.
    for header in preflight.ancestors.iter() {
        store::write_header(trie_db.disk(), header);
    }

    let parent_root = preflight.parent().state_root;
    let node_set = NodeSet::from_state_transition_proofs(
        parent_root,
        preflight.block.header.state_root,
        &preflight.pre_state_proofs,
        &preflight.post_state_proofs,
    )
    .context("failed to create state nodes")?;

    // The transition label is an accounting detail in a hash-addressed
    // database; committing parent -> parent makes the consistency check
    // coincide with "the parent state must be resolvable". Block number 0
    // cannot collide with a real transition.
    trie_db
        .update(parent_root, parent_root, 0, &node_set)
        .context("failed to update trie db with state nodes")?;

    for code in &preflight.codes {
        store::write_code(trie_db.disk(), code);
    }
    Ok(())
}

fn prepare_exec_state(
    ctx: &PrepareContext,
    preflight: &PreflightData,
) -> anyhow::Result<PreState<PreparerStateDb>> {
    let parent_root = preflight.parent().state_root;
    PreState::open(
        ctx.state_db.clone(),
        parent_root,
        VmConfig {
            stateless_self_validation: true,
        },
    )
    .with_context(|| format!("failed to create pre-state from parent root {parent_root:x}"))
}

fn prepare_prover_input(
    ctx: &PrepareContext,
    preflight: &PreflightData,
    witness: Witness,
) -> ProverInput {
    ProverInput {
        chain_config: ctx.chain.config().clone(),
        blocks: vec![preflight.block.clone()],
        witness,
    }
}
