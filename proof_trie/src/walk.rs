//! Key resolution through hash-addressed node encodings.

use ethereum_types::H256;
use log::trace;

use crate::{
    node::{decode_node, ChildRef, Node, EMPTY_TRIE_HASH},
    path::TriePath,
    ProofError,
};

/// Resolves `key` from `root`, fetching out-of-line nodes through `fetch`.
///
/// `observe` is invoked once per node obtained through `fetch`, with the
/// node's position and encoding, in root-to-leaf order. Inline children are
/// not observed: their bytes travel inside the parent encoding.
///
/// Returns the leaf (or branch) value when `key` is present, [`None`] when
/// the walk proves its absence, and [`ProofError::MissingNode`] when a
/// referenced encoding cannot be fetched.
pub fn resolve_path<F, O>(
    root: H256,
    key: &TriePath,
    mut fetch: F,
    mut observe: O,
) -> Result<Option<Vec<u8>>, ProofError>
where
    F: FnMut(H256) -> Option<Vec<u8>>,
    O: FnMut(&TriePath, &[u8]),
{
    if root == EMPTY_TRIE_HASH || root == H256::zero() {
        return Ok(None);
    }

    let mut position = TriePath::default();
    let mut consumed = 0usize;
    let mut current = fetch_observed(root, &position, &mut fetch, &mut observe)?;

    loop {
        let next = match decode_node(&current)? {
            Node::Leaf { path, value } => {
                let matches = key.nibbles()[consumed..] == *path.nibbles();
                trace!("leaf at '{position}' (match: {matches})");
                return Ok(matches.then_some(value));
            }
            Node::Branch { children, value } => {
                if consumed == key.len() {
                    return Ok((!value.is_empty()).then_some(value));
                }
                let nibble = key.nibbles()[consumed];
                position.push(nibble)?;
                consumed += 1;
                children[nibble as usize].clone()
            }
            Node::Extension { path, child } => {
                let rest = &key.nibbles()[consumed..];
                if rest.len() < path.len() || rest[..path.len()] != *path.nibbles() {
                    trace!("extension at '{position}' diverges from key");
                    return Ok(None);
                }
                position.extend(&path)?;
                consumed += path.len();
                child
            }
        };

        current = match next {
            ChildRef::Empty => return Ok(None),
            ChildRef::Inline(encoded) => encoded,
            ChildRef::Hash(hash) => fetch_observed(hash, &position, &mut fetch, &mut observe)?,
        };
    }
}

fn fetch_observed<F, O>(
    hash: H256,
    position: &TriePath,
    fetch: &mut F,
    observe: &mut O,
) -> Result<Vec<u8>, ProofError>
where
    F: FnMut(H256) -> Option<Vec<u8>>,
    O: FnMut(&TriePath, &[u8]),
{
    let encoded = fetch(hash).ok_or(ProofError::MissingNode {
        hash,
        path: *position,
    })?;
    observe(position, &encoded);
    Ok(encoded)
}
