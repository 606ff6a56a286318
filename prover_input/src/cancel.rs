//! Cooperative cancellation for preparation runs.
//!
//! The token is inert: nothing suspends on it, stages merely check it
//! between sub-steps. All state is per-invocation memory, so a triggered
//! cancellation abandons work with nothing to roll back.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared flag observed between pipeline sub-steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers cancellation for every clone of this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed)
    }

    /// Whether cancellation has been triggered.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Errors if cancellation has been triggered.
    pub fn ensure_active(&self) -> Result<(), Cancelled> {
        match self.is_cancelled() {
            true => Err(Cancelled),
            false => Ok(()),
        }
    }
}

/// The run was abandoned because its token was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("preparation cancelled")]
pub struct Cancelled;
