//! Error types for the atom store.
//!
//! Read errors are values: they are memoized on the atom's record, versioned
//! like any other result, and handed to every dependent that pulls the atom.
//! That is why [`AtomError`] is `Clone` and wraps foreign errors behind an
//! `Arc`.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Errors produced by atom evaluation, writes, and the store lifecycle.
#[derive(Debug, Clone, Error)]
pub enum AtomError {
    /// An atom's read function failed, or a dependency surfaced an error.
    #[error("{0}")]
    Evaluation(Arc<dyn StdError + Send + Sync>),

    /// A write was routed to an atom without a write function.
    #[error("atom {atom} is not writable")]
    NotWritable { atom: String },

    /// A tracking getter was used after its evaluation settled.
    #[error("getter for {atom} used after its evaluation settled")]
    StaleAccess { atom: String },

    /// An atom read itself, directly or transitively, while evaluating.
    #[error("cyclic dependency detected while evaluating {atom}")]
    CyclicDependency { atom: String },

    /// Nested writes exceeded the configured re-entrancy bound.
    #[error("write recursion exceeded {limit} levels at {atom}")]
    WriteDepthExceeded { atom: String, limit: usize },

    /// An async evaluation was replaced by a newer one.
    ///
    /// Awaiting an [`AsyncValue`](crate::pending::AsyncValue) follows the
    /// replacement instead of surfacing this; it only escapes when the chain
    /// of replacements is broken (for example, the store was dropped).
    #[error("asynchronous evaluation of {atom} was superseded")]
    Superseded { atom: String },

    /// One or more mount/unmount hooks failed during a flush.
    #[error("{} lifecycle hook(s) failed: {}", .0.len(), join_errors(.0))]
    Lifecycle(Vec<AtomError>),

    /// A value or argument did not have the type the descriptor declares.
    #[error("value type mismatch for {atom}")]
    TypeMismatch { atom: String },

    /// The atom's record holds no value yet.
    #[error("atom {atom} has no value")]
    Uninitialized { atom: String },

    /// The store backing a getter, setter, or subscription is gone.
    #[error("store has been dropped")]
    StoreDropped,
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

impl AtomError {
    /// Wrap an arbitrary error as an evaluation failure.
    pub fn evaluation<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Evaluation(Arc::new(error))
    }

    /// Create an evaluation failure from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Evaluation(Arc::new(Message(message.into())))
    }

    /// Whether this error marks a discarded async evaluation.
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded { .. })
    }
}

fn join_errors(errors: &[AtomError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised while loading a [`StoreConfig`](crate::config::StoreConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse store config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("max_write_depth must be at least 1")]
    ZeroWriteDepth,
}
