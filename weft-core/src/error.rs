//! Error Types
//!
//! Only computation failures ever reach caller code. Middleware failures are
//! logged and swallowed by the pipeline, and reading a disposed computation
//! just returns its last value.

use thiserror::Error;

use crate::graph::ComputationId;

/// Boxed error produced by user closures and middleware.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the reactive runtime.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A memo or effect closure returned an error.
    #[error("computation {id} failed: {source}")]
    Computation {
        /// The failing computation.
        id: ComputationId,
        /// The error returned by the closure.
        #[source]
        source: BoxError,
    },

    /// A computation was asked to execute while it was already running.
    #[error("computation {id} re-entered itself while running")]
    Reentrant {
        /// The computation that was re-entered.
        id: ComputationId,
    },

    /// The drain loop kept finding new work after the configured number of passes.
    #[error("batch drain did not settle after {passes} passes")]
    DrainLimit {
        /// Number of passes that ran before giving up.
        passes: usize,
    },
}

impl ReactiveError {
    /// The computation this error is attributed to, if any.
    pub fn computation(&self) -> Option<ComputationId> {
        match self {
            Self::Computation { id, .. } | Self::Reentrant { id } => Some(*id),
            Self::DrainLimit { .. } => None,
        }
    }
}
