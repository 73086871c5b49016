//! Error types for intent dispatch.
//!
//! [`DispatchError`] is what a client sees: every variant maps to a wire
//! error code. [`BatchError`] covers misuse of the event log and only ever
//! surfaces wrapped as an internal error.

use thiserror::Error;

use kisa_protocol::{ErrorObject, codes};
use serde_json::json;

use super::events::{BatchId, Sequence};
use super::executor::CommandError;

/// Event log bookkeeping failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// The batch id was never issued.
    #[error("unknown batch {batch}")]
    Unknown {
        /// Offending batch.
        batch: BatchId,
    },

    /// The batch is no longer open.
    #[error("batch {batch} is closed")]
    Closed {
        /// Offending batch.
        batch: BatchId,
    },

    /// Another batch appended since this one last did.
    #[error("batch {batch} would no longer be contiguous")]
    NotContiguous {
        /// Offending batch.
        batch: BatchId,
    },
}

/// Errors surfaced while turning an intent into applied commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// A command failed and its batch was rolled back.
    #[error("batch {batch} rolled back: {source}")]
    BatchFailed {
        /// Batch that was rolled back.
        batch: BatchId,
        /// Failure of the command that stopped it.
        #[source]
        source: CommandError,
    },

    /// Hooks kept producing commands past the per-batch ceiling.
    #[error("batch {batch} exceeded {limit} events")]
    BatchTooLarge {
        /// Batch that was rolled back.
        batch: BatchId,
        /// Configured ceiling.
        limit: usize,
    },

    /// The intent did not resolve to anything runnable.
    #[error("nothing bound to '{input}' in mode '{mode}'")]
    Unbound {
        /// Mode the keys were looked up in.
        mode: String,
        /// Keys or event name as received.
        input: String,
    },

    /// Parameters did not fit the method.
    #[error("invalid parameters: {message}")]
    InvalidParams {
        /// What was wrong with them.
        message: String,
    },

    /// No live event carries the anchor sequence.
    #[error("no live event at sequence {sequence}")]
    UnknownAnchor {
        /// Requested anchor.
        sequence: Sequence,
    },

    /// Undo or redo had nothing to act on.
    #[error("nothing to {action}")]
    NothingTo {
        /// `undo` or `redo`.
        action: &'static str,
    },

    /// The executor cannot restore snapshots, so replay is unavailable.
    #[error("replay unavailable: {0}")]
    Replay(#[source] CommandError),

    /// The event log rejected an operation.
    #[error("event log: {0}")]
    Batch(#[from] BatchError),
}

impl DispatchError {
    /// Builds an invalid-parameters error.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Wire error code for this failure.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::BatchFailed { .. } | Self::BatchTooLarge { .. } => codes::BATCH_FAILED,
            Self::Unbound { .. }
            | Self::InvalidParams { .. }
            | Self::UnknownAnchor { .. }
            | Self::NothingTo { .. } => codes::INVALID_PARAMS,
            Self::Replay(_) | Self::Batch(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Error object for a response.
    #[must_use]
    pub fn to_error_object(&self) -> ErrorObject {
        let error = ErrorObject::new(self.code(), self.to_string());
        match self {
            Self::BatchFailed { batch, .. } | Self::BatchTooLarge { batch, .. } => {
                error.with_data(json!({ "batch": batch.get() }))
            }
            _ => error,
        }
    }
}

impl From<DispatchError> for ErrorObject {
    fn from(error: DispatchError) -> Self {
        error.to_error_object()
    }
}
