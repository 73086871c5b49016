//! Errors raised while framing, decoding, or correlating messages.

use thiserror::Error;

use crate::codes;
use crate::correlation::Direction;
use crate::message::{ErrorObject, RequestId};

/// Failures turning bytes into a [`crate::Message`] or back.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload is not valid JSON.
    #[error("malformed JSON: {0}")]
    Parse(#[source] serde_json::Error),

    /// The payload is JSON but not a valid message.
    #[error("invalid message: {message}")]
    InvalidMessage {
        /// What was wrong.
        message: String,
        /// Request id, when it could be recovered before validation failed.
        id: Option<RequestId>,
    },

    /// A value could not be serialised.
    #[error("failed to serialise message: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl CodecError {
    /// Creates an invalid-message error.
    #[must_use]
    pub fn invalid(message: impl Into<String>, id: Option<RequestId>) -> Self {
        Self::InvalidMessage {
            message: message.into(),
            id,
        }
    }

    /// Request id to echo in the error response, when known.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::InvalidMessage { id, .. } => *id,
            Self::Parse(_) | Self::Serialize(_) => None,
        }
    }

    /// JSON-RPC code reported to the peer.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => codes::PARSE_ERROR,
            Self::InvalidMessage { .. } => codes::INVALID_REQUEST,
            Self::Serialize(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Error object describing this failure.
    #[must_use]
    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject::new(self.code(), self.to_string())
    }
}

/// Failures splitting a byte stream into frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The announced or supplied frame exceeds the configured ceiling.
    #[error("frame of {size} bytes exceeds {max} byte limit")]
    TooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Failures matching responses to outstanding requests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrelationError {
    /// A request with this id is already awaiting a response.
    #[error("request id {id} is already outstanding ({direction})")]
    Collision {
        /// Colliding id.
        id: RequestId,
        /// Direction of the outstanding request.
        direction: Direction,
    },

    /// No outstanding request matches the response.
    #[error("no outstanding request with id {id} ({direction})")]
    Unknown {
        /// Unmatched id.
        id: RequestId,
        /// Direction searched.
        direction: Direction,
    },
}
