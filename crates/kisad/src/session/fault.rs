//! Reasons a session is torn down.

use std::io;

use thiserror::Error;

use kisa_protocol::{CodecError, FrameError};

/// Why a session ended. None of these are fatal to the server.
#[derive(Debug, Error)]
pub enum SessionFault {
    /// The peer closed its end of the socket.
    #[error("peer disconnected")]
    Disconnected,
    /// The session asked to be closed and its output has drained.
    #[error("session closed by request")]
    Closed,
    /// Reading or writing the socket failed.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    /// The peer announced a frame the server refuses to buffer.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// Queued output exceeded the per-session ceiling.
    #[error("{queued} bytes queued for a slow reader exceeds {max} byte limit")]
    OutboundOverflow {
        /// Bytes that would have been queued.
        queued: usize,
        /// Configured ceiling.
        max: usize,
    },
    /// An outgoing message could not be encoded.
    #[error(transparent)]
    Encode(#[from] CodecError),
    /// The peer answered neither the handshake nor the liveness probe.
    #[error("peer did not answer the liveness probe")]
    Unresponsive,
    /// The server is shutting down.
    #[error("server shutting down")]
    Shutdown,
}

impl SessionFault {
    /// Short machine-readable label used in telemetry.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Closed => "closed",
            Self::Io(_) => "io",
            Self::Frame(_) => "frame",
            Self::OutboundOverflow { .. } => "outbound_overflow",
            Self::Encode(_) => "encode",
            Self::Unresponsive => "unresponsive",
            Self::Shutdown => "shutdown",
        }
    }
}
