//! Error types for the listener and the poll loop.

use std::io;

use thiserror::Error;

/// Errors surfaced while binding the server socket.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The socket could not be bound.
    #[error("failed to bind unix listener at {path}: {source}")]
    Bind {
        /// Socket path.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Another server answers on the path.
    #[error("existing unix socket {path} is already in use")]
    InUse {
        /// Socket path.
        path: String,
    },
    /// Something other than a socket occupies the path.
    #[error("unix socket path {path} is not a socket")]
    NotSocket {
        /// Socket path.
        path: String,
    },
    /// The existing path could not be inspected.
    #[error("failed to read metadata for unix socket {path}: {source}")]
    Metadata {
        /// Socket path.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Connecting to the existing socket failed unexpectedly.
    #[error("failed to connect to existing unix socket {path}: {source}")]
    Probe {
        /// Socket path.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// A stale socket could not be removed.
    #[error("failed to remove stale unix socket {path}: {source}")]
    Cleanup {
        /// Socket path.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The bound socket could not be made non-blocking.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Failures of the poll loop itself, as opposed to a single session.
#[derive(Debug, Error)]
pub enum MultiplexError {
    /// The poll call failed for a reason other than an interrupt.
    #[error("poll failed: {0}")]
    Poll(#[source] nix::Error),
}
