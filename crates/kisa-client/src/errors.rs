//! Error type shared by the client library and the `kisa` binary.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use kisa_protocol::{CodecError, CorrelationError, ErrorObject};

/// Failures raised while talking to a server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration could not be resolved.
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),

    /// Command-line parsing failed.
    #[error("{0}")]
    CliUsage(clap::Error),

    /// The server socket refused or timed out.
    #[error("failed to connect to server at {endpoint}: {source}")]
    Connect {
        /// Endpoint that was dialled.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Reading from or writing to the socket failed.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    /// A frame held something other than a valid message.
    #[error("malformed message from server: {0}")]
    Codec(#[from] CodecError),

    /// A request id was reused while still outstanding.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// The server answered with an error object.
    #[error("server error {}: {}", .0.code, .0.message)]
    Remote(ErrorObject),

    /// A result did not have the expected shape.
    #[error("unexpected payload for '{method}': {source}")]
    UnexpectedPayload {
        /// Method whose result was malformed.
        method: String,
        /// Deserialisation failure.
        #[source]
        source: serde_json::Error,
    },

    /// A key name did not parse.
    #[error("invalid key '{key}': {message}")]
    InvalidKey {
        /// Key name as given.
        key: String,
        /// Why it did not parse.
        message: String,
    },

    /// The server closed the socket.
    #[error("server closed the connection")]
    Disconnected,

    /// The server announced it is going away.
    #[error("server is shutting down")]
    ServerShutdown,

    /// Writing command output failed.
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
}

impl From<ErrorObject> for ClientError {
    fn from(error: ErrorObject) -> Self {
        Self::Remote(error)
    }
}
