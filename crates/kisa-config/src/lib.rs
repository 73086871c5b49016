//! Shared configuration for the kisa server and its clients.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults, then a
//! configuration file, then `KISA_*` environment variables, then command-line
//! flags. Both binaries derive the server socket from the same fields so a
//! client pointed at a server id finds the socket the server bound.

mod defaults;
pub mod keymap;
mod logging;
mod socket;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_HANDSHAKE_RETRIES, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_BATCH_EVENTS, DEFAULT_MAX_FRAME_BYTES, DEFAULT_MAX_OUTBOUND_BYTES,
    DEFAULT_NOTIFICATION_LIMIT, SOCKET_NAMESPACE, default_log_filter, default_log_filter_string,
    default_log_format, default_runtime_base, default_server_id, default_socket_endpoint,
    socket_endpoint_for,
};
pub use keymap::{CommandTemplate, Keymap, Resolution};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved configuration shared by `kisad` and `kisa`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "KISA")]
pub struct Config {
    /// Overrides the runtime base directory that holds `kisa/<server-id>`.
    pub runtime_dir: Option<Utf8PathBuf>,
    /// Server identifier; the server process id when unset.
    pub server_id: Option<String>,
    /// Explicit socket endpoint, bypassing the runtime directory convention.
    pub socket: Option<SocketEndpoint>,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Largest notification pushed without the request handshake, in bytes.
    #[ortho_config(default = DEFAULT_NOTIFICATION_LIMIT)]
    pub notification_limit: usize,
    /// Largest frame accepted from a peer, in bytes.
    #[ortho_config(default = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,
    /// Queued-write ceiling per session, in bytes.
    #[ortho_config(default = DEFAULT_MAX_OUTBOUND_BYTES)]
    pub max_outbound_bytes: usize,
    /// Window for answering a handshake notification, in milliseconds.
    #[ortho_config(default = DEFAULT_HANDSHAKE_TIMEOUT_MS)]
    pub handshake_timeout_ms: u64,
    /// Notification re-sends before the liveness probe.
    #[ortho_config(default = DEFAULT_HANDSHAKE_RETRIES)]
    pub handshake_retries: u32,
    /// Events permitted in one batch, including hook output.
    #[ortho_config(default = DEFAULT_MAX_BATCH_EVENTS)]
    pub max_batch_events: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime_dir: None,
            server_id: None,
            socket: None,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            notification_limit: DEFAULT_NOTIFICATION_LIMIT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_outbound_bytes: DEFAULT_MAX_OUTBOUND_BYTES,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            handshake_retries: DEFAULT_HANDSHAKE_RETRIES,
            max_batch_events: DEFAULT_MAX_BATCH_EVENTS,
        }
    }
}

impl Config {
    /// Server identifier, defaulting to the current process id.
    #[must_use]
    pub fn server_id(&self) -> String {
        self.server_id.clone().unwrap_or_else(default_server_id)
    }

    /// Socket endpoint the server binds and clients connect to.
    #[must_use]
    pub fn socket_endpoint(&self) -> SocketEndpoint {
        match &self.socket {
            Some(endpoint) => endpoint.clone(),
            None => socket_endpoint_for(self.runtime_dir.as_ref(), &self.server_id()),
        }
    }

    /// Filter expression applied to telemetry.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Format used for telemetry output.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
