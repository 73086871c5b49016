use std::env;
use std::process;

use camino::Utf8PathBuf;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

use crate::socket::SocketEndpoint;

/// Directory below the runtime base that holds server sockets.
pub const SOCKET_NAMESPACE: &str = "kisa";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Largest encoded notification the server pushes without a handshake.
///
/// Far below the smallest default `SO_SNDBUF` of supported platforms, so a
/// notification of this size never observes a would-block condition on an
/// otherwise drained socket.
pub const DEFAULT_NOTIFICATION_LIMIT: usize = 2048;

/// Largest frame accepted from a peer.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Ceiling on bytes queued for a single session before it is torn down.
pub const DEFAULT_MAX_OUTBOUND_BYTES: usize = 8 * 1024 * 1024;

/// Window for the client to answer a `should*` notification.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Notification re-sends before the server falls back to a liveness probe.
pub const DEFAULT_HANDSHAKE_RETRIES: u32 = 1;

/// Upper bound on events appended while resolving one intent.
pub const DEFAULT_MAX_BATCH_EVENTS: usize = 1024;

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Identifier of the current process, used as the conventional server id.
pub fn default_server_id() -> String {
    process::id().to_string()
}

/// Computes the socket endpoint for `server_id` below the runtime base.
pub fn socket_endpoint_for(runtime_base: Option<&Utf8PathBuf>, server_id: &str) -> SocketEndpoint {
    let mut base = runtime_base.cloned().unwrap_or_else(default_runtime_base);
    base.push(SOCKET_NAMESPACE);
    base.push(server_id);
    SocketEndpoint::unix(base)
}

/// Computes the default socket endpoint for a server running in this process.
pub fn default_socket_endpoint() -> SocketEndpoint {
    socket_endpoint_for(None, &default_server_id())
}

/// Base directory for runtime artefacts.
///
/// Prefers the user's runtime directory. Falls back to the temporary directory
/// namespaced by effective uid so users never share a socket directory.
#[cfg(unix)]
pub fn default_runtime_base() -> Utf8PathBuf {
    if let Some(dir) = runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok()) {
        return dir;
    }
    let mut base = fallback_base_directory();
    base.push(user_namespace());
    base
}

#[cfg(not(unix))]
pub fn default_runtime_base() -> Utf8PathBuf {
    fallback_base_directory()
}

fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}
