//! Unix socket listener for the server endpoint.

use std::fs;
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

use tracing::{info, warn};

use kisa_config::SocketEndpoint;

use super::{ListenerError, TRANSPORT_TARGET};

/// Non-blocking listener bound to a socket endpoint.
///
/// The socket file is removed when the listener is dropped.
#[derive(Debug)]
pub struct SocketListener {
    endpoint: SocketEndpoint,
    listener: UnixListener,
}

impl SocketListener {
    /// Binds `endpoint`, replacing a stale socket file left by a dead server.
    pub fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let listener = bind_unix(endpoint.path().as_std_path())?;
        let listener = Self {
            endpoint: endpoint.clone(),
            listener,
        };
        listener
            .listener
            .set_nonblocking(true)
            .map_err(|source| ListenerError::NonBlocking { source })?;
        info!(
            target: TRANSPORT_TARGET,
            endpoint = %listener.endpoint,
            "socket listener bound"
        );
        Ok(listener)
    }

    /// Endpoint the listener is bound to.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Accepts one pending connection, if any.
    pub(crate) fn accept(&self) -> io::Result<Option<UnixStream>> {
        match self.listener.accept() {
            Ok((stream, _)) => Ok(Some(stream)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }

    pub(crate) fn as_fd(&self) -> BorrowedFd<'_> {
        self.listener.as_fd()
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        let path = self.endpoint.path();
        if let Err(error) = fs::remove_file(path.as_std_path())
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(
                target: TRANSPORT_TARGET,
                error = %error,
                path = %path,
                "failed to remove unix socket file"
            );
        }
    }
}

fn bind_unix(path: &Path) -> Result<UnixListener, ListenerError> {
    if path.exists() {
        let metadata = fs::symlink_metadata(path).map_err(|source| ListenerError::Metadata {
            path: path.display().to_string(),
            source,
        })?;
        if !metadata.file_type().is_socket() {
            return Err(ListenerError::NotSocket {
                path: path.display().to_string(),
            });
        }
        match UnixStream::connect(path) {
            Ok(_stream) => {
                return Err(ListenerError::InUse {
                    path: path.display().to_string(),
                });
            }
            Err(error)
                if error.kind() == io::ErrorKind::ConnectionRefused
                    || error.kind() == io::ErrorKind::NotFound =>
            {
                warn!(
                    target: TRANSPORT_TARGET,
                    path = %path.display(),
                    "removing stale unix socket"
                );
                fs::remove_file(path).map_err(|source| ListenerError::Cleanup {
                    path: path.display().to_string(),
                    source,
                })?;
            }
            Err(error) => {
                return Err(ListenerError::Probe {
                    path: path.display().to_string(),
                    source: error,
                });
            }
        }
    }

    UnixListener::bind(path).map_err(|source| ListenerError::Bind {
        path: path.display().to_string(),
        source,
    })
}
