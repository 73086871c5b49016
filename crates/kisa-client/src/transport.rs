//! Socket connection helpers.

use std::io;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use socket2::{Domain, SockAddr, Socket, Type};

use kisa_config::SocketEndpoint;

use crate::ClientError;

pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects to the server socket, giving up after [`CONNECTION_TIMEOUT`].
pub(crate) fn connect(endpoint: &SocketEndpoint) -> Result<UnixStream, ClientError> {
    connect_unix(endpoint.path().as_str()).map_err(|source| ClientError::Connect {
        endpoint: endpoint.to_string(),
        source,
    })
}

fn connect_unix(path: &str) -> io::Result<UnixStream> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, CONNECTION_TIMEOUT)?;
    Ok(socket.into())
}
