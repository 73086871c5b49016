//! Socket transport: the listener, per-session connections, and the poll
//! loop that drives them.

mod connection;
mod errors;
mod handler;
mod listener;
mod multiplexer;

pub(crate) use self::connection::Connection;
pub use self::connection::ConnectionLimits;
pub use self::errors::{ListenerError, MultiplexError};
pub use self::handler::SessionHandler;
pub use self::listener::SocketListener;
pub use self::multiplexer::Multiplexer;

const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
