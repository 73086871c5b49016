//! The kisa editor server.
//!
//! One long-lived process owns the editor state and serves any number of
//! clients over a Unix socket. Clients and server exchange JSON-RPC shaped
//! messages in both directions, so the server never blocks on a client:
//! anything it wants from a client is announced with a small notification
//! and fetched by the client with an ordinary request.
//!
//! Everything runs on one thread. The [`Multiplexer`] polls the listener and
//! every session, the [`Server`] decodes and routes messages, and the
//! [`Dispatcher`] turns client intents into batches of commands recorded in
//! an append-only event log. Failed batches are rolled back in full; undo,
//! redo, and delayed insertion all append to the log rather than rewrite it.

mod bootstrap;
pub mod dispatch;
mod health;
mod process;
pub mod server;
pub mod session;
mod telemetry;
pub mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use dispatch::{Dispatcher, ScratchExecutor};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, SHUTDOWN_SIGNALS, run_server, run_server_with};
pub use server::Server;
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::Multiplexer;

#[cfg(test)]
mod tests;
