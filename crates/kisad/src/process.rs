//! Process supervision: signal handling and the serve loop.

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use thiserror::Error;
use tracing::info;

use crate::bootstrap::{BootstrapError, ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::transport::MultiplexError;

const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Signals that stop the server.
pub const SHUTDOWN_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Errors surfaced while launching or supervising the server process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Signals {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Bootstrapping the server failed.
    #[error("server bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// The serve loop failed.
    #[error("server loop failed: {source}")]
    Serve {
        /// Underlying loop error.
        #[source]
        source: MultiplexError,
    },
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<MultiplexError> for LaunchError {
    fn from(source: MultiplexError) -> Self {
        Self::Serve { source }
    }
}

/// Runs the server with the production collaborators until a shutdown
/// signal arrives.
pub fn run_server() -> Result<(), LaunchError> {
    let stop = Arc::new(AtomicBool::new(false));
    for signal in SHUTDOWN_SIGNALS {
        signal_hook::flag::register(signal, Arc::clone(&stop))
            .map_err(|source| LaunchError::Signals { source })?;
    }
    run_server_with(
        &SystemConfigLoader,
        Arc::new(StructuredHealthReporter::new()),
        &stop,
    )
}

/// Runs the server with injected collaborators until `stop` is set.
pub fn run_server_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    stop: &AtomicBool,
) -> Result<(), LaunchError> {
    let mut daemon = bootstrap_with(loader, reporter)?;
    info!(
        target: PROCESS_TARGET,
        socket = %daemon.config().socket_endpoint(),
        "serving"
    );
    daemon.serve(stop)?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}
