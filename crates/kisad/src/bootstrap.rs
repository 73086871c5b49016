//! Server bootstrap orchestration.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;
use tracing::info;

use kisa_config::{Config, Keymap, SocketPreparationError};

use crate::dispatch::{DispatchLimits, Dispatcher, ScratchExecutor};
use crate::health::HealthReporter;
use crate::server::{MethodRegistry, Server, ServerSettings};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::transport::{ConnectionLimits, ListenerError, MultiplexError, Multiplexer, SocketListener};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the server configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that hands out an already resolved configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already loaded configuration.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare server socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
    /// The listening socket could not be bound.
    #[error("failed to bind server socket: {source}")]
    Listener {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
}

/// A bootstrapped server, bound and ready to serve.
pub struct Daemon {
    config: Config,
    multiplexer: Multiplexer,
    server: Server<ScratchExecutor>,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Daemon {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// The poll loop and its sessions.
    #[must_use]
    pub const fn multiplexer(&self) -> &Multiplexer {
        &self.multiplexer
    }

    /// The message handler.
    #[must_use]
    pub const fn server(&self) -> &Server<ScratchExecutor> {
        &self.server
    }

    /// Runs one loop pass, waking at least once per tick interval.
    pub fn step(&mut self) -> Result<usize, MultiplexError> {
        let tick = self.server.settings().tick_interval();
        self.multiplexer.run(&mut self.server, Some(tick))
    }

    /// Serves until `stop` is set or the loop fails.
    ///
    /// Every session is sent a `shutdown` notification before returning,
    /// whether the loop stopped cleanly or not.
    pub fn serve(&mut self, stop: &AtomicBool) -> Result<(), MultiplexError> {
        let outcome = loop {
            if stop.load(Ordering::Relaxed) {
                break Ok(());
            }
            if let Err(error) = self.step() {
                break Err(error);
            }
        };
        self.multiplexer.shutdown(&mut self.server);
        match &outcome {
            Ok(()) => self.reporter.shutdown(None),
            Err(error) => self.reporter.shutdown(Some(&error.to_string())),
        }
        outcome
    }
}

/// Bootstraps the server using the supplied collaborators.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let endpoint = config.socket_endpoint();
    if let Err(source) = endpoint.prepare_filesystem() {
        let error = BootstrapError::Socket { source };
        reporter.bootstrap_failed(&error);
        return Err(error);
    }

    let listener = match SocketListener::bind(&endpoint) {
        Ok(listener) => listener,
        Err(source) => {
            let error = BootstrapError::Listener { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };
    reporter.listener_bound(listener.endpoint());

    let dispatcher = Dispatcher::new(
        ScratchExecutor::new(),
        Keymap::builtin(),
        DispatchLimits::from_config(&config),
    );
    let server = Server::new(
        dispatcher,
        MethodRegistry::standard(),
        ServerSettings::from_config(&config),
        Arc::clone(&reporter),
    );
    let multiplexer = Multiplexer::new(listener, ConnectionLimits::from_config(&config));
    info!(
        target: BOOTSTRAP_TARGET,
        notification_limit = config.notification_limit,
        max_frame_bytes = config.max_frame_bytes,
        "protocol limits resolved"
    );
    reporter.bootstrap_succeeded(&config);

    Ok(Daemon {
        config,
        multiplexer,
        server,
        telemetry,
        reporter,
    })
}
