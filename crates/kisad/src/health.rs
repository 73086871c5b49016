//! Structured health reporting for server lifecycle events.

use std::sync::Arc;

use kisa_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;
use crate::session::{SessionFault, SessionId};

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the listening socket is bound.
    fn listener_bound(&self, endpoint: &SocketEndpoint);

    /// Invoked when a client connects.
    fn session_opened(&self, session: SessionId);

    /// Invoked when a session is torn down.
    fn session_closed(&self, session: SessionId, reason: &SessionFault);

    /// Invoked when the server stops serving, with the fatal error if any.
    fn shutdown(&self, error: Option<&str>);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn listener_bound(&self, endpoint: &SocketEndpoint) {
        (**self).listener_bound(endpoint);
    }

    fn session_opened(&self, session: SessionId) {
        (**self).session_opened(session);
    }

    fn session_closed(&self, session: SessionId, reason: &SessionFault) {
        (**self).session_closed(session, reason);
    }

    fn shutdown(&self, error: Option<&str>) {
        (**self).shutdown(error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting server bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.socket_endpoint(),
            server_id = %config.server_id(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "server bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "server bootstrap failed"
        );
    }

    fn listener_bound(&self, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_bound",
            socket = %endpoint,
            "accepting clients"
        );
    }

    fn session_opened(&self, session: SessionId) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "session_opened",
            session = %session,
            "client connected"
        );
    }

    fn session_closed(&self, session: SessionId, reason: &SessionFault) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "session_closed",
            session = %session,
            reason = reason.label(),
            "client disconnected"
        );
    }

    fn shutdown(&self, error: Option<&str>) {
        match error {
            Some(error) => tracing::error!(
                target: HEALTH_TARGET,
                event = "shutdown",
                error,
                "server stopped after a fatal error"
            ),
            None => tracing::info!(
                target: HEALTH_TARGET,
                event = "shutdown",
                "server stopped"
            ),
        }
    }
}
