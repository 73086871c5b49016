//! Test double for [`HealthReporter`] that records lifecycle events.

use std::sync::Mutex;

use kisa_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;
use crate::session::{SessionFault, SessionId};

/// Health events observed during a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ListenerBound(String),
    SessionOpened(SessionId),
    SessionClosed { session: SessionId, reason: String },
    Shutdown(Option<String>),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    pub fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }

    /// Close reasons recorded for `session`.
    #[must_use]
    pub fn close_reasons(&self, session: SessionId) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::SessionClosed { session: closed, reason } if closed == session => {
                    Some(reason)
                }
                _ => None,
            })
            .collect()
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn listener_bound(&self, endpoint: &SocketEndpoint) {
        self.record(HealthEvent::ListenerBound(endpoint.to_string()));
    }

    fn session_opened(&self, session: SessionId) {
        self.record(HealthEvent::SessionOpened(session));
    }

    fn session_closed(&self, session: SessionId, reason: &SessionFault) {
        self.record(HealthEvent::SessionClosed {
            session,
            reason: reason.to_string(),
        });
    }

    fn shutdown(&self, error: Option<&str>) {
        self.record(HealthEvent::Shutdown(error.map(str::to_owned)));
    }
}
