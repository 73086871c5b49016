//! Protocol layer between the poll loop and the dispatcher.
//!
//! The server decodes frames, enforces the identification gate, routes
//! requests through the [`MethodRegistry`], answers on the same session, and
//! pushes render data to every identified session after the state changes.
//! Anything the server wants from a client goes through the per-session
//! handshake; the server never issues a request it waits on.

mod handler;
mod methods;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use kisa_protocol::methods::DRAW;
use kisa_protocol::{Inquiry, Message, Notification, Params, encode};

use crate::dispatch::{CommandExecutor, Dispatcher};
use crate::health::HealthReporter;
use crate::session::{HandshakePolicy, Queued, Session, SessionRegistry};

pub use self::methods::{MethodKind, MethodRegistry};

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// Protocol knobs taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Largest notification pushed without the handshake, in bytes.
    pub notification_limit: usize,
    /// Timing of unanswered announcements.
    pub handshake: HandshakePolicy,
}

impl ServerSettings {
    /// Reads the settings out of `config`.
    #[must_use]
    pub fn from_config(config: &kisa_config::Config) -> Self {
        Self {
            notification_limit: config.notification_limit,
            handshake: HandshakePolicy::from_config(config),
        }
    }

    /// How often the loop should wake to check handshake windows.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        const MAX_TICK: Duration = Duration::from_millis(250);
        (self.handshake.timeout / 4).clamp(Duration::from_millis(1), MAX_TICK)
    }
}

/// Session handler that runs the editor protocol over a [`Dispatcher`].
pub struct Server<E> {
    dispatcher: Dispatcher<E>,
    methods: MethodRegistry,
    settings: ServerSettings,
    reporter: Arc<dyn HealthReporter>,
}

impl<E: CommandExecutor> Server<E> {
    /// Builds a server around `dispatcher`.
    #[must_use]
    pub fn new(
        dispatcher: Dispatcher<E>,
        methods: MethodRegistry,
        settings: ServerSettings,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            dispatcher,
            methods,
            settings,
            reporter,
        }
    }

    /// The dispatcher this server drives.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher<E> {
        &self.dispatcher
    }

    /// Mutable access to the dispatcher.
    pub const fn dispatcher_mut(&mut self) -> &mut Dispatcher<E> {
        &mut self.dispatcher
    }

    /// Protocol limits in force.
    #[must_use]
    pub const fn settings(&self) -> ServerSettings {
        self.settings
    }

    /// Sends current render data to every identified session.
    ///
    /// Draws within the notification limit are pushed directly unless a
    /// draw inquiry is already queued, in which case its payload is
    /// replaced. Larger draws are announced for the client to fetch.
    pub fn broadcast_draw(&self, sessions: &mut SessionRegistry, now: Instant) {
        let draw = self.dispatcher.render();
        let encoded = Params::from_serializable(&draw)
            .map(|params| Message::from(Notification::new(DRAW, Some(params))))
            .and_then(|message| encode(&message));
        let encoded = match encoded {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(target: SERVER_TARGET, error = %error, "draw could not be encoded");
                return;
            }
        };
        let fits = encoded.len() <= self.settings.notification_limit;
        for session in sessions.iter_mut() {
            if !session.is_identified() || session.is_failed() {
                continue;
            }
            if fits && !session.handshake().is_queued(Inquiry::Draw) {
                session.send_encoded(&encoded);
            } else if let Some(inquiry) = session
                .handshake_mut()
                .enqueue(Queued::Draw(draw.clone()), now)
            {
                announce(session, inquiry);
            }
        }
    }
}

/// Sends the notification that opens the exchange for `inquiry`.
fn announce(session: &mut Session, inquiry: Inquiry) {
    let notice = Message::from(Notification::new(inquiry.notification_method(), None));
    session.send(&notice);
}
