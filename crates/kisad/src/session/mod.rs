//! Server-side record of each connected client.

mod fault;
pub mod handshake;
mod registry;

use std::fmt;
use std::os::fd::BorrowedFd;

use tracing::debug;

use kisa_protocol::{Correlator, Message, encode};

use crate::transport::Connection;

pub use self::fault::SessionFault;
pub use self::handshake::{Handshake, HandshakeAction, HandshakePolicy, Phase, Queued};
pub use self::registry::SessionRegistry;

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Server-assigned session identifier. Clients never choose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// One client connection and its protocol state.
///
/// Output problems do not return errors to the caller. They record a
/// [`SessionFault`] and the multiplexer reaps the session before its next
/// poll, so a failing peer can never stall work for the others.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    connection: Connection,
    pending: Correlator,
    handshake: Handshake,
    identified: bool,
    closing: bool,
    fault: Option<SessionFault>,
}

impl Session {
    pub(crate) fn new(id: SessionId, connection: Connection) -> Self {
        Self {
            id,
            connection,
            pending: Correlator::new(),
            handshake: Handshake::new(),
            identified: false,
            closing: false,
            fault: None,
        }
    }

    /// This session's id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Whether the client completed the `askId` exchange.
    #[must_use]
    pub const fn is_identified(&self) -> bool {
        self.identified
    }

    /// Records that the client answered the identity inquiry.
    pub const fn mark_identified(&mut self) {
        self.identified = true;
    }

    /// Requests outstanding in either direction.
    #[must_use]
    pub const fn pending(&self) -> &Correlator {
        &self.pending
    }

    /// Mutable access to the outstanding requests.
    pub const fn pending_mut(&mut self) -> &mut Correlator {
        &mut self.pending
    }

    /// Inquiries queued for this client.
    #[must_use]
    pub const fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Mutable access to the inquiry queue.
    pub const fn handshake_mut(&mut self) -> &mut Handshake {
        &mut self.handshake
    }

    /// Encodes and queues `message`.
    pub fn send(&mut self, message: &Message) {
        match encode(message) {
            Ok(payload) => self.send_encoded(&payload),
            Err(error) => self.fail(SessionFault::Encode(error)),
        }
    }

    /// Queues an already encoded payload.
    pub fn send_encoded(&mut self, payload: &[u8]) {
        if self.fault.is_some() {
            return;
        }
        if let Err(fault) = self.connection.send(payload) {
            self.fail(fault);
        }
    }

    /// Tears the session down once queued output has drained.
    pub const fn close_after_flush(&mut self) {
        self.closing = true;
    }

    /// Records why the session must end. The first fault wins.
    pub fn fail(&mut self, fault: SessionFault) {
        if self.fault.is_none() {
            debug!(
                target: SESSION_TARGET,
                session = %self.id,
                reason = fault.label(),
                error = %fault,
                "session marked for teardown"
            );
            self.fault = Some(fault);
        }
    }

    /// Whether a fault was recorded.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.fault.is_some()
    }

    /// Largest encoded message the session can send.
    #[must_use]
    pub const fn max_payload(&self) -> usize {
        self.connection.max_payload()
    }

    pub(crate) fn as_fd(&self) -> BorrowedFd<'_> {
        self.connection.as_fd()
    }

    pub(crate) fn wants_write(&self) -> bool {
        self.connection.has_pending_writes()
    }

    pub(crate) const fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    pub(crate) fn ready_to_reap(&self) -> bool {
        self.fault.is_some() || (self.closing && !self.connection.has_pending_writes())
    }

    pub(crate) fn take_fault(&mut self) -> SessionFault {
        self.fault.take().unwrap_or(SessionFault::Closed)
    }
}
