//! Single-threaded readiness loop over the listener and every session.

use std::io;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, warn};

use kisa_protocol::{Message, Notification, methods};

use super::{
    Connection, ConnectionLimits, MultiplexError, SessionHandler, SocketListener, TRANSPORT_TARGET,
};
use crate::session::{SessionFault, SessionId, SessionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Listener,
    Session(SessionId),
}

/// Owns the listening socket, the poll set, and the session registry.
///
/// [`Multiplexer::run`] is the only place the server waits. Each pass polls
/// once, services every ready descriptor exactly once, lets the handler
/// check timers, and reaps sessions that failed or finished closing.
#[derive(Debug)]
pub struct Multiplexer {
    listener: Option<SocketListener>,
    sessions: SessionRegistry,
    limits: ConnectionLimits,
}

impl Multiplexer {
    /// Builds a loop that accepts connections from `listener`.
    #[must_use]
    pub fn new(listener: SocketListener, limits: ConnectionLimits) -> Self {
        Self {
            listener: Some(listener),
            sessions: SessionRegistry::new(),
            limits,
        }
    }

    /// Builds a loop without a listener; sessions arrive through
    /// [`Multiplexer::adopt`].
    #[must_use]
    pub fn detached(limits: ConnectionLimits) -> Self {
        Self {
            listener: None,
            sessions: SessionRegistry::new(),
            limits,
        }
    }

    /// Sessions currently polled.
    #[must_use]
    pub const fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Registers an already connected stream as a new session.
    pub fn adopt<H: SessionHandler>(
        &mut self,
        stream: UnixStream,
        handler: &mut H,
    ) -> io::Result<SessionId> {
        let connection = Connection::new(stream, self.limits)?;
        let id = self.sessions.insert(connection);
        debug!(target: TRANSPORT_TARGET, session = %id, "session opened");
        handler.on_open(&mut self.sessions, id);
        Ok(id)
    }

    /// Runs one pass of the loop, waiting up to `timeout` (forever when
    /// `None`) for readiness. Returns the number of ready descriptors.
    pub fn run<H: SessionHandler>(
        &mut self,
        handler: &mut H,
        timeout: Option<Duration>,
    ) -> Result<usize, MultiplexError> {
        let ready = self.poll_ready(timeout)?;
        for &(slot, events) in &ready {
            match slot {
                Slot::Listener => self.accept_one(handler),
                Slot::Session(id) => self.service(id, events, handler),
            }
        }
        handler.on_tick(&mut self.sessions, Instant::now());
        self.reap(handler);
        Ok(ready.len())
    }

    /// Sends a best-effort `shutdown` notification to every session and
    /// closes them all.
    pub fn shutdown<H: SessionHandler>(&mut self, handler: &mut H) {
        let notice = Message::from(Notification::new(methods::SHUTDOWN, None));
        for id in self.sessions.ids() {
            let Some(mut session) = self.sessions.remove(id) else {
                continue;
            };
            session.send(&notice);
            if let Err(fault) = session.connection_mut().flush() {
                debug!(
                    target: TRANSPORT_TARGET,
                    session = %id,
                    error = %fault,
                    "shutdown notice not delivered"
                );
            }
            session.pending_mut().purge();
            handler.on_close(&mut self.sessions, id, &SessionFault::Shutdown);
        }
    }

    fn poll_ready(&self, timeout: Option<Duration>) -> Result<Vec<(Slot, PollFlags)>, MultiplexError> {
        let mut slots = Vec::with_capacity(self.sessions.len() + 1);
        let mut fds = Vec::with_capacity(self.sessions.len() + 1);
        if let Some(listener) = &self.listener {
            slots.push(Slot::Listener);
            fds.push(PollFd::new(listener.as_fd(), PollFlags::POLLIN));
        }
        for session in self.sessions.iter() {
            let mut events = PollFlags::POLLIN;
            if session.wants_write() {
                events |= PollFlags::POLLOUT;
            }
            slots.push(Slot::Session(session.id()));
            fds.push(PollFd::new(session.as_fd(), events));
        }

        match poll(&mut fds, poll_timeout(timeout)) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(Vec::new()),
            Err(error) => return Err(MultiplexError::Poll(error)),
        }

        Ok(slots
            .into_iter()
            .zip(fds.iter())
            .filter_map(|(slot, fd)| {
                fd.revents()
                    .filter(|events| !events.is_empty())
                    .map(|events| (slot, events))
            })
            .collect())
    }

    fn accept_one<H: SessionHandler>(&mut self, handler: &mut H) {
        let Some(listener) = &self.listener else {
            return;
        };
        match listener.accept() {
            Ok(Some(stream)) => {
                if let Err(error) = self.adopt(stream, handler) {
                    warn!(
                        target: TRANSPORT_TARGET,
                        error = %error,
                        "failed to prepare accepted connection"
                    );
                }
            }
            Ok(None) => {}
            Err(error) => {
                warn!(
                    target: TRANSPORT_TARGET,
                    error = %error,
                    "socket accept failed"
                );
            }
        }
    }

    fn service<H: SessionHandler>(&mut self, id: SessionId, events: PollFlags, handler: &mut H) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        if events.contains(PollFlags::POLLNVAL) {
            session.fail(SessionFault::Io(io::Error::from(io::ErrorKind::InvalidInput)));
            return;
        }
        if events.contains(PollFlags::POLLOUT)
            && let Err(fault) = session.connection_mut().flush()
        {
            session.fail(fault);
            return;
        }
        if !events.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
            return;
        }
        // Hangups are reported through the read: pending bytes first, then EOF.
        let frames = match session.connection_mut().read_frames() {
            Ok(frames) => frames,
            Err(fault) => {
                session.fail(fault);
                return;
            }
        };
        for frame in frames {
            if self.sessions.get(id).is_none_or(|session| session.is_failed()) {
                break;
            }
            handler.on_frame(&mut self.sessions, id, &frame);
        }
    }

    fn reap<H: SessionHandler>(&mut self, handler: &mut H) {
        let finished: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|session| session.ready_to_reap())
            .map(|session| session.id())
            .collect();
        for id in finished {
            let Some(mut session) = self.sessions.remove(id) else {
                continue;
            };
            let fault = session.take_fault();
            let purged = session.pending_mut().purge();
            debug!(
                target: TRANSPORT_TARGET,
                session = %id,
                reason = fault.label(),
                purged = purged.len(),
                "session closed"
            );
            handler.on_close(&mut self.sessions, id, &fault);
        }
    }
}

fn poll_timeout(timeout: Option<Duration>) -> PollTimeout {
    timeout.map_or(PollTimeout::NONE, |duration| {
        PollTimeout::from(u16::try_from(duration.as_millis()).unwrap_or(u16::MAX))
    })
}
