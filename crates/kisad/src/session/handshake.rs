//! Per-session state machine for server-initiated exchanges.
//!
//! The server never sends a request the client must answer before it can
//! make progress. Instead it announces an inquiry with a small notification,
//! waits for the client to ask for it with an ordinary request, and answers
//! that request. Inquiries queue in FIFO order and only the head is ever
//! announced, so a session walks `Idle -> Notified -> ClientRequested ->
//! Resolved -> Idle` once per inquiry.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use kisa_protocol::methods::DrawParams;
use kisa_protocol::{Inquiry, RequestId};

/// Where the head inquiry is in its exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing is announced.
    Idle,
    /// The head inquiry was announced and the client has not asked yet.
    Notified,
    /// The client asked and the answer is being prepared.
    ClientRequested,
    /// The answer went out; the next inquiry has not been announced.
    Resolved,
}

/// Something queued for a client to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Queued {
    /// Session identification.
    Id,
    /// Render data too large to push.
    Draw(DrawParams),
}

impl Queued {
    /// Inquiry kind announced for this entry.
    #[must_use]
    pub const fn inquiry(&self) -> Inquiry {
        match self {
            Self::Id => Inquiry::Id,
            Self::Draw(_) => Inquiry::Draw,
        }
    }
}

/// Timing knobs for unanswered announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePolicy {
    /// How long the client has to ask after an announcement.
    pub timeout: Duration,
    /// Re-announcements before falling back to a liveness probe.
    pub retries: u32,
}

impl HandshakePolicy {
    /// Policy taken from the resolved configuration.
    #[must_use]
    pub fn from_config(config: &kisa_config::Config) -> Self {
        Self {
            timeout: Duration::from_millis(config.handshake_timeout_ms),
            retries: config.handshake_retries,
        }
    }
}

/// What the session owner must do after [`Handshake::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Send the announcement for this inquiry again.
    Announce(Inquiry),
    /// Send a `ping` request and report it with [`Handshake::probe_sent`].
    Probe,
    /// The probe went unanswered; tear the session down.
    Expire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Probe {
    id: RequestId,
    sent_at: Instant,
}

/// Inquiry queue plus the phase of its head.
#[derive(Debug)]
pub struct Handshake {
    phase: Phase,
    queue: VecDeque<Queued>,
    announced_at: Option<Instant>,
    attempts: u32,
    probe: Option<Probe>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// An idle handshake with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            queue: VecDeque::new(),
            announced_at: None,
            attempts: 0,
            probe: None,
        }
    }

    /// Phase of the exchange at the head of the queue.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether `inquiry` is queued, announced or not.
    #[must_use]
    pub fn is_queued(&self, inquiry: Inquiry) -> bool {
        self.queue.iter().any(|queued| queued.inquiry() == inquiry)
    }

    /// Number of queued inquiries, including the announced head.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued or in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queues an inquiry.
    ///
    /// A draw replaces the payload of a draw already queued, so the client
    /// always fetches the newest render. Returns the inquiry to announce
    /// when the queue was idle.
    pub fn enqueue(&mut self, queued: Queued, now: Instant) -> Option<Inquiry> {
        if let Queued::Draw(latest) = &queued
            && let Some(Queued::Draw(existing)) = self
                .queue
                .iter_mut()
                .find(|entry| matches!(entry, Queued::Draw(_)))
        {
            existing.clone_from(latest);
            return None;
        }
        self.queue.push_back(queued);
        if self.phase == Phase::Idle {
            self.announce_head(now)
        } else {
            None
        }
    }

    /// Accepts the client's request for `inquiry`.
    ///
    /// Only the announced head can be asked for. The returned entry carries
    /// the payload to answer with; call [`Handshake::finish`] once the
    /// response is queued.
    pub fn begin(&mut self, inquiry: Inquiry) -> Option<Queued> {
        if self.phase != Phase::Notified
            || self.queue.front().map(Queued::inquiry) != Some(inquiry)
        {
            return None;
        }
        self.phase = Phase::ClientRequested;
        self.probe = None;
        self.queue.pop_front()
    }

    /// Completes the current exchange and announces the next inquiry, if any.
    pub fn finish(&mut self, now: Instant) -> Option<Inquiry> {
        if self.phase != Phase::ClientRequested {
            return None;
        }
        self.phase = Phase::Resolved;
        self.announce_head(now)
    }

    /// Checks the announcement and probe windows at `now`.
    pub fn poll(&mut self, now: Instant, policy: HandshakePolicy) -> Option<HandshakeAction> {
        if let Some(probe) = self.probe {
            return (now.saturating_duration_since(probe.sent_at) >= policy.timeout)
                .then_some(HandshakeAction::Expire);
        }
        if self.phase != Phase::Notified {
            return None;
        }
        let announced_at = self.announced_at?;
        if now.saturating_duration_since(announced_at) < policy.timeout {
            return None;
        }
        if self.attempts < policy.retries {
            self.attempts += 1;
            self.announced_at = Some(now);
            return self
                .queue
                .front()
                .map(|head| HandshakeAction::Announce(head.inquiry()));
        }
        Some(HandshakeAction::Probe)
    }

    /// Records the liveness probe sent after [`HandshakeAction::Probe`].
    pub fn probe_sent(&mut self, id: RequestId, now: Instant) {
        self.probe = Some(Probe { id, sent_at: now });
    }

    /// Outstanding probe id.
    #[must_use]
    pub fn probe_id(&self) -> Option<RequestId> {
        self.probe.map(|probe| probe.id)
    }

    /// Clears the probe after the client answered it.
    ///
    /// The client is alive but missed the announcement, so the head is
    /// announced again with a fresh retry budget.
    pub fn probe_answered(&mut self, id: RequestId, now: Instant) -> Option<Inquiry> {
        if self.probe_id() != Some(id) {
            return None;
        }
        self.probe = None;
        if self.phase != Phase::Notified {
            return None;
        }
        self.attempts = 0;
        self.announced_at = Some(now);
        self.queue.front().map(Queued::inquiry)
    }

    fn announce_head(&mut self, now: Instant) -> Option<Inquiry> {
        self.attempts = 0;
        match self.queue.front() {
            Some(head) => {
                self.phase = Phase::Notified;
                self.announced_at = Some(now);
                Some(head.inquiry())
            }
            None => {
                self.phase = Phase::Idle;
                self.announced_at = None;
                None
            }
        }
    }
}
