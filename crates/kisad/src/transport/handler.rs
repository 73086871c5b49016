//! Callbacks from the poll loop into the protocol layer.

use std::time::Instant;

use crate::session::{SessionFault, SessionId, SessionRegistry};

/// Receives session lifecycle and traffic from the [`super::Multiplexer`].
///
/// Every callback borrows the registry, so a handler can answer the
/// originating session and push to others in the same call. Callbacks run
/// on the loop thread and must not block.
pub trait SessionHandler {
    /// A connection was accepted or adopted.
    fn on_open(&mut self, sessions: &mut SessionRegistry, id: SessionId);

    /// A complete frame arrived on `id`.
    fn on_frame(&mut self, sessions: &mut SessionRegistry, id: SessionId, frame: &[u8]);

    /// `id` was removed from the registry. Its pending requests are purged.
    fn on_close(&mut self, sessions: &mut SessionRegistry, id: SessionId, fault: &SessionFault);

    /// Called once per loop pass after ready descriptors were serviced.
    fn on_tick(&mut self, sessions: &mut SessionRegistry, now: Instant);
}
