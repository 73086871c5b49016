//! Bookkeeping for requests awaiting a response.
//!
//! Either peer may initiate requests on the same socket, so an outstanding
//! request is keyed by its id and the side that sent it. Ids only need to be
//! unique among requests outstanding in one direction.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use crate::error::CorrelationError;
use crate::message::RequestId;

/// Which side of the socket issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    /// The client sent the request; the server owes the response.
    ClientInitiated,
    /// The server sent the request; the client owes the response.
    ServerInitiated,
}

impl fmt::Display for Direction {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::ClientInitiated => "client-initiated",
            Self::ServerInitiated => "server-initiated",
        })
    }
}

/// Lifecycle of an outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// Sent and unanswered.
    AwaitingResponse,
}

/// A request that has not been answered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Request id.
    pub id: RequestId,
    /// Issuing side.
    pub direction: Direction,
    /// Requested method.
    pub method: String,
    /// When the request was tracked.
    pub created_at: Instant,
    /// Current state.
    pub state: PendingState,
}

/// Outstanding requests for one session.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: BTreeMap<(Direction, RequestId), PendingRequest>,
    next_id: RequestId,
}

impl Correlator {
    /// Creates an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh id for a request issued in `direction`.
    ///
    /// Ids increase monotonically and skip any still outstanding.
    pub fn next_id(&mut self, direction: Direction) -> RequestId {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            if !self.is_pending(direction, self.next_id) {
                return self.next_id;
            }
        }
    }

    /// Records an outstanding request.
    pub fn track(
        &mut self,
        direction: Direction,
        id: RequestId,
        method: impl Into<String>,
    ) -> Result<(), CorrelationError> {
        if self.is_pending(direction, id) {
            return Err(CorrelationError::Collision { id, direction });
        }
        self.pending.insert(
            (direction, id),
            PendingRequest {
                id,
                direction,
                method: method.into(),
                created_at: Instant::now(),
                state: PendingState::AwaitingResponse,
            },
        );
        Ok(())
    }

    /// Removes and returns the request answered by a response.
    pub fn resolve(
        &mut self,
        direction: Direction,
        id: RequestId,
    ) -> Result<PendingRequest, CorrelationError> {
        self.pending
            .remove(&(direction, id))
            .ok_or(CorrelationError::Unknown { id, direction })
    }

    /// Whether a request with this id is outstanding in `direction`.
    #[must_use]
    pub fn is_pending(&self, direction: Direction, id: RequestId) -> bool {
        self.pending.contains_key(&(direction, id))
    }

    /// Drops every outstanding request, returning them in key order.
    pub fn purge(&mut self) -> Vec<PendingRequest> {
        std::mem::take(&mut self.pending).into_values().collect()
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn correlator() -> Correlator {
        Correlator::new()
    }

    #[rstest]
    fn same_id_may_be_outstanding_in_both_directions(mut correlator: Correlator) {
        correlator
            .track(Direction::ClientInitiated, 1, "askId")
            .expect("client request");
        correlator
            .track(Direction::ServerInitiated, 1, "ping")
            .expect("server request");
        assert_eq!(correlator.len(), 2);

        let resolved = correlator
            .resolve(Direction::ServerInitiated, 1)
            .expect("resolve");
        assert_eq!(resolved.method, "ping");
        assert!(correlator.is_pending(Direction::ClientInitiated, 1));
    }

    #[rstest]
    fn duplicate_id_in_one_direction_collides(mut correlator: Correlator) {
        correlator
            .track(Direction::ClientInitiated, 5, "fire_event")
            .expect("first");
        assert_eq!(
            correlator.track(Direction::ClientInitiated, 5, "undo"),
            Err(CorrelationError::Collision {
                id: 5,
                direction: Direction::ClientInitiated,
            })
        );
    }

    #[rstest]
    fn resolving_twice_is_unknown(mut correlator: Correlator) {
        correlator
            .track(Direction::ServerInitiated, 3, "ping")
            .expect("track");
        correlator
            .resolve(Direction::ServerInitiated, 3)
            .expect("first resolve");
        assert_eq!(
            correlator.resolve(Direction::ServerInitiated, 3),
            Err(CorrelationError::Unknown {
                id: 3,
                direction: Direction::ServerInitiated,
            })
        );
    }

    #[rstest]
    fn next_id_skips_outstanding_ids(mut correlator: Correlator) {
        correlator
            .track(Direction::ServerInitiated, 1, "ping")
            .expect("track");
        assert_eq!(correlator.next_id(Direction::ServerInitiated), 2);
        assert_eq!(correlator.next_id(Direction::ServerInitiated), 3);
    }

    #[rstest]
    fn purge_empties_the_table(mut correlator: Correlator) {
        correlator
            .track(Direction::ClientInitiated, 1, "askId")
            .expect("track");
        correlator
            .track(Direction::ServerInitiated, 9, "ping")
            .expect("track");
        let purged = correlator.purge();
        assert_eq!(purged.len(), 2);
        assert!(correlator.is_empty());
    }
}
