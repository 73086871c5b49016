//! Method names the server answers, mapped to a closed set of handlers.

use std::collections::BTreeMap;

use kisa_protocol::methods;

/// Handler selected for a client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Completes identification.
    AskId,
    /// Fetches announced render data.
    AskDraw,
    /// Dispatches a key press or named event.
    FireEvent,
    /// Reverts the history head.
    Undo,
    /// Re-applies the last reverted batch.
    Redo,
    /// Inserts commands at an earlier log position.
    InsertAt,
    /// Records a replay snapshot.
    Snapshot,
    /// Lists the event log.
    Events,
    /// Looks up binding documentation.
    KeymapHelp,
    /// Liveness check from the client.
    Ping,
    /// Ends the session.
    Close,
}

impl MethodKind {
    /// Whether the session must be identified before calling the method.
    #[must_use]
    pub const fn requires_identity(self) -> bool {
        !matches!(self, Self::AskId | Self::Ping | Self::Close)
    }
}

/// Name to handler table, built once at startup and owned by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodRegistry {
    methods: BTreeMap<String, MethodKind>,
}

impl MethodRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every method of the editor protocol.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for (name, kind) in [
            (methods::ASK_ID, MethodKind::AskId),
            (methods::ASK_DRAW, MethodKind::AskDraw),
            (methods::FIRE_EVENT, MethodKind::FireEvent),
            (methods::UNDO, MethodKind::Undo),
            (methods::REDO, MethodKind::Redo),
            (methods::INSERT_AT, MethodKind::InsertAt),
            (methods::SNAPSHOT, MethodKind::Snapshot),
            (methods::EVENTS, MethodKind::Events),
            (methods::KEYMAP_HELP, MethodKind::KeymapHelp),
            (methods::PING, MethodKind::Ping),
            (methods::CLOSE, MethodKind::Close),
        ] {
            registry.register(name, kind);
        }
        registry
    }

    /// Maps `name` to `kind`, returning the kind it replaced.
    pub fn register(&mut self, name: &str, kind: MethodKind) -> Option<MethodKind> {
        self.methods.insert(name.to_owned(), kind)
    }

    /// Handler kind registered for `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<MethodKind> {
        self.methods.get(name).copied()
    }
}
