//! Boundary between the dispatcher and whatever owns editor state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use kisa_protocol::methods::{CommandSpec, DrawParams};

/// A request to mutate editor state.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Command {
    /// Command name.
    pub name: String,
    /// Positional arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Value>,
}

impl Command {
    /// Builds a command without arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
        }
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn with_argument(mut self, argument: impl Into<Value>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    /// String argument at `index`.
    #[must_use]
    pub fn str_argument(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).and_then(Value::as_str)
    }
}

impl From<CommandSpec> for Command {
    fn from(spec: CommandSpec) -> Self {
        Self {
            name: spec.name,
            arguments: spec.arguments,
        }
    }
}

/// What applying a command did, and how to take it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectDescriptor {
    /// Command that reverses the effect; `None` when nothing changed.
    pub inverse: Option<Command>,
}

impl EffectDescriptor {
    /// An effect reversed by `inverse`.
    #[must_use]
    pub fn reversible(inverse: Command) -> Self {
        Self {
            inverse: Some(inverse),
        }
    }

    /// An effect that changed nothing.
    #[must_use]
    pub const fn unchanged() -> Self {
        Self { inverse: None }
    }
}

/// Which part of the state a query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// The active mode name, as a JSON string.
    Mode,
    /// Render data, as a serialised [`DrawParams`].
    Draw,
    /// Everything needed to restore the state later.
    All,
}

/// Read-only copy of (part of) the executor's state.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct StateSnapshot(pub Value);

impl StateSnapshot {
    /// The snapshot as a mode name, for [`Selector::Mode`] queries.
    #[must_use]
    pub fn as_mode(&self) -> Option<&str> {
        self.0.as_str()
    }

    /// The snapshot as render data, for [`Selector::Draw`] queries.
    #[must_use]
    pub fn to_draw(&self) -> Option<DrawParams> {
        serde_json::from_value(self.0.clone()).ok()
    }
}

/// Failures reported by an executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The executor does not know the command.
    #[error("unknown command '{name}'")]
    Unknown {
        /// Command name.
        name: String,
    },
    /// The arguments did not fit the command.
    #[error("invalid arguments for '{name}': {message}")]
    InvalidArguments {
        /// Command name.
        name: String,
        /// What was wrong.
        message: String,
    },
    /// The command cannot apply to the current state.
    #[error("'{name}' rejected: {message}")]
    Rejected {
        /// Command name.
        name: String,
        /// Why the state refused it.
        message: String,
    },
    /// The executor cannot restore snapshots.
    #[error("state restore is not supported")]
    RestoreUnsupported,
}

impl CommandError {
    /// The arguments of `name` were unusable.
    #[must_use]
    pub fn invalid_arguments(name: &str, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            name: name.to_owned(),
            message: message.into(),
        }
    }

    /// The current state refused `name`.
    #[must_use]
    pub fn rejected(name: &str, message: impl Into<String>) -> Self {
        Self::Rejected {
            name: name.to_owned(),
            message: message.into(),
        }
    }
}

/// Applies commands to editor state and answers queries about it.
///
/// The dispatcher is the only caller. Executors never see the event log.
pub trait CommandExecutor {
    /// Applies `command`, describing how to reverse it.
    fn apply(&mut self, command: &Command) -> Result<EffectDescriptor, CommandError>;

    /// Reads the part of the state named by `selector`.
    fn query(&self, selector: Selector) -> StateSnapshot;

    /// Replaces the state with one captured by `query(Selector::All)`.
    fn restore(&mut self, snapshot: &StateSnapshot) -> Result<(), CommandError> {
        let _ = snapshot;
        Err(CommandError::RestoreUnsupported)
    }
}
