//! Event dispatch: resolving intents, running hooks, and keeping the
//! append-only event log that backs rollback, undo, and replay.

mod dispatcher;
mod errors;
pub mod events;
pub mod executor;
mod hooks;
pub mod scratch;

pub use self::dispatcher::{
    BatchReport, DispatchLimits, Dispatcher, Intent, Outcome, report_value,
};
pub use self::errors::{BatchError, DispatchError};
pub use self::events::{BatchId, BatchState, Event, EventKind, EventLog, Sequence};
pub use self::executor::{
    Command, CommandError, CommandExecutor, EffectDescriptor, Selector, StateSnapshot,
};
pub use self::hooks::{Hook, HookPoint, HookRegistry, HookTarget};
pub use self::scratch::ScratchExecutor;

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
