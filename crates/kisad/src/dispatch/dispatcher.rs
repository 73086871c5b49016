//! Turns client intents into batches of applied commands.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde_json::{Value, json};
use tracing::{debug, warn};

use kisa_config::{Keymap, Resolution};
use kisa_protocol::methods::{DrawParams, EventEntry, KeyPress};

use super::errors::{BatchError, DispatchError};
use super::events::{BatchId, BatchKind, BatchState, EventKind, EventLog, Sequence};
use super::executor::{Command, CommandError, CommandExecutor, Selector};
use super::hooks::{HookPoint, HookRegistry};
use super::DISPATCH_TARGET;
use crate::session::SessionId;

/// Mode assumed when the executor does not report one.
const FALLBACK_MODE: &str = "normal";

/// Command names the dispatcher handles itself when bound on their own.
const UNDO_COMMAND: &str = "undo";
const REDO_COMMAND: &str = "redo";

/// Ceilings applied while building a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    /// Commands one batch may hold, hook output included.
    pub max_batch_events: usize,
}

impl DispatchLimits {
    /// Reads the limits out of `config`.
    #[must_use]
    pub fn from_config(config: &kisa_config::Config) -> Self {
        Self {
            max_batch_events: config.max_batch_events,
        }
    }
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self {
            max_batch_events: kisa_config::DEFAULT_MAX_BATCH_EVENTS,
        }
    }
}

/// Something a client asked the editor to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// A key press, resolved through the bindings of the current mode.
    Key(KeyPress),
    /// A named event, resolved through the event bindings.
    Named(String),
    /// Commands that need no resolution.
    Commands(Vec<Command>),
}

/// Events a batch appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// The batch.
    pub batch: BatchId,
    /// Its events, in order.
    pub events: Vec<Sequence>,
}

/// Result of a dispatched intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The key extended a bound prefix; nothing ran yet.
    Pending,
    /// A batch ran and committed.
    Applied(BatchReport),
}

impl Outcome {
    /// Response body for `fire_event`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Pending => json!({ "pending": true }),
            Self::Applied(report) => report_value(report),
        }
    }
}

/// Response body describing a batch.
#[must_use]
pub fn report_value(report: &BatchReport) -> Value {
    json!({ "batch": report.batch.get(), "events": report.events })
}

#[derive(Debug)]
enum Failure {
    Command { name: String, error: CommandError },
    TooLarge,
    Log(BatchError),
}

impl From<BatchError> for Failure {
    fn from(error: BatchError) -> Self {
        Self::Log(error)
    }
}

#[derive(Debug, Clone)]
struct Undone {
    batch: BatchId,
    commands: Vec<Command>,
}

/// Owns the event log and the executor, and runs every intent as a batch.
///
/// Each command is appended to the log before the executor sees it. When a
/// command fails, every applied effect of its batch is reversed in reverse
/// sequence order, the whole batch is marked obsolete, and a failure marker
/// is appended in a batch of its own. Queries never observe a partly applied
/// batch because nothing else runs until the dispatcher returns.
#[derive(Debug)]
pub struct Dispatcher<E> {
    executor: E,
    keymap: Keymap,
    hooks: HookRegistry,
    log: EventLog,
    limits: DispatchLimits,
    head: Option<BatchId>,
    redo: Vec<Undone>,
    pending_keys: BTreeMap<SessionId, Vec<String>>,
}

impl<E: CommandExecutor> Dispatcher<E> {
    /// Builds a dispatcher and records the executor's initial state as the
    /// first replay snapshot.
    #[must_use]
    pub fn new(executor: E, keymap: Keymap, limits: DispatchLimits) -> Self {
        let mut log = EventLog::new();
        log.record_snapshot(executor.query(Selector::All));
        Self {
            executor,
            keymap,
            hooks: HookRegistry::new(),
            log,
            limits,
            head: None,
            redo: Vec::new(),
            pending_keys: BTreeMap::new(),
        }
    }

    /// Hook registrations, for adding or removing hooks.
    pub const fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    /// The command executor.
    #[must_use]
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// The append-only event log.
    #[must_use]
    pub const fn log(&self) -> &EventLog {
        &self.log
    }

    /// Newest batch of the undo history.
    #[must_use]
    pub const fn head(&self) -> Option<BatchId> {
        self.head
    }

    /// Mode reported by the executor.
    #[must_use]
    pub fn mode(&self) -> String {
        self.executor
            .query(Selector::Mode)
            .as_mode()
            .unwrap_or(FALLBACK_MODE)
            .to_owned()
    }

    /// Current render data.
    #[must_use]
    pub fn render(&self) -> DrawParams {
        self.executor
            .query(Selector::Draw)
            .to_draw()
            .unwrap_or_default()
    }

    /// The whole log, obsolete events included.
    #[must_use]
    pub fn events(&self) -> Vec<EventEntry> {
        self.log.entries()
    }

    /// Help text for `keys`, looked up in `mode` or the current mode.
    #[must_use]
    pub fn documentation(&self, mode: Option<&str>, keys: &str) -> Option<String> {
        let mode = mode.map_or_else(|| self.mode(), ToOwned::to_owned);
        self.keymap
            .documentation(&mode, keys)
            .map(ToOwned::to_owned)
    }

    /// Resolves `intent` and applies the result as one batch.
    ///
    /// A lone `undo` or `redo` binding runs the history operation instead
    /// of reaching the executor.
    pub fn dispatch(
        &mut self,
        session: SessionId,
        intent: Intent,
    ) -> Result<Outcome, DispatchError> {
        let commands = match intent {
            Intent::Key(key) => match self.resolve_key(session, &key)? {
                Some(commands) => commands,
                None => return Ok(Outcome::Pending),
            },
            Intent::Named(name) => self.resolve_named(&name)?,
            Intent::Commands(commands) => commands,
        };
        if let [command] = commands.as_slice() {
            match command.name.as_str() {
                UNDO_COMMAND => return self.undo(session).map(Outcome::Applied),
                REDO_COMMAND => return self.redo(session).map(Outcome::Applied),
                _ => {}
            }
        }
        let report = self.apply_batch(session, commands, true)?;
        self.redo.clear();
        Ok(Outcome::Applied(report))
    }

    /// Reverses the head batch of the history.
    ///
    /// Its live events become obsolete and an `Undo` marker is appended.
    /// The head moves to the nearest ancestor still in effect.
    pub fn undo(&mut self, session: SessionId) -> Result<BatchReport, DispatchError> {
        let batch = self
            .head
            .ok_or(DispatchError::NothingTo { action: UNDO_COMMAND })?;
        let live = self.log.live_events(batch);
        let commands = live
            .iter()
            .filter_map(|sequence| self.command_at(*sequence))
            .collect();
        let reversed = self.reverse(&live);
        self.log.retire(batch, BatchState::Undone)?;
        let marker = self.append_marker(session, EventKind::Undo { batch })?;
        self.head = self.effective_ancestor(Some(batch));
        self.redo.push(Undone { batch, commands });
        if !reversed {
            self.replay()?;
        }
        debug!(
            target: DISPATCH_TARGET,
            session = %session,
            batch = %batch,
            "batch undone"
        );
        Ok(BatchReport {
            batch,
            events: vec![marker],
        })
    }

    /// Re-applies the most recently undone batch as a fresh batch.
    pub fn redo(&mut self, session: SessionId) -> Result<BatchReport, DispatchError> {
        let undone = self
            .redo
            .pop()
            .ok_or(DispatchError::NothingTo { action: REDO_COMMAND })?;
        debug!(
            target: DISPATCH_TARGET,
            session = %session,
            batch = %undone.batch,
            "redoing batch"
        );
        self.apply_batch(session, undone.commands, false)
    }

    /// Inserts `commands` as if they had run right after event `anchor`.
    ///
    /// Live commands after the anchor are reversed, the inserted commands
    /// run with hooks, and the reversed commands run again after them, all
    /// in one new batch. On success the original events after the anchor
    /// are obsolete and the new batch becomes the history head. On failure
    /// the state after the anchor is rebuilt and nothing stays live from
    /// the new batch. An anchor of `0` inserts before every event.
    pub fn insert_at(
        &mut self,
        session: SessionId,
        anchor: Sequence,
        commands: Vec<Command>,
    ) -> Result<BatchReport, DispatchError> {
        if anchor != 0 && !self.is_live_command(anchor) {
            return Err(DispatchError::UnknownAnchor { sequence: anchor });
        }
        let suffix = self.log.live_commands_after(anchor);
        let sequences: Vec<Sequence> = suffix.iter().map(|(sequence, _)| *sequence).collect();
        if !self.reverse(&sequences) {
            self.rebuild(Some(anchor))?;
        }

        let batch = self.log.open_batch(Some(session), BatchKind::Edit);
        let replayed: Vec<Command> = suffix.iter().map(|(_, command)| command.clone()).collect();
        let result = self
            .run_commands(batch, commands, true)
            .and_then(|()| self.run_commands(batch, replayed, false));
        if let Err(failure) = result {
            let reversed = self.reverse(&self.log.live_events(batch));
            let restored = reversed && self.reapply(&suffix);
            if !restored {
                self.rebuild(None)?;
            }
            return Err(self.fail_batch(session, batch, failure));
        }

        let mut touched = BTreeSet::new();
        for sequence in sequences {
            self.log.mark_obsolete(sequence);
            if let Some(event) = self.log.get(sequence) {
                touched.insert(event.batch);
            }
        }
        for superseded in touched {
            if self.log.live_events(superseded).is_empty() {
                self.log.set_state(superseded, BatchState::Superseded)?;
            }
        }
        let report = self.commit(batch)?;
        self.redo.clear();
        debug!(
            target: DISPATCH_TARGET,
            session = %session,
            batch = %batch,
            anchor,
            "commands inserted"
        );
        Ok(report)
    }

    /// Records the executor's full state at the current sequence.
    pub fn snapshot(&mut self) -> Sequence {
        let state = self.executor.query(Selector::All);
        self.log.record_snapshot(state)
    }

    /// Restores the latest snapshot and folds every live command after it.
    pub fn replay(&mut self) -> Result<(), DispatchError> {
        self.rebuild(None)
    }

    /// Drops buffered keys for a departed session and rolls back any batch
    /// it left open.
    pub fn session_closed(&mut self, session: SessionId) {
        self.pending_keys.remove(&session);
        for batch in self.log.open_batches(Some(session)) {
            let reversed = self.reverse(&self.log.live_events(batch));
            if let Err(error) = self.log.retire(batch, BatchState::RolledBack) {
                warn!(target: DISPATCH_TARGET, batch = %batch, error = %error, "retire failed");
            }
            if !reversed && let Err(error) = self.replay() {
                warn!(target: DISPATCH_TARGET, error = %error, "replay after teardown failed");
            }
        }
    }

    fn resolve_key(
        &mut self,
        session: SessionId,
        key: &KeyPress,
    ) -> Result<Option<Vec<Command>>, DispatchError> {
        let mode = self.mode();
        let buffer = self.pending_keys.entry(session).or_default();
        buffer.push(key.name());
        match self.keymap.resolve(&mode, buffer) {
            Resolution::Bound(templates) => {
                let commands = templates
                    .iter()
                    .map(|template| Command {
                        name: template.name.clone(),
                        arguments: template
                            .instantiate_arguments(key.text())
                            .into_iter()
                            .map(Value::String)
                            .collect(),
                    })
                    .collect();
                buffer.clear();
                Ok(Some(commands))
            }
            Resolution::Prefix => Ok(None),
            Resolution::Unbound => {
                let input = buffer.join(" ");
                buffer.clear();
                Err(DispatchError::Unbound { mode, input })
            }
        }
    }

    fn resolve_named(&self, name: &str) -> Result<Vec<Command>, DispatchError> {
        let templates = self
            .keymap
            .resolve_event(name)
            .ok_or_else(|| DispatchError::Unbound {
                mode: self.mode(),
                input: name.to_owned(),
            })?;
        Ok(templates
            .iter()
            .map(|template| Command {
                name: template.name.clone(),
                arguments: template
                    .instantiate_arguments(None)
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            })
            .collect())
    }

    fn apply_batch(
        &mut self,
        session: SessionId,
        commands: Vec<Command>,
        with_hooks: bool,
    ) -> Result<BatchReport, DispatchError> {
        let batch = self.log.open_batch(Some(session), BatchKind::Edit);
        match self.run_commands(batch, commands, with_hooks) {
            Ok(()) => {
                let report = self.commit(batch)?;
                debug!(
                    target: DISPATCH_TARGET,
                    session = %session,
                    batch = %batch,
                    events = report.events.len(),
                    "batch committed"
                );
                Ok(report)
            }
            Err(failure) => {
                if !self.reverse(&self.log.live_events(batch)) {
                    self.rebuild(None)?;
                }
                Err(self.fail_batch(session, batch, failure))
            }
        }
    }

    /// Appends and applies `commands` in order. Before-hook output runs
    /// ahead of its command and after-hook output right after it.
    fn run_commands(
        &mut self,
        batch: BatchId,
        commands: Vec<Command>,
        with_hooks: bool,
    ) -> Result<(), Failure> {
        let limit = self.limits.max_batch_events;
        let mut produced = self
            .log
            .batch(batch)
            .map_or(0, |record| record.sequences().count())
            + commands.len();
        let mut queue: VecDeque<(Command, bool)> =
            commands.into_iter().map(|command| (command, false)).collect();
        while let Some((command, prepared)) = queue.pop_front() {
            if produced > limit {
                return Err(Failure::TooLarge);
            }
            if with_hooks && !prepared {
                let before = self.hooks.run(HookPoint::Before, &command);
                if !before.is_empty() {
                    produced += before.len();
                    queue.push_front((command, true));
                    for hooked in before.into_iter().rev() {
                        queue.push_front((hooked, false));
                    }
                    continue;
                }
            }
            let sequence = self.log.append(batch, EventKind::Command(command.clone()))?;
            let effect = self
                .executor
                .apply(&command)
                .map_err(|error| Failure::Command {
                    name: command.name.clone(),
                    error,
                })?;
            self.log.record_effect(sequence, effect);
            if with_hooks {
                let after = self.hooks.run(HookPoint::After, &command);
                produced += after.len();
                for hooked in after.into_iter().rev() {
                    queue.push_front((hooked, false));
                }
            }
        }
        Ok(())
    }

    /// Applies recorded inverses of `sequences` newest first. Returns false
    /// when an inverse failed and the state must be rebuilt.
    fn reverse(&mut self, sequences: &[Sequence]) -> bool {
        for sequence in sequences.iter().rev() {
            let Some(inverse) = self
                .log
                .effect(*sequence)
                .and_then(|effect| effect.inverse.clone())
            else {
                continue;
            };
            if let Err(error) = self.executor.apply(&inverse) {
                warn!(
                    target: DISPATCH_TARGET,
                    sequence,
                    error = %error,
                    "inverse failed"
                );
                return false;
            }
        }
        true
    }

    /// Applies `commands` again, refreshing the effects recorded for them.
    fn reapply(&mut self, commands: &[(Sequence, Command)]) -> bool {
        for (sequence, command) in commands {
            match self.executor.apply(command) {
                Ok(effect) => self.log.record_effect(*sequence, effect),
                Err(error) => {
                    warn!(
                        target: DISPATCH_TARGET,
                        sequence,
                        error = %error,
                        "re-applying command failed"
                    );
                    return false;
                }
            }
        }
        true
    }

    /// Restores the nearest snapshot at or before `upto` and folds live
    /// commands up to it.
    fn rebuild(&mut self, upto: Option<Sequence>) -> Result<(), DispatchError> {
        let Some((snapshot, commands)) = self.log.replay_plan(upto) else {
            return Err(DispatchError::Replay(CommandError::RestoreUnsupported));
        };
        let snapshot = snapshot.clone();
        self.executor
            .restore(&snapshot)
            .map_err(DispatchError::Replay)?;
        for (sequence, command) in commands {
            let effect = self
                .executor
                .apply(&command)
                .map_err(DispatchError::Replay)?;
            self.log.record_effect(sequence, effect);
        }
        debug!(target: DISPATCH_TARGET, upto, "state rebuilt from snapshot");
        Ok(())
    }

    /// Retires a failed batch and appends its failure marker.
    fn fail_batch(
        &mut self,
        session: SessionId,
        batch: BatchId,
        failure: Failure,
    ) -> DispatchError {
        if let Err(error) = self.log.retire(batch, BatchState::RolledBack) {
            return error.into();
        }
        let (command, message, error) = match failure {
            Failure::Command { name, error } => (
                name,
                error.to_string(),
                DispatchError::BatchFailed {
                    batch,
                    source: error,
                },
            ),
            Failure::TooLarge => {
                let error = DispatchError::BatchTooLarge {
                    batch,
                    limit: self.limits.max_batch_events,
                };
                (String::new(), error.to_string(), error)
            }
            Failure::Log(source) => (String::new(), source.to_string(), source.into()),
        };
        warn!(
            target: DISPATCH_TARGET,
            session = %session,
            batch = %batch,
            error = %error,
            "batch rolled back"
        );
        let marker = EventKind::Failure {
            batch,
            command,
            message,
        };
        if let Err(marker_error) = self.append_marker(session, marker) {
            warn!(
                target: DISPATCH_TARGET,
                error = %marker_error,
                "failure marker not recorded"
            );
        }
        error
    }

    fn commit(&mut self, batch: BatchId) -> Result<BatchReport, DispatchError> {
        let parent = self.effective_ancestor(self.head);
        self.log.commit(batch, parent)?;
        self.head = Some(batch);
        let events = self
            .log
            .batch(batch)
            .map(|record| record.sequences().collect())
            .unwrap_or_default();
        Ok(BatchReport { batch, events })
    }

    fn append_marker(
        &mut self,
        session: SessionId,
        kind: EventKind,
    ) -> Result<Sequence, DispatchError> {
        let marker = self.log.open_batch(Some(session), BatchKind::Marker);
        let sequence = self.log.append(marker, kind)?;
        self.log.commit(marker, None)?;
        Ok(sequence)
    }

    /// Walks from `start` towards the root until a batch is still in effect.
    fn effective_ancestor(&self, start: Option<BatchId>) -> Option<BatchId> {
        let mut current = start;
        while let Some(batch) = current {
            let record = self.log.batch(batch)?;
            if record.state == BatchState::Committed && record.kind == BatchKind::Edit {
                return Some(batch);
            }
            current = record.parent;
        }
        None
    }

    fn is_live_command(&self, sequence: Sequence) -> bool {
        !self.log.is_obsolete(sequence)
            && self.command_at(sequence).is_some()
            && self
                .log
                .get(sequence)
                .and_then(|event| self.log.batch(event.batch))
                .is_some_and(|record| record.state == BatchState::Committed)
    }

    fn command_at(&self, sequence: Sequence) -> Option<Command> {
        match &self.log.get(sequence)?.kind {
            EventKind::Command(command) => Some(command.clone()),
            EventKind::Undo { .. } | EventKind::Failure { .. } => None,
        }
    }
}
