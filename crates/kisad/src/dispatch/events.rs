//! Append-only event log with batch and history indexes.
//!
//! Events live in an arena indexed by sequence number and are never edited
//! or removed. Superseding an event flips its bit in the obsolete set; the
//! replacement is appended. Batches index contiguous runs of the arena, and
//! committed edit batches link to the history head they were applied on,
//! which makes the undo history a DAG.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Value, json};

use kisa_protocol::methods::EventEntry;

use super::errors::BatchError;
use super::executor::{Command, EffectDescriptor, StateSnapshot};
use crate::session::SessionId;

/// Position of an event in the log; the first event is `1`.
pub type Sequence = u64;

/// Identifier of a batch; the first batch is `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(u64);

impl BatchId {
    /// The raw number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// What an event records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A command handed to the executor.
    Command(Command),
    /// Marker: the batch's effects were reversed by an undo.
    Undo {
        /// Undone batch.
        batch: BatchId,
    },
    /// Marker: a batch failed and was rolled back.
    Failure {
        /// Rolled-back batch.
        batch: BatchId,
        /// Command that failed.
        command: String,
        /// Executor message.
        message: String,
    },
}

impl EventKind {
    /// Tag used on the wire.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Command(_) => "command",
            Self::Undo { .. } => "undo",
            Self::Failure { .. } => "failure",
        }
    }

    /// Kind-specific payload used on the wire.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::Command(command) => serde_json::to_value(command).unwrap_or(Value::Null),
            Self::Undo { batch } => json!({ "batch": batch.get() }),
            Self::Failure {
                batch,
                command,
                message,
            } => json!({ "batch": batch.get(), "command": command, "message": message }),
        }
    }
}

/// An immutable log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Position in the log.
    pub sequence: Sequence,
    /// Owning batch.
    pub batch: BatchId,
    /// Record contents.
    pub kind: EventKind,
}

/// Whether a batch records edits or bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Commands resolved from one intent.
    Edit,
    /// Undo and failure markers. Never part of the history.
    Marker,
}

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Events are still being appended.
    Open,
    /// Fully applied.
    Committed,
    /// A command failed; every event is obsolete and its effects reversed.
    RolledBack,
    /// Reversed by an undo.
    Undone,
    /// Every event was replaced by a later insertion.
    Superseded,
}

/// Index entry for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    /// Batch id.
    pub id: BatchId,
    /// Session whose intent produced the batch, when any.
    pub session: Option<SessionId>,
    /// Edit or marker.
    pub kind: BatchKind,
    /// Current state.
    pub state: BatchState,
    /// First event, once one is appended.
    pub first: Option<Sequence>,
    /// Last event, once one is appended.
    pub last: Option<Sequence>,
    /// History head when the batch was committed.
    pub parent: Option<BatchId>,
    /// Batches committed on top of this one.
    pub children: Vec<BatchId>,
}

impl BatchRecord {
    /// Sequence numbers of the batch's events, in order.
    pub fn sequences(&self) -> impl DoubleEndedIterator<Item = Sequence> + use<> {
        self.first
            .zip(self.last)
            .into_iter()
            .flat_map(|(first, last)| first..=last)
    }
}

#[derive(Debug, Clone, Default)]
struct ObsoleteSet {
    words: Vec<u64>,
}

impl ObsoleteSet {
    fn locate(sequence: Sequence) -> Option<(usize, u64)> {
        let index = sequence.checked_sub(1)?;
        let word = usize::try_from(index >> 6).ok()?;
        Some((word, 1_u64 << (index & 63)))
    }

    fn insert(&mut self, sequence: Sequence) {
        let Some((word, mask)) = Self::locate(sequence) else {
            return;
        };
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        if let Some(bits) = self.words.get_mut(word) {
            *bits |= mask;
        }
    }

    fn contains(&self, sequence: Sequence) -> bool {
        Self::locate(sequence)
            .and_then(|(word, mask)| self.words.get(word).map(|bits| bits & mask != 0))
            .unwrap_or(false)
    }
}

/// The event arena, its obsolete set, and its indexes.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<Event>,
    obsolete: ObsoleteSet,
    batches: BTreeMap<BatchId, BatchRecord>,
    effects: BTreeMap<Sequence, EffectDescriptor>,
    snapshots: Vec<(Sequence, StateSnapshot)>,
    next_batch: u64,
}

impl EventLog {
    /// An empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events ever appended.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no event was ever appended.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sequence of the newest event, `0` when empty.
    #[must_use]
    pub fn last_sequence(&self) -> Sequence {
        self.events.last().map_or(0, |event| event.sequence)
    }

    /// Opens a new batch.
    pub fn open_batch(&mut self, session: Option<SessionId>, kind: BatchKind) -> BatchId {
        self.next_batch += 1;
        let id = BatchId(self.next_batch);
        self.batches.insert(
            id,
            BatchRecord {
                id,
                session,
                kind,
                state: BatchState::Open,
                first: None,
                last: None,
                parent: None,
                children: Vec::new(),
            },
        );
        id
    }

    /// Appends an event to an open batch.
    pub fn append(&mut self, batch: BatchId, kind: EventKind) -> Result<Sequence, BatchError> {
        let sequence = self.last_sequence() + 1;
        let record = self.open_record(batch)?;
        if record.last.is_some_and(|last| last + 1 != sequence) {
            return Err(BatchError::NotContiguous { batch });
        }
        record.first.get_or_insert(sequence);
        record.last = Some(sequence);
        self.events.push(Event {
            sequence,
            batch,
            kind,
        });
        Ok(sequence)
    }

    /// Closes an open batch. Edit batches link under `parent`.
    pub fn commit(&mut self, batch: BatchId, parent: Option<BatchId>) -> Result<(), BatchError> {
        let record = self.open_record(batch)?;
        record.state = BatchState::Committed;
        if record.kind == BatchKind::Edit {
            record.parent = parent;
            if let Some(parent) = parent.and_then(|parent| self.batches.get_mut(&parent)) {
                parent.children.push(batch);
            }
        }
        Ok(())
    }

    /// Marks every event of `batch` obsolete and moves it to `state`.
    pub fn retire(&mut self, batch: BatchId, state: BatchState) -> Result<(), BatchError> {
        let record = self
            .batches
            .get_mut(&batch)
            .ok_or(BatchError::Unknown { batch })?;
        record.state = state;
        let first = record.first;
        for sequence in record.sequences() {
            self.obsolete.insert(sequence);
        }
        if let Some(first) = first {
            self.discard_snapshots_from(first);
        }
        Ok(())
    }

    /// Moves `batch` to `state` without touching its events.
    pub fn set_state(&mut self, batch: BatchId, state: BatchState) -> Result<(), BatchError> {
        let record = self
            .batches
            .get_mut(&batch)
            .ok_or(BatchError::Unknown { batch })?;
        record.state = state;
        Ok(())
    }

    /// Flags `sequence` obsolete. Snapshots that include its effect are
    /// dropped so replay can never bring it back.
    pub fn mark_obsolete(&mut self, sequence: Sequence) {
        self.obsolete.insert(sequence);
        self.discard_snapshots_from(sequence);
    }

    /// Whether `sequence` was undone or rolled back.
    #[must_use]
    pub fn is_obsolete(&self, sequence: Sequence) -> bool {
        self.obsolete.contains(sequence)
    }

    /// Event at `sequence`.
    #[must_use]
    pub fn get(&self, sequence: Sequence) -> Option<&Event> {
        let index = usize::try_from(sequence.checked_sub(1)?).ok()?;
        self.events.get(index)
    }

    /// Every event in log order, obsolete ones included.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Record of `batch`, if it was issued.
    #[must_use]
    pub fn batch(&self, batch: BatchId) -> Option<&BatchRecord> {
        self.batches.get(&batch)
    }

    /// Batches still open, optionally restricted to one session.
    #[must_use]
    pub fn open_batches(&self, session: Option<SessionId>) -> Vec<BatchId> {
        self.batches
            .values()
            .filter(|record| record.state == BatchState::Open)
            .filter(|record| session.is_none() || record.session == session)
            .map(|record| record.id)
            .collect()
    }

    /// Events of `batch` not yet obsolete, in sequence order.
    #[must_use]
    pub fn live_events(&self, batch: BatchId) -> Vec<Sequence> {
        self.batches
            .get(&batch)
            .map(|record| {
                record
                    .sequences()
                    .filter(|sequence| !self.is_obsolete(*sequence))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live command events after `anchor` in committed batches.
    #[must_use]
    pub fn live_commands_after(&self, anchor: Sequence) -> Vec<(Sequence, Command)> {
        self.events
            .iter()
            .filter(|event| event.sequence > anchor && !self.is_obsolete(event.sequence))
            .filter(|event| {
                self.batches
                    .get(&event.batch)
                    .is_some_and(|record| record.state == BatchState::Committed)
            })
            .filter_map(|event| match &event.kind {
                EventKind::Command(command) => Some((event.sequence, command.clone())),
                EventKind::Undo { .. } | EventKind::Failure { .. } => None,
            })
            .collect()
    }

    /// Remembers how to reverse the command logged at `sequence`.
    pub fn record_effect(&mut self, sequence: Sequence, effect: EffectDescriptor) {
        self.effects.insert(sequence, effect);
    }

    /// Reversal recorded for `sequence`.
    #[must_use]
    pub fn effect(&self, sequence: Sequence) -> Option<&EffectDescriptor> {
        self.effects.get(&sequence)
    }

    /// Records `snapshot` as the state after the current last event.
    pub fn record_snapshot(&mut self, snapshot: StateSnapshot) -> Sequence {
        let sequence = self.last_sequence();
        self.snapshots.push((sequence, snapshot));
        sequence
    }


    /// Latest snapshot taken at or before `upto`, plus the live commands
    /// to fold over it to reach that point. `None` means the newest event.
    #[must_use]
    pub fn replay_plan(
        &self,
        upto: Option<Sequence>,
    ) -> Option<(&StateSnapshot, Vec<(Sequence, Command)>)> {
        let limit = upto.unwrap_or(Sequence::MAX);
        let (taken_at, snapshot) = self
            .snapshots
            .iter()
            .rev()
            .find(|(taken_at, _)| *taken_at <= limit)?;
        let commands = self
            .live_commands_after(*taken_at)
            .into_iter()
            .filter(|(sequence, _)| *sequence <= limit)
            .collect();
        Some((snapshot, commands))
    }

    /// Wire view of every event.
    #[must_use]
    pub fn entries(&self) -> Vec<EventEntry> {
        self.events
            .iter()
            .map(|event| EventEntry {
                sequence: event.sequence,
                batch: event.batch.get(),
                kind: event.kind.tag().to_owned(),
                payload: event.kind.payload(),
                obsolete: self.is_obsolete(event.sequence),
            })
            .collect()
    }

    /// Snapshots taken at or after `sequence` contain its effect.
    fn discard_snapshots_from(&mut self, sequence: Sequence) {
        self.snapshots.retain(|(taken_at, _)| *taken_at < sequence);
    }

    fn open_record(&mut self, batch: BatchId) -> Result<&mut BatchRecord, BatchError> {
        let record = self
            .batches
            .get_mut(&batch)
            .ok_or(BatchError::Unknown { batch })?;
        if record.state != BatchState::Open {
            return Err(BatchError::Closed { batch });
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn log() -> EventLog {
        EventLog::new()
    }

    fn command(name: &str) -> EventKind {
        EventKind::Command(Command::new(name))
    }

    #[rstest]
    fn sequences_increase_across_batches(mut log: EventLog) {
        let first = log.open_batch(None, BatchKind::Edit);
        assert_eq!(log.append(first, command("a")), Ok(1));
        assert_eq!(log.append(first, command("b")), Ok(2));
        log.commit(first, None).expect("commit");
        let second = log.open_batch(None, BatchKind::Edit);
        assert_eq!(log.append(second, command("c")), Ok(3));
        assert_eq!(
            log.batch(first).map(|record| record.sequences().collect::<Vec<_>>()),
            Some(vec![1, 2])
        );
    }

    #[rstest]
    fn closed_batches_reject_appends(mut log: EventLog) {
        let batch = log.open_batch(None, BatchKind::Edit);
        log.commit(batch, None).expect("commit");
        assert_eq!(
            log.append(batch, command("late")),
            Err(BatchError::Closed { batch })
        );
    }

    #[rstest]
    fn interleaved_batches_are_rejected(mut log: EventLog) {
        let first = log.open_batch(None, BatchKind::Edit);
        let second = log.open_batch(None, BatchKind::Edit);
        log.append(first, command("a")).expect("append");
        log.append(second, command("b")).expect("append");
        assert_eq!(
            log.append(first, command("c")),
            Err(BatchError::NotContiguous { batch: first })
        );
    }

    #[rstest]
    fn retiring_flags_every_event_without_removing_it(mut log: EventLog) {
        let batch = log.open_batch(None, BatchKind::Edit);
        log.append(batch, command("a")).expect("append");
        log.append(batch, command("b")).expect("append");
        let before: Vec<Event> = log.iter().cloned().collect();

        log.retire(batch, BatchState::RolledBack).expect("retire");

        assert_eq!(log.iter().cloned().collect::<Vec<_>>(), before);
        assert!(log.is_obsolete(1) && log.is_obsolete(2));
        assert!(log.live_events(batch).is_empty());
        assert_eq!(
            log.batch(batch).map(|record| record.state),
            Some(BatchState::RolledBack)
        );
    }

    #[rstest]
    fn obsolete_set_spans_words(mut log: EventLog) {
        log.mark_obsolete(64);
        log.mark_obsolete(65);
        log.mark_obsolete(200);
        assert!(log.is_obsolete(64) && log.is_obsolete(65) && log.is_obsolete(200));
        assert!(!log.is_obsolete(63) && !log.is_obsolete(66) && !log.is_obsolete(0));
    }

    #[rstest]
    fn commits_link_the_history_dag(mut log: EventLog) {
        let root = log.open_batch(None, BatchKind::Edit);
        log.commit(root, None).expect("commit");
        let left = log.open_batch(None, BatchKind::Edit);
        log.commit(left, Some(root)).expect("commit");
        let right = log.open_batch(None, BatchKind::Edit);
        log.commit(right, Some(root)).expect("commit");
        assert_eq!(
            log.batch(root).map(|record| record.children.clone()),
            Some(vec![left, right])
        );
        assert_eq!(log.batch(right).and_then(|record| record.parent), Some(root));
    }

    #[rstest]
    fn replay_plan_skips_obsolete_and_marker_events(mut log: EventLog) {
        log.record_snapshot(StateSnapshot(Value::Null));
        let kept = log.open_batch(None, BatchKind::Edit);
        log.append(kept, command("kept")).expect("append");
        log.commit(kept, None).expect("commit");
        let dropped = log.open_batch(None, BatchKind::Edit);
        log.append(dropped, command("dropped")).expect("append");
        log.commit(dropped, Some(kept)).expect("commit");
        log.retire(dropped, BatchState::Undone).expect("retire");
        let marker = log.open_batch(None, BatchKind::Marker);
        log.append(marker, EventKind::Undo { batch: dropped })
            .expect("append");
        log.commit(marker, None).expect("commit");

        let (_, commands) = log.replay_plan(None).expect("snapshot recorded");
        assert_eq!(commands, vec![(1, Command::new("kept"))]);
        assert_eq!(log.replay_plan(Some(0)).map(|(_, commands)| commands), Some(Vec::new()));
    }

    #[rstest]
    fn snapshots_holding_obsolete_effects_are_dropped(mut log: EventLog) {
        log.record_snapshot(StateSnapshot(Value::String("empty".to_owned())));
        let batch = log.open_batch(None, BatchKind::Edit);
        log.append(batch, command("a")).expect("append");
        log.commit(batch, None).expect("commit");
        log.record_snapshot(StateSnapshot(Value::String("after a".to_owned())));

        log.retire(batch, BatchState::Undone).expect("retire");

        let (snapshot, commands) = log.replay_plan(None).expect("initial snapshot kept");
        assert_eq!(snapshot, &StateSnapshot(Value::String("empty".to_owned())));
        assert!(commands.is_empty());
    }
}
