//! In-memory executor holding a single text buffer.
//!
//! Enough editor to run the dispatch pipeline end to end: one buffer, one
//! cursor, a mode name. Every effect reports its inverse so batches can be
//! rolled back and undone.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use kisa_protocol::methods::{CursorShape, CursorStyle, DrawParams, Line, Segment, Style};

use super::executor::{
    Command, CommandError, CommandExecutor, EffectDescriptor, Selector, StateSnapshot,
};

/// Mode the scratch buffer starts in.
pub const INITIAL_MODE: &str = "normal";

/// Text, cursor and mode of the scratch buffer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScratchState {
    /// Buffer contents.
    pub text: String,
    /// Cursor position in characters from the start of the buffer.
    pub cursor: usize,
    /// Active mode.
    pub mode: String,
}

impl Default for ScratchState {
    fn default() -> Self {
        Self {
            text: String::new(),
            cursor: 0,
            mode: INITIAL_MODE.to_owned(),
        }
    }
}

/// Executor over a [`ScratchState`].
#[derive(Debug, Clone, Default)]
pub struct ScratchExecutor {
    state: ScratchState,
}

impl ScratchExecutor {
    /// An empty buffer in normal mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from `text` with the cursor at its end.
    #[must_use]
    pub fn with_text(text: &str) -> Self {
        Self {
            state: ScratchState {
                text: text.to_owned(),
                cursor: text.chars().count(),
                mode: INITIAL_MODE.to_owned(),
            },
        }
    }

    /// Current buffer state.
    #[must_use]
    pub const fn state(&self) -> &ScratchState {
        &self.state
    }

    fn char_len(&self) -> usize {
        self.state.text.chars().count()
    }

    fn byte_offset(&self, position: usize) -> usize {
        self.state
            .text
            .char_indices()
            .nth(position)
            .map_or(self.state.text.len(), |(offset, _)| offset)
    }

    fn insert(&mut self, text: &str, advance: bool) -> EffectDescriptor {
        let count = text.chars().count();
        if count == 0 {
            return EffectDescriptor::unchanged();
        }
        let offset = self.byte_offset(self.state.cursor);
        self.state.text.insert_str(offset, text);
        if advance {
            self.state.cursor += count;
            EffectDescriptor::reversible(Command::new("delete_backward").with_argument(count))
        } else {
            EffectDescriptor::reversible(Command::new("delete_forward").with_argument(count))
        }
    }

    fn delete(&mut self, count: usize, backward: bool) -> EffectDescriptor {
        let (start, end) = if backward {
            (self.state.cursor.saturating_sub(count), self.state.cursor)
        } else {
            (
                self.state.cursor,
                self.state.cursor.saturating_add(count).min(self.char_len()),
            )
        };
        if start == end {
            return EffectDescriptor::unchanged();
        }
        let range = self.byte_offset(start)..self.byte_offset(end);
        let removed: String = self.state.text.drain(range).collect();
        self.state.cursor = start;
        let inverse = if backward { "insert_text" } else { "insert_after" };
        EffectDescriptor::reversible(Command::new(inverse).with_argument(removed))
    }

    fn move_to(&mut self, position: usize) -> EffectDescriptor {
        let position = position.min(self.char_len());
        if position == self.state.cursor {
            return EffectDescriptor::unchanged();
        }
        let previous = std::mem::replace(&mut self.state.cursor, position);
        EffectDescriptor::reversible(Command::new("cursor_to").with_argument(previous))
    }

    fn line_bounds(&self) -> (usize, usize) {
        let before = self.state.text.chars().take(self.state.cursor);
        let line_start = before
            .enumerate()
            .filter(|(_, ch)| *ch == '\n')
            .last()
            .map_or(0, |(index, _)| index + 1);
        let line_end = self
            .state
            .text
            .chars()
            .enumerate()
            .skip(self.state.cursor)
            .find(|(_, ch)| *ch == '\n')
            .map_or_else(|| self.char_len(), |(index, _)| index);
        (line_start, line_end)
    }

    fn render(&self) -> DrawParams {
        let lines = self
            .state
            .text
            .split('\n')
            .map(|line| Line {
                segments: vec![Segment {
                    text: line.to_owned(),
                    style: Style::default(),
                }],
            })
            .collect();
        let (line_start, _) = self.line_bounds();
        let line = self
            .state
            .text
            .chars()
            .take(self.state.cursor)
            .filter(|ch| *ch == '\n')
            .count();
        let shape = if self.state.mode == "insert" {
            CursorShape::Bar
        } else {
            CursorShape::Block
        };
        DrawParams {
            lines,
            cursor: CursorStyle {
                line,
                column: self.state.cursor - line_start,
                shape,
                style: Style::default(),
            },
        }
    }
}

impl CommandExecutor for ScratchExecutor {
    fn apply(&mut self, command: &Command) -> Result<EffectDescriptor, CommandError> {
        let name = command.name.as_str();
        match name {
            "insert_text" => Ok(self.insert(text_argument(command)?, true)),
            "insert_after" => Ok(self.insert(text_argument(command)?, false)),
            "delete_backward" => Ok(self.delete(count_argument(command)?, true)),
            "delete_forward" => Ok(self.delete(count_argument(command)?, false)),
            "cursor_left" => {
                let target = self.state.cursor.saturating_sub(count_argument(command)?);
                Ok(self.move_to(target))
            }
            "cursor_right" => {
                let target = self.state.cursor.saturating_add(count_argument(command)?);
                Ok(self.move_to(target))
            }
            "cursor_start" => {
                let (start, _) = self.line_bounds();
                Ok(self.move_to(start))
            }
            "cursor_end" => {
                let (_, end) = self.line_bounds();
                Ok(self.move_to(end))
            }
            "cursor_to" => {
                let position = command
                    .arguments
                    .first()
                    .and_then(Value::as_u64)
                    .and_then(|raw| usize::try_from(raw).ok())
                    .ok_or_else(|| CommandError::invalid_arguments(name, "expected a position"))?;
                Ok(self.move_to(position))
            }
            "switch_mode" => {
                let mode = text_argument(command)?;
                if mode.is_empty() {
                    return Err(CommandError::invalid_arguments(name, "mode name is empty"));
                }
                if mode == self.state.mode {
                    return Ok(EffectDescriptor::unchanged());
                }
                let previous = std::mem::replace(&mut self.state.mode, mode.to_owned());
                Ok(EffectDescriptor::reversible(
                    Command::new("switch_mode").with_argument(previous),
                ))
            }
            _ => Err(CommandError::Unknown {
                name: name.to_owned(),
            }),
        }
    }

    fn query(&self, selector: Selector) -> StateSnapshot {
        let value = match selector {
            Selector::Mode => Value::String(self.state.mode.clone()),
            Selector::Draw => serde_json::to_value(self.render()).unwrap_or(Value::Null),
            Selector::All => serde_json::to_value(&self.state).unwrap_or(Value::Null),
        };
        StateSnapshot(value)
    }

    fn restore(&mut self, snapshot: &StateSnapshot) -> Result<(), CommandError> {
        let state: ScratchState = serde_json::from_value(snapshot.0.clone())
            .map_err(|error| CommandError::invalid_arguments("restore", error.to_string()))?;
        self.state = state;
        Ok(())
    }
}

fn text_argument(command: &Command) -> Result<&str, CommandError> {
    command
        .str_argument(0)
        .ok_or_else(|| CommandError::invalid_arguments(&command.name, "expected a string"))
}

fn count_argument(command: &Command) -> Result<usize, CommandError> {
    match command.arguments.first() {
        None => Ok(1),
        Some(value) => value
            .as_u64()
            .and_then(|raw| usize::try_from(raw).ok())
            .ok_or_else(|| CommandError::invalid_arguments(&command.name, "expected a count")),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn apply(executor: &mut ScratchExecutor, command: Command) -> EffectDescriptor {
        executor.apply(&command).expect("command applies")
    }

    #[rstest]
    #[case::insert(Command::new("insert_text").with_argument("xy"))]
    #[case::insert_after(Command::new("insert_after").with_argument("xy"))]
    #[case::backspace(Command::new("delete_backward").with_argument(2))]
    #[case::delete(Command::new("delete_forward"))]
    #[case::left(Command::new("cursor_left"))]
    #[case::start(Command::new("cursor_start"))]
    #[case::mode(Command::new("switch_mode").with_argument("insert"))]
    fn inverse_restores_the_previous_state(#[case] command: Command) {
        let mut executor = ScratchExecutor::with_text("hello\nwörld");
        apply(&mut executor, Command::new("cursor_to").with_argument(8));
        let before = executor.state().clone();

        let effect = apply(&mut executor, command);
        assert_ne!(executor.state(), &before);
        let inverse = effect.inverse.expect("state changed");
        apply(&mut executor, inverse);
        assert_eq!(executor.state(), &before);
    }

    #[rstest]
    fn no_op_commands_report_no_inverse() {
        let mut executor = ScratchExecutor::new();
        assert_eq!(
            apply(&mut executor, Command::new("delete_backward")),
            EffectDescriptor::unchanged()
        );
        assert_eq!(
            apply(&mut executor, Command::new("switch_mode").with_argument("normal")),
            EffectDescriptor::unchanged()
        );
    }

    #[rstest]
    fn unknown_commands_are_rejected() {
        let mut executor = ScratchExecutor::new();
        assert_eq!(
            executor.apply(&Command::new("explode")),
            Err(CommandError::Unknown {
                name: "explode".to_owned()
            })
        );
    }

    #[rstest]
    fn renders_lines_and_cursor() {
        let mut executor = ScratchExecutor::with_text("ab\ncd");
        apply(&mut executor, Command::new("switch_mode").with_argument("insert"));
        let draw = executor
            .query(Selector::Draw)
            .to_draw()
            .expect("draw payload");
        let texts: Vec<&str> = draw
            .lines
            .iter()
            .flat_map(|line| line.segments.iter().map(|segment| segment.text.as_str()))
            .collect();
        assert_eq!(texts, ["ab", "cd"]);
        assert_eq!((draw.cursor.line, draw.cursor.column), (1, 2));
        assert_eq!(draw.cursor.shape, CursorShape::Bar);
    }

    #[rstest]
    fn restore_round_trips_full_snapshots() {
        let mut executor = ScratchExecutor::with_text("abc");
        let snapshot = executor.query(Selector::All);
        apply(&mut executor, Command::new("insert_text").with_argument("!"));
        executor.restore(&snapshot).expect("restore");
        assert_eq!(executor.state().text, "abc");
        assert_eq!(executor.query(Selector::Mode).as_mode(), Some(INITIAL_MODE));
    }
}
