//! Method names and typed payloads for the editor protocol.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client request completing the identification handshake.
pub const ASK_ID: &str = "askId";
/// Server notification inviting the client to send [`ASK_ID`].
pub const SHOULD_ASK_ID: &str = "shouldAskId";
/// Client request fetching render data announced by [`SHOULD_ASK_DRAW`].
pub const ASK_DRAW: &str = "askDraw";
/// Server notification announcing render data too large to push.
pub const SHOULD_ASK_DRAW: &str = "shouldAskDraw";
/// Server notification pushing render data.
pub const DRAW: &str = "draw";
/// Client request carrying a key press or a named event.
pub const FIRE_EVENT: &str = "fire_event";
/// Server request probing client liveness.
pub const PING: &str = "ping";
/// Client request ending its session.
pub const CLOSE: &str = "close";
/// Client request reverting the most recent change.
pub const UNDO: &str = "undo";
/// Client request re-applying the most recently reverted change.
pub const REDO: &str = "redo";
/// Plugin request inserting commands at an earlier log position.
pub const INSERT_AT: &str = "insert_at";
/// Client request recording a replay snapshot.
pub const SNAPSHOT: &str = "snapshot";
/// Client request listing the event log.
pub const EVENTS: &str = "events";
/// Client request returning binding documentation.
pub const KEYMAP_HELP: &str = "keymap_help";
/// Server notification sent before the server exits.
pub const SHUTDOWN: &str = "shutdown";

/// Something the server wants from a client, obtained through the
/// notify, request, respond exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Inquiry {
    /// The client must acquire its session id.
    Id,
    /// The client should fetch pending render data.
    Draw,
}

impl Inquiry {
    /// Notification announcing the inquiry.
    #[must_use]
    pub const fn notification_method(self) -> &'static str {
        match self {
            Self::Id => SHOULD_ASK_ID,
            Self::Draw => SHOULD_ASK_DRAW,
        }
    }

    /// Request the client issues in reply.
    #[must_use]
    pub const fn request_method(self) -> &'static str {
        match self {
            Self::Id => ASK_ID,
            Self::Draw => ASK_DRAW,
        }
    }

    /// Parses an announcing notification name.
    #[must_use]
    pub fn from_notification(method: &str) -> Option<Self> {
        match method {
            SHOULD_ASK_ID => Some(Self::Id),
            SHOULD_ASK_DRAW => Some(Self::Draw),
            _ => None,
        }
    }

    /// Parses a replying request name.
    #[must_use]
    pub fn from_request(method: &str) -> Option<Self> {
        match method {
            ASK_ID => Some(Self::Id),
            ASK_DRAW => Some(Self::Draw),
            _ => None,
        }
    }
}

impl fmt::Display for Inquiry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.request_method())
    }
}

/// Visual attributes of a text run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Style {
    /// Foreground colour name or `#rrggbb`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreground: Option<String>,
    /// Background colour name or `#rrggbb`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    /// Attributes such as `bold` or `underline`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,
}

/// A run of text sharing one style.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Segment {
    /// Text of the run.
    pub text: String,
    /// Style applied to the run.
    #[serde(default)]
    pub style: Style,
}

/// One rendered line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Line {
    /// Styled runs, left to right.
    pub segments: Vec<Segment>,
}

/// Shape the client draws for the cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorShape {
    /// Full cell.
    #[default]
    Block,
    /// Thin vertical bar.
    Bar,
    /// Underline.
    Underline,
}

/// Cursor placement and styling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CursorStyle {
    /// Zero-based line.
    pub line: usize,
    /// Zero-based column, in characters.
    pub column: usize,
    /// Cursor shape.
    #[serde(default)]
    pub shape: CursorShape,
    /// Cursor colours.
    #[serde(default)]
    pub style: Style,
}

/// Payload of [`DRAW`] and of the [`ASK_DRAW`] response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DrawParams {
    /// Rendered lines, top to bottom.
    pub lines: Vec<Line>,
    /// Cursor styling.
    pub cursor: CursorStyle,
}

/// Keyboard modifier held during a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    /// Control.
    Ctrl,
    /// Alt or Meta.
    Alt,
    /// Shift, for keys whose code does not already encode it.
    Shift,
    /// Super or Command.
    Super,
}

impl Modifier {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Ctrl => "ctrl-",
            Self::Alt => "alt-",
            Self::Shift => "shift-",
            Self::Super => "super-",
        }
    }
}

/// A decoded key press.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct KeyPress {
    /// Key code: a single character or a name such as `escape`.
    pub code: String,
    /// Held modifiers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<Modifier>,
}

impl KeyPress {
    /// Builds an unmodified key press.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            modifiers: Vec::new(),
        }
    }

    /// Canonical binding name, modifiers first in a fixed order.
    ///
    /// Shift is dropped for single characters since the character already
    /// carries it, so Shift+`A` binds as `A`.
    #[must_use]
    pub fn name(&self) -> String {
        let mut modifiers = self.modifiers.clone();
        if self.is_character() {
            modifiers.retain(|modifier| *modifier != Modifier::Shift);
        }
        modifiers.sort_unstable();
        modifiers.dedup();
        let mut name: String = modifiers.into_iter().map(Modifier::prefix).collect();
        name.push_str(&self.code);
        name
    }

    /// Text the key would insert, when it is an unmodified character.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        let inserts = self
            .modifiers
            .iter()
            .all(|modifier| *modifier == Modifier::Shift);
        (inserts && self.is_character()).then_some(self.code.as_str())
    }

    fn is_character(&self) -> bool {
        let mut chars = self.code.chars();
        matches!((chars.next(), chars.next()), (Some(ch), None) if !ch.is_control())
    }
}

impl fmt::Display for KeyPress {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.name())
    }
}

impl FromStr for KeyPress {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut rest = input.trim();
        let mut modifiers = Vec::new();
        'strip: loop {
            for modifier in [Modifier::Ctrl, Modifier::Alt, Modifier::Shift, Modifier::Super] {
                if let Some(stripped) = rest.strip_prefix(modifier.prefix())
                    && !stripped.is_empty()
                {
                    modifiers.push(modifier);
                    rest = stripped;
                    continue 'strip;
                }
            }
            break;
        }
        if rest.is_empty() {
            return Err(format!("'{input}' does not name a key"));
        }
        Ok(Self {
            code: rest.to_owned(),
            modifiers,
        })
    }
}

/// Payload of [`FIRE_EVENT`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FireEventParams {
    /// A key press, resolved through the current mode's bindings.
    Key {
        /// The pressed key.
        key: KeyPress,
    },
    /// A named event, resolved through the event bindings.
    Named {
        /// Event name.
        name: String,
    },
}

/// A command addressed to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandSpec {
    /// Command name.
    pub name: String,
    /// Positional arguments.
    #[serde(default)]
    pub arguments: Vec<Value>,
}

/// Payload of [`INSERT_AT`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InsertAtParams {
    /// Sequence number of the event the commands logically follow.
    pub anchor: u64,
    /// Commands to insert, in order.
    pub commands: Vec<CommandSpec>,
}

/// Payload of [`KEYMAP_HELP`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeymapHelpParams {
    /// Mode to look the keys up in; the session's current mode when absent.
    #[serde(default)]
    pub mode: Option<String>,
    /// Space separated key sequence, or an event name.
    pub keys: String,
}

/// One entry of the [`EVENTS`] response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventEntry {
    /// Sequence number.
    pub sequence: u64,
    /// Batch the event belongs to.
    pub batch: u64,
    /// Event kind tag.
    pub kind: String,
    /// Event payload.
    pub payload: Value,
    /// Whether the event has been superseded.
    pub obsolete: bool,
}
