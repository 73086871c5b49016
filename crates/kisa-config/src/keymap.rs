//! Key bindings that turn key sequences into ordered command templates.
//!
//! Bindings are grouped by editor mode. A sequence is written as space
//! separated key names (`ctrl-x s`, `g g`, `escape`). Named events fired by
//! clients resolve through a separate, mode-independent table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Placeholder replaced by the text of the triggering key.
pub const KEY_PLACEHOLDER: &str = "$key";

/// Command to run, with arguments that may reference the triggering key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandTemplate {
    /// Command name understood by the executor.
    pub name: String,
    /// Positional arguments; [`KEY_PLACEHOLDER`] is substituted on dispatch.
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl CommandTemplate {
    /// Builds a template without arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
        }
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    /// Arguments with the key placeholder replaced by `key`.
    ///
    /// Without a key the placeholder is left as an empty string.
    #[must_use]
    pub fn instantiate_arguments(&self, key: Option<&str>) -> Vec<String> {
        self.arguments
            .iter()
            .map(|argument| argument.replace(KEY_PLACEHOLDER, key.unwrap_or_default()))
            .collect()
    }
}

/// A bound sequence and its help text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Binding {
    /// Commands run, in order, when the sequence completes.
    pub commands: Vec<CommandTemplate>,
    /// Human-readable description shown by help queries.
    #[serde(default)]
    pub documentation: String,
}

/// Bindings active in one mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModeTable {
    /// Bindings keyed by normalised sequence.
    #[serde(default)]
    pub bindings: BTreeMap<String, Binding>,
    /// Commands applied to unbound single printable keys.
    #[serde(default)]
    pub printable: Option<Vec<CommandTemplate>>,
}

/// Outcome of resolving a key sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// The sequence is complete and maps to these commands.
    Bound(&'a [CommandTemplate]),
    /// The sequence is a proper prefix of at least one binding.
    Prefix,
    /// Nothing matches the sequence.
    Unbound,
}

/// Mode-scoped key bindings plus named-event bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Keymap {
    #[serde(default)]
    modes: BTreeMap<String, ModeTable>,
    #[serde(default)]
    events: BTreeMap<String, Binding>,
}

impl Keymap {
    /// Builds an empty keymap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bindings shipped with the server for the `normal` and `insert` modes.
    #[must_use]
    pub fn builtin() -> Self {
        let mut keymap = Self::new();
        let normal = [
            ("i", vec![switch_mode("insert")], "enter insert mode"),
            (
                "A",
                vec![CommandTemplate::new("cursor_end"), switch_mode("insert")],
                "append at the end of the line",
            ),
            ("h", vec![CommandTemplate::new("cursor_left")], "move left"),
            ("l", vec![CommandTemplate::new("cursor_right")], "move right"),
            ("0", vec![CommandTemplate::new("cursor_start")], "move to start"),
            ("$", vec![CommandTemplate::new("cursor_end")], "move to end"),
            ("g g", vec![CommandTemplate::new("cursor_start")], "go to start"),
            ("x", vec![CommandTemplate::new("delete_forward")], "delete character"),
            ("u", vec![CommandTemplate::new("undo")], "undo last change"),
            ("ctrl-r", vec![CommandTemplate::new("redo")], "redo last undone change"),
        ];
        for (keys, commands, documentation) in normal {
            keymap.bind("normal", keys, commands, documentation);
        }

        let insert = [
            ("escape", vec![switch_mode("normal")], "return to normal mode"),
            (
                "backspace",
                vec![CommandTemplate::new("delete_backward")],
                "delete previous character",
            ),
            ("enter", vec![insert_text("\n")], "insert a line break"),
        ];
        for (keys, commands, documentation) in insert {
            keymap.bind("insert", keys, commands, documentation);
        }
        keymap.bind_printable("insert", vec![insert_text(KEY_PLACEHOLDER)]);

        keymap.bind_event(
            "focus_lost",
            vec![switch_mode("normal")],
            "leave insert mode when the client loses focus",
        );
        keymap
    }

    /// Binds `keys` in `mode` to `commands`, replacing any previous binding.
    pub fn bind(
        &mut self,
        mode: &str,
        keys: &str,
        commands: Vec<CommandTemplate>,
        documentation: &str,
    ) {
        let table = self.modes.entry(mode.to_owned()).or_default();
        table.bindings.insert(
            normalise_sequence(keys),
            Binding {
                commands,
                documentation: documentation.to_owned(),
            },
        );
    }

    /// Sets the commands applied to unbound printable keys in `mode`.
    pub fn bind_printable(&mut self, mode: &str, commands: Vec<CommandTemplate>) {
        self.modes.entry(mode.to_owned()).or_default().printable = Some(commands);
    }

    /// Binds a named event to `commands`.
    pub fn bind_event(&mut self, name: &str, commands: Vec<CommandTemplate>, documentation: &str) {
        self.events.insert(
            name.to_owned(),
            Binding {
                commands,
                documentation: documentation.to_owned(),
            },
        );
    }

    /// Resolves a key sequence typed in `mode`.
    ///
    /// An exact binding wins over a longer binding sharing the prefix.
    /// Unbound single printable keys fall through to the mode's printable
    /// commands when the mode defines them.
    #[must_use]
    pub fn resolve(&self, mode: &str, keys: &[String]) -> Resolution<'_> {
        let Some(table) = self.modes.get(mode) else {
            return Resolution::Unbound;
        };
        if keys.is_empty() {
            return Resolution::Unbound;
        }
        let sequence = keys.join(" ");
        if let Some(binding) = table.bindings.get(&sequence) {
            return Resolution::Bound(&binding.commands);
        }
        let prefix = format!("{sequence} ");
        if table
            .bindings
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(candidate, _)| candidate.starts_with(&prefix))
        {
            return Resolution::Prefix;
        }
        match (&table.printable, keys) {
            (Some(commands), [key]) if is_printable(key) => Resolution::Bound(commands),
            _ => Resolution::Unbound,
        }
    }

    /// Commands bound to a named event.
    #[must_use]
    pub fn resolve_event(&self, name: &str) -> Option<&[CommandTemplate]> {
        self.events
            .get(name)
            .map(|binding| binding.commands.as_slice())
    }

    /// Help text for `keys` in `mode`, falling back to the event table.
    #[must_use]
    pub fn documentation(&self, mode: &str, keys: &str) -> Option<&str> {
        self.modes
            .get(mode)
            .and_then(|table| table.bindings.get(&normalise_sequence(keys)))
            .or_else(|| self.events.get(keys.trim()))
            .map(|binding| binding.documentation.as_str())
    }
}

/// Returns true for keys that stand for a single printable character.
#[must_use]
pub fn is_printable(key: &str) -> bool {
    let mut chars = key.chars();
    matches!((chars.next(), chars.next()), (Some(ch), None) if !ch.is_control())
}

fn normalise_sequence(keys: &str) -> String {
    keys.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn switch_mode(mode: &str) -> CommandTemplate {
    CommandTemplate::new("switch_mode").with_argument(mode)
}

fn insert_text(text: &str) -> CommandTemplate {
    CommandTemplate::new("insert_text").with_argument(text)
}
