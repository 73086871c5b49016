//! Command-line interface definitions for `kisa`.

use clap::{Parser, Subcommand, ValueEnum};

/// How screen updates and results are printed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text, one rendered line per output line.
    #[default]
    Text,
    /// Raw JSON payloads from the server.
    Json,
}

/// Scripted client for a running kisa server.
#[derive(Parser, Debug)]
#[command(name = "kisa", disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Controls how server output is rendered.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub(crate) output: OutputFormat,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Sends key presses in order and prints the resulting screen.
    Keys {
        /// Key names such as `i`, `escape`, or `ctrl-r`.
        #[arg(required = true, value_name = "KEY")]
        keys: Vec<String>,
    },
    /// Fires a named event and prints the resulting screen.
    Event {
        /// Event name bound in the keymap.
        name: String,
    },
    /// Reverts the most recent edit batch.
    Undo,
    /// Re-applies the most recently reverted batch.
    Redo,
    /// Prints the event log.
    Events,
    /// Prints the documentation bound to a key sequence.
    Help {
        /// Space-separated key sequence.
        keys: String,
        /// Mode to search instead of the current one.
        #[arg(long)]
        mode: Option<String>,
    },
}
