//! Splits command-line arguments between the configuration loader and the
//! command parser.

use std::ffi::{OsStr, OsString};

use kisa_config::Config;
use ortho_config::OrthoConfig;

use crate::ClientError;

/// Flags the configuration loader understands.
///
/// Kept in step with the fields of [`kisa_config::Config`] that a client
/// needs to find and talk to a server.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--runtime-dir",
    "--server-id",
    "--socket",
    "--max-frame-bytes",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the leading configuration flags.
    ///
    /// Configuration flags must precede the subcommand; anything after it
    /// belongs to the command parser.
    fn load(&self, args: &[OsString]) -> Result<Config, ClientError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, ClientError> {
        Config::load_from_iter(args.iter().cloned()).map_err(ClientError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    let (flag, inline) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !inline,
        }
    } else {
        FlagAction::Stop
    }
}

/// Arguments for the loader and for the command parser.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_arguments: Vec<OsString>,
}

/// Peels leading configuration flags off `args`.
///
/// Both halves keep the program name so each parser sees a normal argv.
pub(crate) fn split_arguments(args: Vec<OsString>) -> ArgumentSplit {
    let mut args = args.into_iter().peekable();
    let Some(program) = args.next() else {
        return ArgumentSplit::default();
    };
    let mut config_arguments = vec![program.clone()];
    while let Some(argument) = args.peek() {
        match classify(argument) {
            FlagAction::Include { needs_value } => {
                config_arguments.extend(args.next());
                if needs_value {
                    config_arguments.extend(args.next());
                }
            }
            FlagAction::Stop => break,
        }
    }
    let mut command_arguments = vec![program];
    command_arguments.extend(args);
    ArgumentSplit {
        config_arguments,
        command_arguments,
    }
}
