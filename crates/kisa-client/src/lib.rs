//! Client library and command-line runtime for the kisa editor server.
//!
//! [`Client`] speaks the session protocol over a blocking socket and
//! services the server's inquiries between its own requests.
//! [`ClientSession`] holds the same protocol state without any IO so it can
//! be driven from an event loop. [`run`] backs the `kisa` binary, which
//! scripts a running server from the shell.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;

use kisa_config::Config;
use kisa_protocol::methods::{DrawParams, KeyPress};

mod cli;
mod client;
mod config;
mod errors;
mod session;
mod transport;

pub use cli::OutputFormat;
pub use client::Client;
pub use errors::ClientError;
pub use session::{ClientSession, Received, ServerEvent};

use cli::{Cli, CliCommand};
use config::{ConfigLoader, OrthoConfigLoader, split_arguments};

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

fn run_with_loader<I, W, E, L>(args: I, stdout: &mut W, stderr: &mut E, loader: &L) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let split = split_arguments(args.into_iter().collect());
    let cli = match Cli::try_parse_from(&split.command_arguments) {
        Ok(cli) => cli,
        Err(error) if !error.use_stderr() => {
            let _ = write!(stdout, "{error}");
            return ExitCode::SUCCESS;
        }
        Err(error) => {
            let _ = write!(stderr, "{}", ClientError::CliUsage(error));
            return ExitCode::FAILURE;
        }
    };
    let outcome = loader
        .load(&split.config_arguments)
        .and_then(|config| execute(&cli, &config, stdout));
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(stderr, "kisa: {error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<W: Write>(cli: &Cli, config: &Config, stdout: &mut W) -> Result<(), ClientError> {
    let mut client = Client::connect(&config.socket_endpoint(), config.max_frame_bytes)?;
    client.acquire_session()?;
    match &cli.command {
        CliCommand::Keys { keys } => {
            for key in keys {
                let press = key.parse::<KeyPress>().map_err(|message| ClientError::InvalidKey {
                    key: key.clone(),
                    message,
                })?;
                client.fire_key(press)?;
            }
            print_screen(&mut client, cli.output, stdout)?;
        }
        CliCommand::Event { name } => {
            client.fire_named(name)?;
            print_screen(&mut client, cli.output, stdout)?;
        }
        CliCommand::Undo => {
            client.undo()?;
            print_screen(&mut client, cli.output, stdout)?;
        }
        CliCommand::Redo => {
            client.redo()?;
            print_screen(&mut client, cli.output, stdout)?;
        }
        CliCommand::Events => {
            let events = client.events()?;
            match cli.output {
                OutputFormat::Json => print_json(stdout, &events)?,
                OutputFormat::Text => {
                    for event in &events {
                        let marker = if event.obsolete { " (obsolete)" } else { "" };
                        writeln!(
                            stdout,
                            "{:>4} batch {:<4} {} {}{marker}",
                            event.sequence, event.batch, event.kind, event.payload
                        )
                        .map_err(ClientError::Output)?;
                    }
                }
            }
        }
        CliCommand::Help { keys, mode } => {
            let text = client.keymap_help(mode.as_deref(), keys)?;
            let text = text.as_deref().unwrap_or("no documentation bound");
            writeln!(stdout, "{text}").map_err(ClientError::Output)?;
        }
    }
    client.close()
}

/// Prints the newest screen the server pushed, if the command changed it.
fn print_screen<W: Write>(
    client: &mut Client,
    format: OutputFormat,
    stdout: &mut W,
) -> Result<(), ClientError> {
    client.sync()?;
    let Some(draw) = client.latest_draw() else {
        return Ok(());
    };
    match format {
        OutputFormat::Json => print_json(stdout, &draw),
        OutputFormat::Text => render_text(stdout, &draw).map_err(ClientError::Output),
    }
}

/// Writes the plain text of each line of `draw`.
pub fn render_text<W: Write>(out: &mut W, draw: &DrawParams) -> std::io::Result<()> {
    for line in &draw.lines {
        for segment in &line.segments {
            out.write_all(segment.text.as_bytes())?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn print_json<W: Write, T: Serialize>(stdout: &mut W, value: &T) -> Result<(), ClientError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| {
        ClientError::UnexpectedPayload {
            method: "output".to_owned(),
            source,
        }
    })?;
    writeln!(stdout, "{text}").map_err(ClientError::Output)
}

#[cfg(test)]
mod tests;
