//! Entrypoint for the kisa editor server.
//!
//! The binary delegates to [`kisad::run_server`], which loads configuration,
//! binds the socket, and serves clients until a termination signal arrives.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match kisad::run_server() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let mut stderr = io::stderr().lock();
            let _ = writeln!(stderr, "kisad: {error}");
            ExitCode::FAILURE
        }
    }
}
