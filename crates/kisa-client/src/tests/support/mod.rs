//! Harness for client unit and behavioural tests.

mod fake_server;
mod peer;

use std::cell::RefCell;
use std::ffi::OsString;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use kisa_config::{Config, SocketEndpoint};

use crate::ClientError;
use crate::config::ConfigLoader;

pub(super) use fake_server::{DrawDelivery, FakeServer};
pub(super) use peer::{Peer, screen};

/// Loader that ignores the arguments and returns a fixed configuration.
pub(super) struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    pub(super) fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, ClientError> {
        Ok(self.config.clone())
    }
}

#[derive(Default)]
pub(super) struct TestWorld {
    config: Config,
    server: Option<FakeServer>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<ExitCode>,
    methods: Vec<String>,
}

impl TestWorld {
    pub(super) fn start_server(&mut self, lines: Vec<String>, delivery: DrawDelivery) -> Result<()> {
        let server = FakeServer::spawn(lines, delivery)?;
        self.config.socket = Some(server.endpoint().clone());
        self.server = Some(server);
        Ok(())
    }

    pub(super) fn point_at_missing_socket(&mut self) {
        self.config.socket = Some(SocketEndpoint::unix("/nonexistent/kisa/missing.sock"));
    }

    pub(super) fn run(&mut self, command: &str) -> Result<()> {
        self.stdout.clear();
        self.stderr.clear();
        let args = build_args(command);
        let loader = StaticConfigLoader::new(self.config.clone());
        let exit = crate::run_with_loader(args, &mut self.stdout, &mut self.stderr, &loader);
        self.exit_code = Some(exit);
        if let Some(server) = self.server.as_mut() {
            self.methods = server.finish()?;
        }
        Ok(())
    }

    pub(super) fn stdout_lines(&self) -> Result<Vec<String>> {
        let text = String::from_utf8(self.stdout.clone()).context("stdout utf8")?;
        Ok(text.lines().map(str::to_owned).collect())
    }

    pub(super) fn stderr_text(&self) -> Result<String> {
        String::from_utf8(self.stderr.clone()).context("stderr utf8")
    }

    pub(super) fn exit_code(&self) -> Result<ExitCode> {
        self.exit_code.ok_or_else(|| anyhow!("the CLI has not run"))
    }

    pub(super) fn methods(&self) -> &[String] {
        &self.methods
    }
}

pub(super) fn build_args(command: &str) -> Vec<OsString> {
    std::iter::once(OsString::from("kisa"))
        .chain(
            command
                .split_whitespace()
                .map(|token| OsString::from(token.trim_matches('"'))),
        )
        .collect()
}

pub(super) fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::default())
}
