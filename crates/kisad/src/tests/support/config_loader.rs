//! Configuration loaders for bootstrap scenarios.

use std::ffi::OsString;
use std::sync::{Arc, Mutex};

use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use kisa_config::{Config, SocketEndpoint};

use crate::bootstrap::ConfigLoader;

/// Loader that places the server socket under a temporary directory.
#[derive(Debug, Clone)]
pub struct TestConfigLoader {
    socket_dir: Arc<Mutex<TempDir>>,
    notification_limit: Option<usize>,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temporary directory for socket");
        Self {
            socket_dir: Arc::new(Mutex::new(dir)),
            notification_limit: None,
        }
    }

    /// Caps pushed notifications so draws go through the inquiry exchange.
    #[must_use]
    pub fn with_notification_limit(mut self, limit: usize) -> Self {
        self.notification_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> SocketEndpoint {
        let dir = self
            .socket_dir
            .lock()
            .expect("temporary directory mutex poisoned");
        let path = dir.path().join("kisad.sock");
        SocketEndpoint::unix(
            path.to_str()
                .expect("temporary socket path was not valid UTF-8"),
        )
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let defaults = Config::default();
        Ok(Config {
            socket: Some(self.endpoint()),
            notification_limit: self
                .notification_limit
                .unwrap_or(defaults.notification_limit),
            ..defaults
        })
    }
}

/// Loader that fails the way a bad `--socket` flag does.
#[derive(Debug, Clone, Copy)]
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("kisad"),
            OsString::from("--socket"),
            OsString::from("tcp://127.0.0.1:9000"),
        ];
        Config::load_from_iter(args)
    }
}
