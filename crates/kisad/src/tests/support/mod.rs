//! Test harness utilities for the server suites.

mod config_loader;
mod harness;
mod reporter;
mod world;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use harness::{ServerHarness, TestClient};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use world::{TestWorld, world};
