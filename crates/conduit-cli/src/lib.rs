//! Conduit CLI library
//!
//! Drives a `conduit-dispatch` dispatcher with simulated producers, transport
//! disconnects and failing callbacks, and reports what was delivered.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod scenario;

pub use cli::{Cli, Commands};
pub use config::{AppConfig, ScenarioConfig};
pub use error::{CliError, Result};
pub use scenario::{ScenarioReport, ScenarioRunner};
