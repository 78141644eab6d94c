//! Conduit CLI Configuration
//!
//! Loaded from an optional TOML file; any missing section or field falls back
//! to its default. Command-line flags are applied on top.

use std::path::Path;

use conduit_dispatch::DispatcherConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Dispatcher under test
    pub dispatcher: DispatcherConfig,
    /// Simulated workload
    pub scenario: ScenarioConfig,
}

/// Shape of the simulated delivery workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Concurrent producers submitting deliveries
    pub producers: usize,
    /// Deliveries submitted by each producer
    pub deliveries_per_producer: usize,
    /// Simulated processing time of a delivery callback (milliseconds)
    pub delivery_delay_ms: u64,
    /// Purge the queue once this many deliveries have been submitted
    pub disconnect_after: Option<usize>,
    /// The Nth submitted delivery (1-based) fails
    pub fail_at: Option<usize>,
    /// Upper bound on the drain after shutdown (seconds)
    pub shutdown_timeout_secs: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            producers: 4,
            deliveries_per_producer: 25,
            delivery_delay_ms: 1,
            disconnect_after: None,
            fail_at: None,
            shutdown_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CliError::Config(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply command-line overrides
    pub fn with_overrides(
        mut self,
        producers: Option<usize>,
        deliveries: Option<usize>,
        disconnect_after: Option<usize>,
        fail_at: Option<usize>,
    ) -> Result<Self> {
        if let Some(producers) = producers {
            self.scenario.producers = producers;
        }
        if let Some(deliveries) = deliveries {
            self.scenario.deliveries_per_producer = deliveries;
        }
        if disconnect_after.is_some() {
            self.scenario.disconnect_after = disconnect_after;
        }
        if fail_at.is_some() {
            self.scenario.fail_at = fail_at;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.dispatcher.validate()?;
        if self.scenario.producers == 0 {
            return Err(CliError::Config(
                "at least one producer is required".to_string(),
            ));
        }
        if self.scenario.fail_at == Some(0) {
            return Err(CliError::Config(
                "fail_at counts from 1".to_string(),
            ));
        }
        if self.scenario.shutdown_timeout_secs == 0 {
            return Err(CliError::Config(
                "shutdown_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
