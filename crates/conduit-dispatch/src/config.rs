//! Dispatcher Configuration

use crate::errors::{DispatchError, DispatchResult};

/// Default worker label, used in every log line the dispatcher emits
pub const DEFAULT_DISPATCHER_NAME: &str = "conduit consumer dispatch worker";

// ----------------------------------------------------------------------------
// Dispatcher Configuration
// ----------------------------------------------------------------------------

/// Configuration for a single dispatcher instance
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Name of the worker, attached to log events and errors
    pub name: String,
    /// Emit a trace event when each action is queued, started and finished
    pub trace_actions: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_DISPATCHER_NAME.to_string(),
            trace_actions: false,
        }
    }
}

impl DispatcherConfig {
    /// Create a configuration with the given worker name
    pub fn named<T: Into<String>>(name: T) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Per-action tracing enabled, for debugging delivery ordering
    pub fn verbose() -> Self {
        Self {
            trace_actions: true,
            ..Self::default()
        }
    }

    /// Configuration used by tests
    pub fn testing() -> Self {
        Self {
            name: "test dispatcher".to_string(),
            trace_actions: true,
        }
    }

    pub fn with_trace_actions(mut self, enabled: bool) -> Self {
        self.trace_actions = enabled;
        self
    }

    /// Reject configurations the dispatcher cannot be started with
    pub fn validate(&self) -> DispatchResult<()> {
        if self.name.trim().is_empty() {
            return Err(DispatchError::invalid_argument(
                "dispatcher name must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DispatcherConfig::default();
        assert_eq!(config.name, DEFAULT_DISPATCHER_NAME);
        assert!(!config.trace_actions);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_name_rejected() {
        let config = DispatcherConfig::named("   ");
        assert_eq!(
            config.validate(),
            Err(DispatchError::invalid_argument(
                "dispatcher name must not be empty"
            ))
        );
    }

    #[test]
    fn test_presets() {
        assert!(DispatcherConfig::verbose().trace_actions);
        let testing = DispatcherConfig::testing().with_trace_actions(false);
        assert_eq!(testing.name, "test dispatcher");
        assert!(!testing.trace_actions);
    }
}
