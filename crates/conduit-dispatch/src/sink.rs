//! Failure sinks
//!
//! The worker reports the action failure that terminates it to a
//! [`FailureSink`]. The submitter has long returned by then, so the sink is
//! the only place the error itself is delivered.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::error;

use crate::state::Fault;

/// Receives the failure of an action that terminated a dispatcher's worker
pub trait FailureSink: Send + Sync {
    /// Called once, from the worker, right before it exits
    fn report(&self, dispatcher: &str, fault: &Fault);
}

impl<S: FailureSink + ?Sized> FailureSink for Arc<S> {
    fn report(&self, dispatcher: &str, fault: &Fault) {
        (**self).report(dispatcher, fault)
    }
}

// ----------------------------------------------------------------------------
// Sink Implementations
// ----------------------------------------------------------------------------

/// Logs faults through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFailureSink;

impl FailureSink for TracingFailureSink {
    fn report(&self, dispatcher: &str, fault: &Fault) {
        error!(
            dispatcher,
            sequence = fault.sequence,
            panicked = fault.panicked,
            "Action failed, worker terminating: {}",
            fault.message
        );
    }
}

/// Discards every report
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpFailureSink;

impl FailureSink for NoOpFailureSink {
    fn report(&self, _dispatcher: &str, _fault: &Fault) {}
}

/// Keeps every report in memory
#[derive(Debug, Default)]
pub struct RecordingFailureSink {
    reports: Mutex<Vec<(String, Fault)>>,
}

impl RecordingFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the reports received so far
    pub fn reports(&self) -> Vec<(String, Fault)> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FailureSink for RecordingFailureSink {
    fn report(&self, dispatcher: &str, fault: &Fault) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((dispatcher.to_string(), fault.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault(sequence: u64) -> Fault {
        Fault {
            sequence,
            message: "Action failed: boom".to_string(),
            panicked: false,
            discarded: 0,
        }
    }

    #[test]
    fn test_recording_sink_through_arc() {
        let sink = Arc::new(RecordingFailureSink::new());
        assert!(sink.is_empty());

        let shared: Arc<dyn FailureSink> = sink.clone();
        shared.report("consumer", &fault(4));

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.reports(), vec![("consumer".to_string(), fault(4))]);
    }

    #[test]
    fn test_noop_and_tracing_sinks_accept_reports() {
        NoOpFailureSink.report("consumer", &fault(1));
        TracingFailureSink.report("consumer", &fault(2));
    }
}
