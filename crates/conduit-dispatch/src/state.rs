//! Dispatcher Lifecycle State Machine
//!
//! The dispatcher moves through `Running → ShuttingDown → Stopped`, or into
//! `Faulted` when an action fails or the worker task is lost. Transitions are
//! driven by [`LifecycleEvent`]s and never go backward; anything else is
//! rejected with a [`StateTransitionError`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ActionError;

// ----------------------------------------------------------------------------
// Fault Record
// ----------------------------------------------------------------------------

/// Record of the failure that terminated the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Submission sequence number of the failed action (1-based), 0 when the
    /// worker was lost without an action failing
    pub sequence: u64,
    /// Rendered error, including any context chain
    pub message: String,
    /// Whether the action panicked rather than returning an error
    pub panicked: bool,
    /// Queued actions dropped because the worker terminated
    pub discarded: usize,
}

impl Fault {
    pub fn new(sequence: u64, error: &ActionError) -> Self {
        Self {
            sequence,
            message: error.to_string(),
            panicked: error.is_panic(),
            discarded: 0,
        }
    }

    /// The worker task was dropped before reaching `Stopped`, e.g. because
    /// its runtime shut down
    pub fn cancelled() -> Self {
        Self {
            sequence: 0,
            message: "worker task cancelled before the queue drained".to_string(),
            panicked: false,
            discarded: 0,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.sequence == 0
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_cancellation() {
            write!(f, "worker lost: {}", self.message)
        } else {
            write!(f, "action #{} failed: {}", self.sequence, self.message)
        }
    }
}

// ----------------------------------------------------------------------------
// Dispatcher State
// ----------------------------------------------------------------------------

/// Observable dispatcher status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatcherState {
    /// Accepting and executing actions
    Running,
    /// Shutdown requested; draining already-submitted actions
    ShuttingDown,
    /// Worker exited after draining the queue
    Stopped,
    /// Worker exited without draining: an action failed or the task was lost
    Faulted(Fault),
}

/// Inputs that drive the lifecycle state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Owner asked the dispatcher to stop accepting work
    ShutdownRequested,
    /// Worker found the queue empty after shutdown was requested
    QueueDrained,
    /// An action failed and the worker is terminating
    ActionFailed(Fault),
    /// The worker task was dropped before it could exit on its own
    WorkerCancelled(Fault),
}

impl DispatcherState {
    /// Apply a lifecycle event, returning the next state
    pub fn transition(&self, event: LifecycleEvent) -> Result<Self, StateTransitionError> {
        match (self, event) {
            (DispatcherState::Running, LifecycleEvent::ShutdownRequested) => {
                Ok(DispatcherState::ShuttingDown)
            }
            (DispatcherState::ShuttingDown, LifecycleEvent::QueueDrained) => {
                Ok(DispatcherState::Stopped)
            }
            (
                DispatcherState::Running | DispatcherState::ShuttingDown,
                LifecycleEvent::ActionFailed(fault) | LifecycleEvent::WorkerCancelled(fault),
            ) => Ok(DispatcherState::Faulted(fault)),
            (state, event) => Err(StateTransitionError::InvalidTransition {
                from_state: state.state_name().to_string(),
                event: event.event_name().to_string(),
            }),
        }
    }

    /// Only a running dispatcher accepts new actions
    pub fn accepts_work(&self) -> bool {
        matches!(self, DispatcherState::Running)
    }

    /// True once the worker has exited, cleanly or not
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatcherState::Stopped | DispatcherState::Faulted(_))
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            DispatcherState::Faulted(fault) => Some(fault),
            _ => None,
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            DispatcherState::Running => "Running",
            DispatcherState::ShuttingDown => "ShuttingDown",
            DispatcherState::Stopped => "Stopped",
            DispatcherState::Faulted(_) => "Faulted",
        }
    }
}

impl LifecycleEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            LifecycleEvent::ShutdownRequested => "ShutdownRequested",
            LifecycleEvent::QueueDrained => "QueueDrained",
            LifecycleEvent::ActionFailed(_) => "ActionFailed",
            LifecycleEvent::WorkerCancelled(_) => "WorkerCancelled",
        }
    }
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatcherState::Faulted(fault) => write!(f, "Faulted({})", fault),
            other => write!(f, "{}", other.state_name()),
        }
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors that can occur during state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Invalid transition from {from_state} on event {event}")]
    InvalidTransition { from_state: String, event: String },
}
