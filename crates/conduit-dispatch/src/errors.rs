//! Error types for the Conduit dispatcher
//!
//! `DispatchError` is returned synchronously to callers of the dispatcher's
//! mutating operations. `ActionError` describes a callback that failed while
//! the worker was running it; it never reaches the submitter and is only
//! observable through the failure sink and the `Faulted` state.

use std::any::Any;

// ----------------------------------------------------------------------------
// Dispatcher Errors
// ----------------------------------------------------------------------------

/// Errors returned by dispatcher operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// An argument supplied to the dispatcher was rejected
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Shutdown has been requested; no further actions are accepted
    #[error("Dispatcher '{name}' is closed")]
    Closed { name: String },

    /// The worker terminated because an action failed
    #[error("Dispatcher '{name}' is faulted: {reason}")]
    Faulted { name: String, reason: String },

    /// The worker could not be spawned because no tokio runtime is active
    #[error("No tokio runtime available: {reason}")]
    NoRuntime { reason: String },

    /// The worker task was cancelled or aborted before it could be joined
    #[error("Worker join failed: {reason}")]
    WorkerJoin { reason: String },
}

/// Result type for dispatcher operations
pub type DispatchResult<T> = core::result::Result<T, DispatchError>;

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl DispatchError {
    /// Create an invalid argument error with a reason
    pub fn invalid_argument<T: Into<String>>(reason: T) -> Self {
        DispatchError::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a closed error for the named dispatcher
    pub fn closed<T: Into<String>>(name: T) -> Self {
        DispatchError::Closed { name: name.into() }
    }

    /// Create a faulted error for the named dispatcher
    pub fn faulted<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        DispatchError::Faulted {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by the dispatcher no longer accepting work
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DispatchError::Closed { .. } | DispatchError::Faulted { .. }
        )
    }
}

// ----------------------------------------------------------------------------
// Action Errors
// ----------------------------------------------------------------------------

/// Failure raised by a submitted action while the worker executed it
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The action returned an error
    #[error("Action failed: {0:#}")]
    Failed(#[from] anyhow::Error),

    /// The action panicked
    #[error("Action panicked: {message}")]
    Panicked { message: String },
}

impl ActionError {
    /// Build a panic error from the payload returned by `catch_unwind`
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ActionError::Panicked { message }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, ActionError::Panicked { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classification() {
        assert!(DispatchError::closed("d").is_rejection());
        assert!(DispatchError::faulted("d", "boom").is_rejection());
        assert!(!DispatchError::invalid_argument("empty name").is_rejection());
    }

    #[test]
    fn test_error_display() {
        let err = DispatchError::faulted("consumer", "Action failed: boom");
        assert_eq!(
            err.to_string(),
            "Dispatcher 'consumer' is faulted: Action failed: boom"
        );
    }

    #[test]
    fn test_panic_payload_extraction() {
        let err = ActionError::from_panic(Box::new("static message"));
        assert!(err.is_panic());
        assert_eq!(err.to_string(), "Action panicked: static message");

        let err = ActionError::from_panic(Box::new(String::from("owned message")));
        assert_eq!(err.to_string(), "Action panicked: owned message");

        let err = ActionError::from_panic(Box::new(42u32));
        assert_eq!(err.to_string(), "Action panicked: non-string panic payload");
    }

    #[test]
    fn test_failed_keeps_context_chain() {
        let source = anyhow::anyhow!("decode error").context("handling delivery 7");
        let err = ActionError::from(source);
        assert!(!err.is_panic());
        assert_eq!(
            err.to_string(),
            "Action failed: handling delivery 7: decode error"
        );
    }
}
