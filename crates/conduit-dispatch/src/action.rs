//! Callback actions
//!
//! An action is a boxed `'static` future resolving to `anyhow::Result<()>`.
//! Synchronous callbacks are wrapped with [`from_fn`] and run inline on the
//! worker when it polls them.

use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::errors::ActionError;

/// Outcome of a single callback
pub type ActionResult = anyhow::Result<()>;

/// Type-erased action as stored in the queue
pub type BoxAction = BoxFuture<'static, ActionResult>;

/// Wrap a synchronous callback into an action
pub fn from_fn<F>(callback: F) -> BoxAction
where
    F: FnOnce() -> ActionResult + Send + 'static,
{
    async move { callback() }.boxed()
}

// ----------------------------------------------------------------------------
// Queued Action
// ----------------------------------------------------------------------------

/// An action waiting in the dispatcher queue, tagged with its submission order
pub(crate) struct QueuedAction {
    sequence: u64,
    action: BoxAction,
}

impl QueuedAction {
    pub(crate) fn new(sequence: u64, action: BoxAction) -> Self {
        Self { sequence, action }
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Drive the action to completion, turning panics into `ActionError`
    pub(crate) async fn run(self) -> Result<(), ActionError> {
        match AssertUnwindSafe(self.action).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(ActionError::Failed(error)),
            Err(payload) => Err(ActionError::from_panic(payload)),
        }
    }
}

impl std::fmt::Debug for QueuedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedAction")
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_action() {
        let queued = QueuedAction::new(1, from_fn(|| Ok(())));
        assert_eq!(queued.sequence(), 1);
        assert!(queued.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_error_is_reported_as_failure() {
        let queued = QueuedAction::new(2, from_fn(|| Err(anyhow::anyhow!("bad delivery"))));
        let err = queued.run().await.unwrap_err();
        assert!(!err.is_panic());
        assert_eq!(err.to_string(), "Action failed: bad delivery");
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let queued = QueuedAction::new(3, from_fn(|| panic!("consumer exploded")));
        let err = queued.run().await.unwrap_err();
        assert!(err.is_panic());
        assert_eq!(err.to_string(), "Action panicked: consumer exploded");
    }

    fn explode() -> ActionResult {
        panic!("late panic")
    }

    #[tokio::test]
    async fn test_async_action_panic_is_caught() {
        let action = async {
            tokio::task::yield_now().await;
            explode()
        }
        .boxed();
        let err = QueuedAction::new(4, action).run().await.unwrap_err();
        assert!(err.is_panic());
    }
}
