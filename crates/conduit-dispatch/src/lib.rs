//! Conduit Consumer Dispatcher
//!
//! This crate contains the serialized callback dispatcher used by the Conduit
//! messaging client to deliver messages to consumers:
//! - `Dispatcher`: owns the FIFO queue and the single worker task
//! - `DispatcherHandle`: cloneable producer/notifier handle
//! - `FailureSink`: where a failing callback is reported before the worker exits
//! - `DispatcherState`: the `Running → ShuttingDown → Stopped | Faulted` lifecycle
//!
//! Delivery callbacks never run concurrently and always run in the order they
//! were queued. When the transport disconnects, `purge` drops everything that
//! has not started yet, since the broker redelivers unacknowledged messages.

pub mod action;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod sink;
pub mod state;
pub mod stats;

pub use action::{from_fn, ActionResult, BoxAction};
pub use config::{DispatcherConfig, DEFAULT_DISPATCHER_NAME};
pub use dispatcher::{ConsumerDispatcher, Dispatcher, DispatcherHandle};
pub use errors::{ActionError, DispatchError, DispatchResult};
pub use sink::{FailureSink, NoOpFailureSink, RecordingFailureSink, TracingFailureSink};
pub use state::{DispatcherState, Fault, LifecycleEvent, StateTransitionError};
pub use stats::DispatcherStats;
