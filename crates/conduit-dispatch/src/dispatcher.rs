//! Serialized Callback Dispatcher
//!
//! A [`Dispatcher`] owns an unbounded FIFO of callback actions and a single
//! worker task that runs them one at a time, in submission order:
//!
//! - Producers call `submit`/`submit_fn`, from any task or thread
//! - The connection-lifecycle notifier calls `purge` on disconnect, dropping
//!   every queued action that has not started yet
//! - The owner calls `shutdown`; the worker drains what was already accepted
//!   and then stops
//!
//! The queue and the lifecycle state sit behind one lock, so a submission is
//! either accepted before shutdown (and will run unless purged) or rejected.
//! An action that fails terminates the worker and leaves the dispatcher in the
//! observable `Faulted` state. The failure sink is told before `Faulted` is
//! published, and a worker task dropped before it exits (runtime shutdown)
//! faults the dispatcher instead of leaving it `Running`.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::action::{from_fn, ActionResult, BoxAction, QueuedAction};
use crate::config::DispatcherConfig;
use crate::errors::{DispatchError, DispatchResult};
use crate::sink::{FailureSink, TracingFailureSink};
use crate::state::{DispatcherState, Fault, LifecycleEvent};
use crate::stats::{DispatcherStats, StatsCounters};

// ----------------------------------------------------------------------------
// Consumer Dispatcher Interface
// ----------------------------------------------------------------------------

/// Object-safe seam the consumer layer programs against
pub trait ConsumerDispatcher: Send + Sync {
    /// Queue a delivery callback; returns its submission sequence number
    fn queue_action(&self, action: BoxAction) -> DispatchResult<u64>;

    /// Transport connection lost; drop callbacks that have not started
    fn on_disconnected(&self) -> usize;

    /// Stop accepting callbacks and let the worker drain
    fn shutdown(&self);

    /// Whether the worker has exited
    fn is_stopped(&self) -> bool;
}

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

struct Inner {
    queue: VecDeque<QueuedAction>,
    state: DispatcherState,
    next_sequence: u64,
    /// Set while the sink is being told about a fault that is not yet published
    pending_fault: Option<Fault>,
}

struct Shared {
    config: DispatcherConfig,
    inner: Mutex<Inner>,
    wakeup: Notify,
    state_tx: watch::Sender<DispatcherState>,
    sink: Arc<dyn FailureSink>,
    stats: StatsCounters,
}

/// What the worker does next, decided under the lock
enum Step {
    Run(QueuedAction),
    Wait,
    Exit,
}

impl Shared {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Actions never run under the lock, so poisoning cannot leave the
        // queue half-updated
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Must be called with the lock held so watchers see transitions in order
    fn set_state(&self, inner: &mut Inner, next: DispatcherState) {
        inner.state = next.clone();
        self.state_tx.send_replace(next);
    }

    async fn wait_terminal(&self) -> DispatcherState {
        let mut state_rx = self.state_tx.subscribe();
        let terminal = state_rx
            .wait_for(DispatcherState::is_terminal)
            .await
            .map(|state| state.clone());
        // `self` owns the sender, so the channel cannot close while we wait
        terminal.unwrap_or_else(|_| self.lock().state.clone())
    }

    fn rejection(&self, inner: &Inner) -> Option<DispatchError> {
        let fault = inner.pending_fault.as_ref().or(inner.state.fault());
        match fault {
            Some(fault) => Some(DispatchError::faulted(self.name(), fault.to_string())),
            None if inner.state.accepts_work() => None,
            None => Some(DispatchError::closed(self.name())),
        }
    }

    fn submit(&self, action: BoxAction) -> DispatchResult<u64> {
        let mut inner = self.lock();
        if let Some(err) = self.rejection(&inner) {
            drop(inner);
            StatsCounters::add(&self.stats.rejected, 1);
            warn!(dispatcher = %self.name(), "Rejected action: {}", err);
            return Err(err);
        }

        inner.next_sequence += 1;
        let sequence = inner.next_sequence;
        inner.queue.push_back(QueuedAction::new(sequence, action));
        drop(inner);

        StatsCounters::add(&self.stats.submitted, 1);
        if self.config.trace_actions {
            trace!(dispatcher = %self.name(), sequence, "Action queued");
        }
        self.wakeup.notify_one();
        Ok(sequence)
    }

    fn purge(&self) -> usize {
        let discarded = {
            let mut inner = self.lock();
            std::mem::take(&mut inner.queue)
        };
        let count = discarded.len();
        // Dropped outside the lock; action destructors may be arbitrary code
        drop(discarded);

        StatsCounters::add(&self.stats.purges, 1);
        StatsCounters::add(&self.stats.purged, count as u64);
        debug!(dispatcher = %self.name(), discarded = count, "Purged queued actions");
        count
    }

    fn request_shutdown(&self) -> bool {
        let mut inner = self.lock();
        match inner.state.transition(LifecycleEvent::ShutdownRequested) {
            Ok(next) => {
                self.set_state(&mut inner, next);
                let pending = inner.queue.len();
                drop(inner);
                info!(dispatcher = %self.name(), pending, "Shutdown requested");
                self.wakeup.notify_one();
                true
            }
            Err(_) => {
                debug!(
                    dispatcher = %self.name(),
                    state = inner.state.state_name(),
                    "Shutdown already requested"
                );
                false
            }
        }
    }

    fn next_step(&self) -> Step {
        let mut inner = self.lock();
        if let Some(action) = inner.queue.pop_front() {
            return Step::Run(action);
        }
        match inner.state.transition(LifecycleEvent::QueueDrained) {
            Ok(next) => {
                self.set_state(&mut inner, next);
                Step::Exit
            }
            Err(_) => Step::Wait,
        }
    }

    /// Drop the remaining queue, report to the sink, then publish `Faulted`
    ///
    /// Submissions are refused from the moment the queue is taken, but the
    /// state only changes once the sink has returned.
    fn fault(&self, mut fault: Fault, event: fn(Fault) -> LifecycleEvent) {
        let discarded = {
            let mut inner = self.lock();
            if inner.state.is_terminal() || inner.pending_fault.is_some() {
                return;
            }
            let discarded = std::mem::take(&mut inner.queue);
            fault.discarded = discarded.len();
            inner.pending_fault = Some(fault.clone());
            discarded
        };
        drop(discarded);
        StatsCounters::add(&self.stats.discarded, fault.discarded as u64);

        self.sink.report(self.name(), &fault);

        let mut inner = self.lock();
        inner.pending_fault = None;
        self.publish_fault(&mut inner, event(fault));
    }

    fn publish_fault(&self, inner: &mut Inner, event: LifecycleEvent) {
        match inner.state.transition(event) {
            Ok(next) => self.set_state(inner, next),
            // Only the worker leaves Running/ShuttingDown, and it is here
            Err(err) => error!(dispatcher = %self.name(), "Unexpected state: {}", err),
        }
    }
}

/// Owned by the worker future, so it is dropped with it even if the task is
/// cancelled before its first poll
struct WorkerGuard {
    shared: Arc<Shared>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let shared = &self.shared;
        let mut inner = shared.lock();
        if inner.state.is_terminal() {
            return;
        }
        if let Some(fault) = inner.pending_fault.take() {
            // The sink panicked while being told; publish what it was given
            shared.publish_fault(&mut inner, LifecycleEvent::ActionFailed(fault));
            return;
        }
        let pending = inner.queue.len();
        drop(inner);

        warn!(dispatcher = %shared.name(), pending, "Dispatch worker dropped before exiting");
        shared.fault(Fault::cancelled(), LifecycleEvent::WorkerCancelled);
    }
}

async fn run_worker(worker: WorkerGuard) {
    let shared = &worker.shared;
    info!(dispatcher = %shared.name(), "Dispatch worker starting");

    loop {
        match shared.next_step() {
            Step::Run(action) => {
                let sequence = action.sequence();
                if shared.config.trace_actions {
                    trace!(dispatcher = %shared.name(), sequence, "Running action");
                }
                match action.run().await {
                    Ok(()) => {
                        StatsCounters::add(&shared.stats.executed, 1);
                        if shared.config.trace_actions {
                            trace!(dispatcher = %shared.name(), sequence, "Action finished");
                        }
                    }
                    Err(err) => {
                        StatsCounters::add(&shared.stats.failed, 1);
                        shared.fault(Fault::new(sequence, &err), LifecycleEvent::ActionFailed);
                        warn!(
                            dispatcher = %shared.name(),
                            sequence,
                            "Dispatch worker terminated by failed action"
                        );
                        return;
                    }
                }
            }
            Step::Wait => shared.wakeup.notified().await,
            Step::Exit => break,
        }
    }

    info!(dispatcher = %shared.name(), "Dispatch worker stopped");
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

/// Owning handle of a serialized callback dispatcher
///
/// Dropping the dispatcher requests shutdown; already-accepted actions still
/// drain on the worker task.
pub struct Dispatcher {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Create a dispatcher and spawn its worker on the current tokio runtime
    pub fn start<S>(config: DispatcherConfig, sink: S) -> DispatchResult<Self>
    where
        S: FailureSink + 'static,
    {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            DispatchError::NoRuntime {
                reason: e.to_string(),
            }
        })?;

        let (state_tx, _) = watch::channel(DispatcherState::Running);
        let shared = Arc::new(Shared {
            config,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                state: DispatcherState::Running,
                next_sequence: 0,
                pending_fault: None,
            }),
            wakeup: Notify::new(),
            state_tx,
            sink: Arc::new(sink),
            stats: StatsCounters::default(),
        });

        let worker = runtime.spawn(run_worker(WorkerGuard {
            shared: shared.clone(),
        }));
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Default configuration, faults logged through `tracing`
    pub fn with_defaults() -> DispatchResult<Self> {
        Self::start(DispatcherConfig::default(), TracingFailureSink)
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Cloneable handle for producers and the disconnect notifier
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            shared: self.shared.clone(),
        }
    }

    /// Queue an async action
    pub fn submit<F>(&self, action: F) -> DispatchResult<u64>
    where
        F: Future<Output = ActionResult> + Send + 'static,
    {
        self.shared.submit(action.boxed())
    }

    /// Queue a synchronous callback
    pub fn submit_fn<F>(&self, callback: F) -> DispatchResult<u64>
    where
        F: FnOnce() -> ActionResult + Send + 'static,
    {
        self.shared.submit(from_fn(callback))
    }

    /// Discard every queued action that has not started; returns how many
    pub fn purge(&self) -> usize {
        self.shared.purge()
    }

    /// Stop accepting actions and let the worker drain. Idempotent.
    pub fn shutdown(&self) {
        self.shared.request_shutdown();
    }

    pub fn state(&self) -> DispatcherState {
        self.shared.lock().state.clone()
    }

    /// True once the worker has exited, cleanly or by fault
    pub fn is_stopped(&self) -> bool {
        self.shared.lock().state.is_terminal()
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.shared.lock().state, DispatcherState::Faulted(_))
    }

    /// Number of actions waiting in the queue
    pub fn pending(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.shared.stats.snapshot()
    }

    /// Receiver notified on every state transition
    pub fn subscribe_state(&self) -> watch::Receiver<DispatcherState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until the worker reaches `Stopped` or `Faulted`
    pub async fn wait_for_exit(&self) -> DispatcherState {
        self.shared.wait_terminal().await
    }

    /// Request shutdown and wait for the worker task to finish
    pub async fn shutdown_and_join(mut self) -> DispatchResult<DispatcherState> {
        self.shared.request_shutdown();
        if let Some(worker) = self.worker.take() {
            worker.await.map_err(|e| DispatchError::WorkerJoin {
                reason: e.to_string(),
            })?;
        }
        Ok(self.state())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shared.request_shutdown();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

impl ConsumerDispatcher for Dispatcher {
    fn queue_action(&self, action: BoxAction) -> DispatchResult<u64> {
        self.shared.submit(action)
    }

    fn on_disconnected(&self) -> usize {
        self.purge()
    }

    fn shutdown(&self) {
        Dispatcher::shutdown(self)
    }

    fn is_stopped(&self) -> bool {
        Dispatcher::is_stopped(self)
    }
}

// ----------------------------------------------------------------------------
// Dispatcher Handle
// ----------------------------------------------------------------------------

/// Producer-side handle: can submit and purge, cannot shut down
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
}

impl DispatcherHandle {
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn submit<F>(&self, action: F) -> DispatchResult<u64>
    where
        F: Future<Output = ActionResult> + Send + 'static,
    {
        self.shared.submit(action.boxed())
    }

    pub fn submit_fn<F>(&self, callback: F) -> DispatchResult<u64>
    where
        F: FnOnce() -> ActionResult + Send + 'static,
    {
        self.shared.submit(from_fn(callback))
    }

    pub fn purge(&self) -> usize {
        self.shared.purge()
    }

    pub fn state(&self) -> DispatcherState {
        self.shared.lock().state.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.lock().state.is_terminal()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.shared.stats.snapshot()
    }

    pub async fn wait_for_exit(&self) -> DispatcherState {
        self.shared.wait_terminal().await
    }
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingFailureSink;
    use std::time::Duration;
    use tokio::time::timeout;

    fn recording_dispatcher() -> (Dispatcher, Arc<RecordingFailureSink>) {
        let sink = Arc::new(RecordingFailureSink::new());
        let dispatcher =
            Dispatcher::start(DispatcherConfig::testing(), sink.clone()).expect("runtime active");
        (dispatcher, sink)
    }

    #[test]
    fn test_start_requires_runtime() {
        let err = Dispatcher::with_defaults().unwrap_err();
        assert!(matches!(err, DispatchError::NoRuntime { .. }));
    }

    #[tokio::test]
    async fn test_start_rejects_blank_name() {
        let err = Dispatcher::start(DispatcherConfig::named(""), TracingFailureSink).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_sequence_numbers_increase() {
        let (dispatcher, _sink) = recording_dispatcher();
        assert_eq!(dispatcher.submit_fn(|| Ok(())), Ok(1));
        assert_eq!(dispatcher.submit(async { Ok(()) }), Ok(2));
        assert_eq!(dispatcher.handle().submit_fn(|| Ok(())), Ok(3));

        let state = dispatcher.shutdown_and_join().await.expect("worker joins");
        assert_eq!(state, DispatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_drop_requests_shutdown() {
        let (dispatcher, _sink) = recording_dispatcher();
        let handle = dispatcher.handle();
        drop(dispatcher);

        assert!(matches!(
            handle.submit_fn(|| Ok(())),
            Err(DispatchError::Closed { .. })
        ));
        let state = timeout(Duration::from_secs(5), handle.wait_for_exit())
            .await
            .expect("worker exits after drop");
        assert_eq!(state, DispatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_fault_rejects_later_submissions() {
        let (dispatcher, sink) = recording_dispatcher();
        dispatcher
            .submit_fn(|| Err(anyhow::anyhow!("decode failed")))
            .expect("accepted");

        let state = timeout(Duration::from_secs(5), dispatcher.wait_for_exit())
            .await
            .expect("worker exits on fault");
        assert!(dispatcher.is_faulted());
        assert!(dispatcher.is_stopped());
        assert_eq!(state.fault().map(|f| f.sequence), Some(1));
        assert_eq!(sink.len(), 1);

        let err = dispatcher.submit_fn(|| Ok(())).unwrap_err();
        assert_eq!(
            err,
            DispatchError::faulted(
                "test dispatcher",
                "action #1 failed: Action failed: decode failed"
            )
        );
        assert_eq!(dispatcher.stats().rejected, 1);
    }

    /// Log buffer shared with a `fmt` subscriber
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn run_with_logs(config: DispatcherConfig) -> String {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("test runtime");
            runtime.block_on(async {
                let dispatcher =
                    Dispatcher::start(config, RecordingFailureSink::new()).expect("runtime active");
                dispatcher.submit_fn(|| Ok(())).expect("accepted");
                let state = dispatcher.shutdown_and_join().await.expect("worker joins");
                assert_eq!(state, DispatcherState::Stopped);
            });
        });

        let output = logs.0.lock().unwrap().clone();
        String::from_utf8(output).expect("utf-8 log output")
    }

    #[test]
    fn test_trace_actions_logs_start_and_finish() {
        let output = run_with_logs(DispatcherConfig::testing());
        assert!(output.contains("Action queued"));
        assert!(output.contains("Running action"));
        assert!(output.contains("Action finished"));
        assert!(output.contains("sequence=1"));
    }

    #[test]
    fn test_action_traces_disabled() {
        let output = run_with_logs(DispatcherConfig::testing().with_trace_actions(false));
        assert!(output.contains("Dispatch worker stopped"));
        assert!(!output.contains("Running action"));
        assert!(!output.contains("Action finished"));
    }

    #[tokio::test]
    async fn test_consumer_dispatcher_trait_object() {
        let (dispatcher, _sink) = recording_dispatcher();
        let consumer: &dyn ConsumerDispatcher = &dispatcher;

        assert_eq!(consumer.queue_action(from_fn(|| Ok(()))), Ok(1));
        consumer.shutdown();
        consumer.shutdown();
        assert!(consumer.queue_action(from_fn(|| Ok(()))).is_err());

        timeout(Duration::from_secs(5), dispatcher.wait_for_exit())
            .await
            .expect("worker exits");
        assert!(consumer.is_stopped());
        assert_eq!(consumer.on_disconnected(), 0);
    }
}
