//! Simulated delivery scenario
//!
//! Producers submit delivery callbacks concurrently. A simulated transport
//! disconnect purges the queue once enough deliveries have been submitted, and
//! an optional delivery fails to show how a fault stops the worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use conduit_dispatch::{
    DispatchError, Dispatcher, DispatcherHandle, DispatcherState, DispatcherStats, FailureSink,
    Fault, RecordingFailureSink, TracingFailureSink,
};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Report
// ----------------------------------------------------------------------------

/// Outcome of a scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Delivery tags in the order the worker ran them
    pub delivered: Vec<String>,
    /// Deliveries discarded by the simulated disconnect
    pub purged: usize,
    /// Submissions refused by the dispatcher
    pub rejected: usize,
    pub final_state: DispatcherState,
    pub faults: Vec<Fault>,
    pub stats: DispatcherStats,
}

impl ScenarioReport {
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Final state: {}", self.final_state),
            format!(
                "Delivered {} / submitted {} (purged {}, rejected {}, discarded {})",
                self.delivered.len(),
                self.stats.submitted,
                self.purged,
                self.rejected,
                self.stats.discarded
            ),
        ];
        for fault in &self.faults {
            lines.push(format!("Fault: {}", fault));
        }
        lines.join("\n")
    }
}

// ----------------------------------------------------------------------------
// Failure Sink
// ----------------------------------------------------------------------------

/// Logs faults and keeps them for the report
#[derive(Default)]
struct ScenarioSink {
    log: TracingFailureSink,
    record: RecordingFailureSink,
}

impl FailureSink for ScenarioSink {
    fn report(&self, dispatcher: &str, fault: &Fault) {
        self.log.report(dispatcher, fault);
        self.record.report(dispatcher, fault);
    }
}

// ----------------------------------------------------------------------------
// Scenario Runner
// ----------------------------------------------------------------------------

/// Counters shared by all producers
#[derive(Default)]
struct Progress {
    submitted: AtomicUsize,
    purged: AtomicUsize,
    rejected: AtomicUsize,
    delivered: Mutex<Vec<String>>,
}

pub struct ScenarioRunner {
    config: AppConfig,
}

impl ScenarioRunner {
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub async fn run(self) -> Result<ScenarioReport> {
        let scenario = self.config.scenario.clone();
        let sink = Arc::new(ScenarioSink::default());
        let dispatcher = Dispatcher::start(self.config.dispatcher.clone(), sink.clone())?;
        let observer = dispatcher.handle();
        let progress = Arc::new(Progress::default());

        info!(
            producers = scenario.producers,
            deliveries = scenario.deliveries_per_producer,
            "Starting delivery scenario on '{}'",
            dispatcher.name()
        );

        let producers: Vec<_> = (0..scenario.producers)
            .map(|producer| {
                let handle = dispatcher.handle();
                let progress = progress.clone();
                let scenario = scenario.clone();
                tokio::spawn(async move {
                    for delivery in 0..scenario.deliveries_per_producer {
                        let tag = format!("p{}-d{}", producer, delivery);
                        if !submit_delivery(&handle, &progress, &scenario, tag) {
                            break;
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.await?;
        }

        let limit = Duration::from_secs(scenario.shutdown_timeout_secs);
        let final_state = timeout(limit, dispatcher.shutdown_and_join())
            .await
            .map_err(|_| CliError::Timeout(format!("dispatcher did not drain within {:?}", limit)))??;

        let delivered = progress
            .delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let report = ScenarioReport {
            delivered,
            purged: progress.purged.load(Ordering::SeqCst),
            rejected: progress.rejected.load(Ordering::SeqCst),
            final_state,
            faults: sink.record.reports().into_iter().map(|(_, fault)| fault).collect(),
            stats: observer.stats(),
        };
        info!("Scenario finished: {}", report.final_state);
        Ok(report)
    }
}

/// Submit one delivery; returns false once the dispatcher refuses work
fn submit_delivery(
    handle: &DispatcherHandle,
    progress: &Arc<Progress>,
    scenario: &crate::config::ScenarioConfig,
    tag: String,
) -> bool {
    let ordinal = progress.submitted.fetch_add(1, Ordering::SeqCst) + 1;
    let fails = scenario.fail_at == Some(ordinal);
    let delay = Duration::from_millis(scenario.delivery_delay_ms);
    let recorder = progress.clone();

    let submitted = handle.submit(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fails {
            anyhow::bail!("consumer rejected delivery {}", tag);
        }
        recorder
            .delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tag);
        Ok(())
    });

    match submitted {
        Ok(sequence) => debug!(sequence, ordinal, "Delivery queued"),
        Err(err @ (DispatchError::Closed { .. } | DispatchError::Faulted { .. })) => {
            progress.rejected.fetch_add(1, Ordering::SeqCst);
            warn!("Producer stopping: {}", err);
            return false;
        }
        Err(err) => {
            warn!("Unexpected submit error: {}", err);
            return false;
        }
    }

    if scenario.disconnect_after == Some(ordinal) {
        let purged = handle.purge();
        progress.purged.fetch_add(purged, Ordering::SeqCst);
        info!(purged, "Simulated transport disconnect");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScenarioConfig;

    fn config(scenario: ScenarioConfig) -> AppConfig {
        AppConfig {
            dispatcher: conduit_dispatch::DispatcherConfig::testing(),
            scenario,
        }
    }

    #[tokio::test]
    async fn test_single_producer_delivers_in_order() -> Result<()> {
        let report = ScenarioRunner::new(config(ScenarioConfig {
            producers: 1,
            deliveries_per_producer: 5,
            delivery_delay_ms: 0,
            ..ScenarioConfig::default()
        }))?
        .run()
        .await?;

        assert_eq!(
            report.delivered,
            vec!["p0-d0", "p0-d1", "p0-d2", "p0-d3", "p0-d4"]
        );
        assert_eq!(report.final_state, DispatcherState::Stopped);
        assert_eq!(report.stats.executed, 5);
        assert!(report.faults.is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disconnect_accounts_for_every_delivery() -> Result<()> {
        let report = ScenarioRunner::new(config(ScenarioConfig {
            producers: 3,
            deliveries_per_producer: 10,
            disconnect_after: Some(12),
            ..ScenarioConfig::default()
        }))?
        .run()
        .await?;

        assert_eq!(report.final_state, DispatcherState::Stopped);
        assert_eq!(report.delivered.len() + report.purged, 30);
        assert_eq!(report.stats.purged as usize, report.purged);
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_delivery_faults_dispatcher() -> Result<()> {
        let report = ScenarioRunner::new(config(ScenarioConfig {
            producers: 1,
            deliveries_per_producer: 6,
            delivery_delay_ms: 0,
            fail_at: Some(3),
            ..ScenarioConfig::default()
        }))?
        .run()
        .await?;

        assert!(matches!(report.final_state, DispatcherState::Faulted(_)));
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].sequence, 3);
        assert_eq!(report.delivered, vec!["p0-d0", "p0-d1"]);
        assert!(report.summary().contains("Fault: action #3 failed"));
        Ok(())
    }
}
