//! Run lifecycle supervision.
//!
//! The orchestrator starts one worker per source plus the aggregator and
//! alerter, bounds the run by wall-clock time, drains everything on expiry or
//! on the first fatal error, and assembles the final [`RunSummary`].

use crate::analysis::{summarize_pairs, Aggregator, Alerter, AlerterReport};
use crate::config::Config;
use crate::error::{ConfigError, MonitorError};
use crate::models::{RunOutcome, RunSummary, SourceReport, SourceStatus};
use crate::monitor::state::{RunState, RunStateController};
use crate::monitor::stats::MonitorStats;
use crate::monitor::worker::{SourceWorker, WorkerSettings};
use crate::report::{AlertLog, PackageWriter};
use crate::sources::MonitoredSource;
use crate::store::{EvidenceStore, ObservationFilter};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

/// Aggregation results buffered between the aggregator and the alerter.
const RESULT_BUFFER: usize = 256;

/// What a subordinate task hands back when it exits.
enum TaskOutcome {
    Worker(SourceReport),
    Aggregator,
    Alerter(AlerterReport),
}

type TaskResult = Result<TaskOutcome, MonitorError>;

/// Outputs gathered from finished tasks.
#[derive(Default)]
struct Collected {
    sources: Vec<SourceReport>,
    alerter: AlerterReport,
    error: Option<String>,
}

impl Collected {
    /// Absorb one finished task. Returns `false` when the task failed.
    fn absorb(&mut self, joined: Result<TaskResult, JoinError>) -> bool {
        let failure = match joined {
            Ok(Ok(TaskOutcome::Worker(report))) => {
                self.sources.push(report);
                return true;
            }
            Ok(Ok(TaskOutcome::Aggregator)) => return true,
            Ok(Ok(TaskOutcome::Alerter(report))) => {
                self.alerter = report;
                return true;
            }
            Ok(Err(e)) => e,
            Err(e) => MonitorError::TaskFailed {
                task: "monitor task".to_string(),
                message: e.to_string(),
            },
        };

        error!("{}", failure);
        // keep the first failure; later ones are usually consequences of it
        if self.error.is_none() {
            self.error = Some(failure.to_string());
        }
        false
    }
}

pub struct Orchestrator {
    config: Config,
    sources: Vec<MonitoredSource>,
    store: EvidenceStore,
    state: RunStateController,
    stats: Arc<MonitorStats>,
}

impl Orchestrator {
    /// Validate the configuration and prepare a run. Nothing is spawned yet.
    pub fn new(
        config: Config,
        sources: Vec<MonitoredSource>,
        store: EvidenceStore,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        if sources.is_empty() {
            return Err(ConfigError::NoSources.into());
        }

        Ok(Self {
            config,
            sources,
            store,
            state: RunStateController::new(),
            stats: Arc::new(MonitorStats::default()),
        })
    }

    #[cfg(test)]
    pub fn watch(&self) -> crate::monitor::state::RunStateWatch {
        self.state.watch()
    }

    /// Run to completion and return the final summary.
    ///
    /// Failures inside the run are reported through the summary's outcome
    /// and error fields rather than returned.
    pub async fn run(self) -> RunSummary {
        let started_at = Utc::now();
        let clock = tokio::time::Instant::now();

        self.state.set(RunState::Running);
        let mut tasks = self.spawn_tasks();
        let mut collected = Collected::default();

        let run_duration = self.config.run_duration();
        info!(
            "Monitoring {} sources for up to {}s",
            self.sources.len(),
            run_duration.as_secs()
        );

        let deadline = tokio::time::sleep(run_duration);
        tokio::pin!(deadline);

        let mut outcome = loop {
            tokio::select! {
                _ = &mut deadline => {
                    info!("Run duration reached, draining");
                    break RunOutcome::TimedOut;
                }
                joined = tasks.join_next() => match joined {
                    None => break RunOutcome::Completed,
                    Some(joined) => {
                        if !collected.absorb(joined) {
                            break RunOutcome::Failed;
                        }
                    }
                },
            }
        };

        if outcome == RunOutcome::Failed {
            // nothing else should land in the log once the run has failed
            self.store.close();
        }

        self.state.set(RunState::Draining);
        let drain_timeout = self.config.drain_timeout();
        let drained =
            tokio::time::timeout(drain_timeout, drain(&mut tasks, &mut collected)).await;
        if drained.is_err() {
            warn!(
                "{} tasks still running after {:?}, aborting them",
                tasks.len(),
                drain_timeout
            );
            tasks.shutdown().await;
        }
        self.record_unreported_sources(&mut collected);
        self.state.set(RunState::Done);

        if collected.error.is_some() {
            outcome = RunOutcome::Failed;
        }

        self.summarize(started_at, clock.elapsed(), outcome, collected)
    }

    fn spawn_tasks(&self) -> JoinSet<TaskResult> {
        let mut tasks = JoinSet::new();
        let settings = WorkerSettings::from(&self.config);

        for source in &self.sources {
            let worker = SourceWorker::new(
                source.clone(),
                self.store.clone(),
                settings.clone(),
                Arc::clone(&self.stats),
                self.state.watch(),
            );
            tasks.spawn(async move { worker.run().await.map(TaskOutcome::Worker) });
        }

        let (tx, rx) = mpsc::channel(RESULT_BUFFER);
        let analysis = &self.config.analysis;

        let aggregator = Aggregator::new(
            self.store.clone(),
            Duration::from_secs(analysis.window_secs),
            Duration::from_secs(analysis.interval_secs),
            Arc::clone(&self.stats),
            tx,
            self.state.watch(),
        );
        tasks.spawn(async move { aggregator.run().await.map(|_| TaskOutcome::Aggregator) });

        let output_dir = &self.config.general.output_dir;
        let alerter = Alerter::new(
            self.store.clone(),
            analysis.alert_threshold,
            PackageWriter::new(output_dir.join("packages")),
            AlertLog::new(output_dir.join("alerts.jsonl")),
            Arc::clone(&self.stats),
            rx,
        );
        tasks.spawn(async move { alerter.run().await.map(TaskOutcome::Alerter) });

        tasks
    }

    /// Give every source whose worker failed or was aborted a `failed` entry,
    /// so no source drops out of the summary.
    fn record_unreported_sources(&self, collected: &mut Collected) {
        for source in &self.sources {
            let capability = &source.capability;
            if collected.sources.iter().any(|r| r.source == capability.id()) {
                continue;
            }
            warn!(source = capability.id(), "Worker exited without a report");
            collected.sources.push(SourceReport {
                source: capability.id().to_string(),
                name: capability.name().to_string(),
                passes_completed: 0,
                polls: 0,
                transport_errors: 0,
                status: SourceStatus::Failed,
                last_check: None,
            });
        }
    }

    fn summarize(
        &self,
        started_at: chrono::DateTime<Utc>,
        elapsed: Duration,
        outcome: RunOutcome,
        mut collected: Collected,
    ) -> RunSummary {
        let pairs = match self.store.query(&ObservationFilter::since(started_at)) {
            Ok(observations) => summarize_pairs(&observations),
            Err(e) => {
                error!("Failed to read evidence for the summary: {}", e);
                collected.error.get_or_insert_with(|| e.to_string());
                Vec::new()
            }
        };

        collected.sources.sort_by(|a, b| a.source.cmp(&b.source));

        if self.store.is_closed() {
            let log = self
                .store
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "in-memory".to_string());
            warn!("Evidence log ({}) stopped accepting writes during the run", log);
        }

        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            duration_seconds: elapsed.as_secs_f64(),
            outcome,
            pairs,
            sources: collected.sources,
            alerts: collected.alerter.alerts,
            packages: collected
                .alerter
                .packages
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            error: collected.error,
        };

        info!(
            "Run {} after {:.1}s: {} observations, {} anomalous, {} alerts",
            summary.outcome,
            summary.duration_seconds,
            summary.total_observations(),
            summary.total_anomalous(),
            summary.alerts.len()
        );
        summary
    }
}

async fn drain(tasks: &mut JoinSet<TaskResult>, collected: &mut Collected) {
    while let Some(joined) = tasks.join_next().await {
        collected.absorb(joined);
    }
}
