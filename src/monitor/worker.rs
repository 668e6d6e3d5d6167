//! Per-source polling worker.
//!
//! A worker walks the identifier list in order, one search per identifier,
//! sleeping `1 / rate_limit` between searches and the scan interval between
//! passes. Repeated transport failures switch every delay to the backoff
//! interval until a search succeeds again.

use crate::config::{Config, IdentifierConfig, MAX_DURATION_SECS};
use crate::error::{MonitorError, StoreError};
use crate::fingerprint::fingerprint;
use crate::models::{Observation, RawResult, SourceReport, SourceStatus};
use crate::monitor::state::RunStateWatch;
use crate::monitor::stats::MonitorStats;
use crate::sources::MonitoredSource;
use crate::store::EvidenceStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest payload excerpt kept on an observation.
const DETAIL_CHARS: usize = 200;

/// Timing and identifier settings shared by all workers.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub identifiers: Arc<Vec<IdentifierConfig>>,
    pub scan_interval: Duration,
    pub backoff: Duration,
    pub backoff_after_errors: u32,
    pub request_timeout: Duration,
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            identifiers: Arc::new(config.identifiers.clone()),
            scan_interval: Duration::from_secs(config.monitor.scan_interval_secs),
            backoff: Duration::from_secs(config.monitor.backoff_secs),
            backoff_after_errors: config.monitor.backoff_after_errors,
            request_timeout: config.request_timeout(),
        }
    }
}

/// Decides how long a worker sleeps after each search and each pass.
#[derive(Debug, Clone)]
pub struct Pacer {
    rate_delay: Duration,
    scan_interval: Duration,
    backoff: Duration,
    backoff_after_errors: u32,
    consecutive_errors: u32,
}

impl Pacer {
    pub fn new(rate_limit: f64, settings: &WorkerSettings) -> Self {
        // capabilities report their own rate, so clamp rather than trust it
        let longest = Duration::from_secs(MAX_DURATION_SECS);
        let rate_delay = Duration::try_from_secs_f64(1.0 / rate_limit)
            .map_or(longest, |delay| delay.min(longest));

        Self {
            rate_delay,
            scan_interval: settings.scan_interval,
            backoff: settings.backoff,
            backoff_after_errors: settings.backoff_after_errors,
            consecutive_errors: 0,
        }
    }

    /// Record the outcome of one search.
    pub fn record(&mut self, transport_failed: bool) {
        if transport_failed {
            self.consecutive_errors += 1;
        } else {
            self.consecutive_errors = 0;
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn is_backing_off(&self) -> bool {
        self.consecutive_errors >= self.backoff_after_errors
    }

    /// Delay before the next identifier. Never shorter than `1 / rate_limit`.
    pub fn after_poll(&self) -> Duration {
        if self.is_backing_off() {
            self.backoff.max(self.rate_delay)
        } else {
            self.rate_delay
        }
    }

    /// Delay before the next pass.
    pub fn after_pass(&self) -> Duration {
        if self.is_backing_off() {
            self.backoff
        } else {
            self.scan_interval
        }
    }
}

/// Polls one source until the run leaves `Running`.
pub struct SourceWorker {
    source: MonitoredSource,
    store: EvidenceStore,
    settings: WorkerSettings,
    stats: Arc<MonitorStats>,
    state: RunStateWatch,
}

impl SourceWorker {
    pub fn new(
        source: MonitoredSource,
        store: EvidenceStore,
        settings: WorkerSettings,
        stats: Arc<MonitorStats>,
        state: RunStateWatch,
    ) -> Self {
        Self {
            source,
            store,
            settings,
            stats,
            state,
        }
    }

    /// Run the poll loop. Only a storage failure ends it early.
    pub async fn run(mut self) -> Result<SourceReport, MonitorError> {
        let capability = Arc::clone(&self.source.capability);
        let identifiers = Arc::clone(&self.settings.identifiers);
        let mut pacer = Pacer::new(capability.rate_limit(), &self.settings);
        let mut report = SourceReport {
            source: capability.id().to_string(),
            name: capability.name().to_string(),
            passes_completed: 0,
            polls: 0,
            transport_errors: 0,
            status: SourceStatus::Active,
            last_check: None,
        };

        info!(
            "Starting continuous monitoring: {} ({} identifiers, {}/s, {} policy)",
            report.name,
            identifiers.len(),
            capability.rate_limit(),
            self.source.classifier.name()
        );

        'passes: while self.state.is_running() {
            for identifier in identifiers.iter() {
                if !self.state.is_running() {
                    break 'passes;
                }

                let transport_failed = match self.poll(identifier).await {
                    Ok(failed) => failed,
                    Err(e) => {
                        report.status = SourceStatus::Failed;
                        warn!(source = %report.source, "Stopping worker: {}", e);
                        return Err(MonitorError::Storage(e));
                    }
                };

                report.polls += 1;
                report.last_check = Some(Utc::now());
                if transport_failed {
                    report.transport_errors += 1;
                }
                pacer.record(transport_failed);

                if pacer.is_backing_off() {
                    report.status = SourceStatus::BackingOff;
                    warn!(
                        source = %report.source,
                        "{} consecutive failures, backing off for {:?}",
                        pacer.consecutive_errors(),
                        pacer.after_poll()
                    );
                } else {
                    report.status = SourceStatus::Active;
                }

                if !self.state.pause(pacer.after_poll()).await {
                    break 'passes;
                }
            }

            report.passes_completed += 1;
            self.stats.record_pass();
            debug!(
                source = %report.source,
                "Pass {} complete ({} polls, {} transport errors)",
                report.passes_completed,
                report.polls,
                report.transport_errors
            );

            if !self.state.pause(pacer.after_pass()).await {
                break;
            }
        }

        info!(
            "Stopped monitoring {} after {} passes",
            report.name, report.passes_completed
        );
        Ok(report)
    }

    /// Search one identifier and record every result.
    ///
    /// Returns whether the search failed at the transport level.
    async fn poll(&self, identifier: &IdentifierConfig) -> Result<bool, StoreError> {
        let capability = &self.source.capability;
        self.stats.record_poll();

        let search = capability.search(&identifier.id);
        let results = match tokio::time::timeout(self.settings.request_timeout, search).await {
            Ok(results) => results,
            Err(_) => vec![RawResult::error(format!(
                "request timed out after {:?}",
                self.settings.request_timeout
            ))],
        };

        let transport_failed =
            !results.is_empty() && results.iter().all(RawResult::is_transport_error);
        if transport_failed {
            self.stats.record_transport_error();
            warn!(
                source = capability.id(),
                identifier = %identifier.id,
                "Search failed: {}",
                results[0].payload
            );
        }

        if results.is_empty() {
            let verdict = self.source.classifier.classify_empty(identifier);
            let raw = RawResult::success(String::new());
            self.record(identifier, &raw, verdict.anomalous, verdict.classification)?;
            return Ok(false);
        }

        for raw in &results {
            let verdict = self.source.classifier.classify(identifier, raw);
            self.record(identifier, raw, verdict.anomalous, verdict.classification)?;
        }

        Ok(transport_failed)
    }

    fn record(
        &self,
        identifier: &IdentifierConfig,
        raw: &RawResult,
        anomalous: bool,
        classification: String,
    ) -> Result<(), StoreError> {
        let source = self.source.capability.id();
        let detail: String = raw.payload.chars().take(DETAIL_CHARS).collect();
        let observation = Observation {
            identifier: identifier.id.clone(),
            source: source.to_string(),
            anomalous,
            classification,
            observed_at: Utc::now(),
            fingerprint: fingerprint(&identifier.id, source, raw),
            detail: (!detail.is_empty()).then_some(detail),
        };

        if observation.anomalous {
            info!(
                source,
                identifier = %observation.identifier,
                classification = %observation.classification,
                fingerprint = observation.short_fingerprint(),
                "Anomaly recorded"
            );
        }

        self.store.append(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResponseClass;
    use crate::monitor::state::{RunState, RunStateController};
    use crate::store::ObservationFilter;
    use crate::testing::{identifiers, monitored, ScriptedSource};

    fn settings(ids: &[&str]) -> WorkerSettings {
        WorkerSettings {
            identifiers: Arc::new(identifiers(ids)),
            scan_interval: Duration::from_secs(30),
            backoff: Duration::from_secs(60),
            backoff_after_errors: 3,
            request_timeout: Duration::from_secs(10),
        }
    }

    fn spawn_worker(
        source: Arc<ScriptedSource>,
        store: &EvidenceStore,
        settings: WorkerSettings,
        controller: &RunStateController,
    ) -> tokio::task::JoinHandle<Result<SourceReport, MonitorError>> {
        let worker = SourceWorker::new(
            monitored(source),
            store.clone(),
            settings,
            Arc::new(MonitorStats::default()),
            controller.watch(),
        );
        tokio::spawn(worker.run())
    }

    #[test]
    fn test_pacer_backs_off_after_consecutive_errors() {
        let mut pacer = Pacer::new(10.0, &settings(&["A"]));
        assert_eq!(pacer.after_poll(), Duration::from_millis(100));
        assert_eq!(pacer.after_pass(), Duration::from_secs(30));

        pacer.record(true);
        pacer.record(true);
        assert!(!pacer.is_backing_off());
        assert_eq!(pacer.after_pass(), Duration::from_secs(30));

        pacer.record(true);
        assert!(pacer.is_backing_off());
        assert_eq!(pacer.after_poll(), Duration::from_secs(60));
        assert_eq!(pacer.after_pass(), Duration::from_secs(60));

        pacer.record(false);
        assert_eq!(pacer.consecutive_errors(), 0);
        assert_eq!(pacer.after_pass(), Duration::from_secs(30));
    }

    #[test]
    fn test_pacer_never_undercuts_rate_limit() {
        let mut short_backoff = settings(&["A"]);
        short_backoff.backoff = Duration::from_millis(10);
        let mut pacer = Pacer::new(0.5, &short_backoff);
        for _ in 0..3 {
            pacer.record(true);
        }
        assert_eq!(pacer.after_poll(), Duration::from_secs(2));
    }

    #[test]
    fn test_pacer_clamps_degenerate_rate_limits() {
        let longest = Duration::from_secs(MAX_DURATION_SECS);
        for rate in [1e-20, 0.0, -1.0, f64::NAN] {
            let pacer = Pacer::new(rate, &settings(&["A"]));
            assert_eq!(pacer.after_poll(), longest);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_respect_rate_limit_and_order() {
        let source = ScriptedSource::new("repo", 2.0, |id| vec![RawResult::success(id)]);
        let store = EvidenceStore::in_memory();
        let controller = RunStateController::new();
        controller.set(RunState::Running);

        let handle = spawn_worker(source.clone(), &store, settings(&["A", "B", "C"]), &controller);
        tokio::time::sleep(Duration::from_secs(95)).await;
        controller.set(RunState::Draining);
        let report = handle.await.unwrap().unwrap();

        let calls = source.calls();
        assert!(calls.len() >= 6);
        for pair in calls.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(500));
        }
        let order: Vec<&str> = calls.iter().take(6).map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C", "A", "B", "C"]);
        assert!(report.passes_completed >= 2);
        assert_eq!(report.polls as usize, calls.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_errors_trigger_backoff() {
        let source = ScriptedSource::new("flaky", 10.0, |_| vec![RawResult::error("connection reset")]);
        let store = EvidenceStore::in_memory();
        let controller = RunStateController::new();
        controller.set(RunState::Running);

        let handle = spawn_worker(
            source.clone(),
            &store,
            settings(&["A", "B", "C", "D", "E"]),
            &controller,
        );
        tokio::time::sleep(Duration::from_secs(61)).await;
        controller.set(RunState::Draining);
        let report = handle.await.unwrap().unwrap();

        let calls = source.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[1].1 - calls[0].1 < Duration::from_secs(1));
        assert!(calls[3].1 - calls[2].1 >= Duration::from_secs(60));
        assert_eq!(report.transport_errors, 4);

        let recorded = store.query(&ObservationFilter::all()).unwrap();
        assert_eq!(recorded.len(), 4);
        assert!(recorded
            .iter()
            .all(|o| o.anomalous && o.classification == "error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_reach_shared_stats() {
        let source = ScriptedSource::new("flaky", 10.0, |_| vec![RawResult::error("refused")]);
        let store = EvidenceStore::in_memory();
        let stats = Arc::new(MonitorStats::default());
        let controller = RunStateController::new();
        controller.set(RunState::Running);

        let worker = SourceWorker::new(
            monitored(source),
            store,
            settings(&["A"]),
            Arc::clone(&stats),
            controller.watch(),
        );
        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.set(RunState::Draining);
        let report = handle.await.unwrap().unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.polls, 1);
        assert_eq!(snapshot.transport_errors, 1);
        assert_eq!(snapshot.transport_errors, report.transport_errors);
    }

    #[tokio::test(start_paused = true)]
    async fn test_draining_stops_new_polls() {
        let source = ScriptedSource::new("repo", 10.0, |id| vec![RawResult::success(id)]);
        let store = EvidenceStore::in_memory();
        let controller = RunStateController::new();
        controller.set(RunState::Running);

        let handle = spawn_worker(source.clone(), &store, settings(&["A", "B"]), &controller);
        // first pass done, worker is in its 30s inter-scan pause
        tokio::time::sleep(Duration::from_secs(5)).await;
        let drained_at = tokio::time::Instant::now();
        controller.set(RunState::Draining);

        let report = tokio::time::timeout(Duration::from_secs(30), handle)
            .await
            .expect("worker should exit within one scan interval")
            .unwrap()
            .unwrap();

        assert_eq!(report.passes_completed, 1);
        assert!(source.calls().iter().all(|(_, at)| *at < drained_at));
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_are_classified_and_recorded() {
        let source = ScriptedSource::new("repo", 10.0, |id| match id {
            "A" => vec![RawResult::success("record A1"), RawResult::success("other")],
            "B" => vec![RawResult {
                class: ResponseClass::Restricted,
                status_code: Some(403),
                payload: "denied".to_string(),
                hint: None,
            }],
            _ => vec![],
        });
        let store = EvidenceStore::in_memory();
        let controller = RunStateController::new();
        controller.set(RunState::Running);

        let handle = spawn_worker(source, &store, settings(&["A", "B", "C"]), &controller);
        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.set(RunState::Draining);
        handle.await.unwrap().unwrap();

        let a = store.query(&ObservationFilter::pair("A", "repo")).unwrap();
        assert_eq!(a.len(), 2);
        assert!(!a[0].anomalous);
        assert_eq!(a[0].classification, "found");
        assert!(a[1].anomalous);
        assert_eq!(a[1].classification, "not_found");

        let b = store.query(&ObservationFilter::pair("B", "repo")).unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].classification, "restricted");
        assert_eq!(b[0].detail.as_deref(), Some("denied"));

        let c = store.query(&ObservationFilter::pair("C", "repo")).unwrap();
        assert_eq!(c.len(), 1);
        assert!(c[0].anomalous);
        assert_eq!(c[0].classification, "not_found");
        assert_eq!(c[0].fingerprint.len(), 64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_failure_stops_worker() {
        let source = ScriptedSource::new("repo", 10.0, |id| vec![RawResult::success(id)]);
        let store = EvidenceStore::in_memory();
        store.close();
        let controller = RunStateController::new();
        controller.set(RunState::Running);

        let handle = spawn_worker(source.clone(), &store, settings(&["A", "B"]), &controller);
        let result = handle.await.unwrap();

        assert!(matches!(result, Err(MonitorError::Storage(StoreError::Closed))));
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_search_times_out() {
        struct Hanging;

        #[async_trait::async_trait]
        impl crate::sources::SourceCapability for Hanging {
            fn id(&self) -> &str {
                "hung"
            }

            fn rate_limit(&self) -> f64 {
                1.0
            }

            async fn search(&self, _identifier: &str) -> Vec<RawResult> {
                std::future::pending::<()>().await;
                Vec::new()
            }
        }

        let store = EvidenceStore::in_memory();
        let controller = RunStateController::new();
        controller.set(RunState::Running);
        let worker = SourceWorker::new(
            MonitoredSource {
                capability: Arc::new(Hanging),
                classifier: crate::classify::classifier_for(Default::default()),
            },
            store.clone(),
            settings(&["A"]),
            Arc::new(MonitorStats::default()),
            controller.watch(),
        );
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_secs(11)).await;
        controller.set(RunState::Draining);
        let report = handle.await.unwrap().unwrap();

        assert_eq!(report.transport_errors, 1);
        let recorded = store.query(&ObservationFilter::all()).unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].classification, "error");
    }
}
