//! Windowed anomaly-rate aggregation.
//!
//! This module groups observations by (identifier, source), computes the
//! anomaly rate over the trailing window, and feeds the results to the
//! alerter on a fixed cadence.

use crate::error::{MonitorError, StoreError};
use crate::models::{AggregationResult, Observation, PairSummary};
use crate::monitor::state::RunStateWatch;
use crate::monitor::stats::MonitorStats;
use crate::store::{EvidenceStore, ObservationFilter};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Group observations by (identifier, source) and count anomalies.
///
/// Results are ordered by identifier, then source. Every emitted group has
/// at least one observation.
pub fn aggregate(observations: &[Observation]) -> Vec<AggregationResult> {
    let mut grouped: BTreeMap<(&str, &str), (usize, usize)> = BTreeMap::new();

    for obs in observations {
        let counts = grouped
            .entry((obs.identifier.as_str(), obs.source.as_str()))
            .or_default();
        counts.0 += 1;
        if obs.anomalous {
            counts.1 += 1;
        }
    }

    grouped
        .into_iter()
        .map(|((identifier, source), (total, anomalous))| AggregationResult {
            identifier: identifier.to_string(),
            source: source.to_string(),
            total_count: total,
            anomalous_count: anomalous,
        })
        .collect()
}

/// Run-wide counts per (identifier, source) pair.
pub fn summarize_pairs(observations: &[Observation]) -> Vec<PairSummary> {
    aggregate(observations)
        .into_iter()
        .map(|result| PairSummary {
            identifier: result.identifier,
            source: result.source,
            total: result.total_count,
            anomalous: result.anomalous_count,
        })
        .collect()
}

/// Periodic aggregation loop.
pub struct Aggregator {
    store: EvidenceStore,
    window: Duration,
    interval: Duration,
    stats: Arc<MonitorStats>,
    results: mpsc::Sender<AggregationResult>,
    state: RunStateWatch,
}

impl Aggregator {
    pub fn new(
        store: EvidenceStore,
        window: Duration,
        interval: Duration,
        stats: Arc<MonitorStats>,
        results: mpsc::Sender<AggregationResult>,
        state: RunStateWatch,
    ) -> Self {
        Self {
            store,
            window,
            interval,
            stats,
            results,
            state,
        }
    }

    /// Aggregate the current trailing window.
    pub fn cycle(&self) -> Result<Vec<AggregationResult>, StoreError> {
        // a window reaching past chrono's range covers everything stored
        let since = chrono::Duration::from_std(self.window)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let observations = self.store.query(&ObservationFilter::since(since))?;
        Ok(aggregate(&observations))
    }

    /// Run until the run stops, then aggregate once more and close the
    /// alerter's channel by dropping the sender.
    pub async fn run(mut self) -> Result<(), MonitorError> {
        info!(
            "Aggregating every {:?} over a {}s window",
            self.interval,
            self.window.as_secs()
        );

        while self.state.pause(self.interval).await {
            self.emit().await?;
        }

        debug!("Final aggregation cycle");
        self.emit().await?;
        Ok(())
    }

    async fn emit(&self) -> Result<(), MonitorError> {
        let results = self.cycle()?;
        let groups = results.len();

        for result in results {
            if self.results.send(result).await.is_err() {
                warn!("Alerter is gone; dropping aggregation results");
                break;
            }
        }

        self.log_statistics(groups)?;
        Ok(())
    }

    fn log_statistics(&self, groups: usize) -> Result<(), StoreError> {
        let totals = self.store.totals()?;
        let stats = self.stats.snapshot();
        info!(
            "Stats => groups: {} | passes: {} | polls: {} | transport errors: {} | observations: {} | anomalies: {} | alerts: {} | packages: {}",
            groups,
            stats.passes_completed,
            stats.polls,
            stats.transport_errors,
            totals.observations,
            totals.anomalous,
            stats.alerts_raised,
            stats.packages_generated
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::state::{RunState, RunStateController};

    fn obs(identifier: &str, source: &str, anomalous: bool, at: DateTime<Utc>) -> Observation {
        Observation {
            identifier: identifier.to_string(),
            source: source.to_string(),
            anomalous,
            classification: "test".to_string(),
            observed_at: at,
            fingerprint: String::new(),
            detail: None,
        }
    }

    #[test]
    fn test_aggregate_groups_by_pair() {
        let now = Utc::now();
        let observations = vec![
            obs("X", "Y", true, now),
            obs("X", "Y", false, now),
            obs("X", "Z", true, now),
            obs("A", "Y", false, now),
            obs("X", "Y", true, now),
        ];

        let results = aggregate(&observations);
        assert_eq!(results.len(), 3);

        assert_eq!(results[0].identifier, "A");
        assert_eq!(results[0].rate(), Some(0.0));

        let xy = &results[1];
        assert_eq!((xy.identifier.as_str(), xy.source.as_str()), ("X", "Y"));
        assert_eq!(xy.total_count, 3);
        assert_eq!(xy.anomalous_count, 2);

        for result in &results {
            assert!(result.anomalous_count <= result.total_count);
            assert!(result.total_count > 0);
        }
    }

    #[test]
    fn test_aggregate_empty_window_emits_nothing() {
        assert!(aggregate(&[]).is_empty());
        assert!(summarize_pairs(&[]).is_empty());
    }

    #[test]
    fn test_cycle_only_sees_trailing_window() {
        let store = EvidenceStore::in_memory();
        let now = Utc::now();
        store
            .append(obs("X", "Y", true, now - chrono::Duration::hours(2)))
            .unwrap();
        store.append(obs("X", "Y", false, now)).unwrap();

        let controller = RunStateController::new();
        let (tx, _rx) = mpsc::channel(8);
        let aggregator = Aggregator::new(
            store,
            Duration::from_secs(3600),
            Duration::from_secs(60),
            Arc::new(MonitorStats::default()),
            tx,
            controller.watch(),
        );

        let results = aggregator.cycle().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].total_count, 1);
        assert_eq!(results[0].anomalous_count, 0);
    }

    #[test]
    fn test_cycle_with_oversized_window_sees_everything() {
        let store = EvidenceStore::in_memory();
        let now = Utc::now();
        store
            .append(obs("X", "Y", true, now - chrono::Duration::days(400)))
            .unwrap();
        store.append(obs("X", "Y", true, now)).unwrap();

        let controller = RunStateController::new();
        for window in [u64::MAX, 20_000_000_000_000] {
            let (tx, _rx) = mpsc::channel(8);
            let aggregator = Aggregator::new(
                store.clone(),
                Duration::from_secs(window),
                Duration::from_secs(60),
                Arc::new(MonitorStats::default()),
                tx,
                controller.watch(),
            );

            let results = aggregator.cycle().unwrap();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].total_count, 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_emits_and_flushes_on_drain() {
        let store = EvidenceStore::in_memory();
        store.append(obs("X", "Y", true, Utc::now())).unwrap();

        let controller = RunStateController::new();
        controller.set(RunState::Running);
        let (tx, mut rx) = mpsc::channel(8);
        let aggregator = Aggregator::new(
            store,
            Duration::from_secs(3600),
            Duration::from_secs(60),
            Arc::new(MonitorStats::default()),
            tx,
            controller.watch(),
        );
        let handle = tokio::spawn(aggregator.run());

        tokio::time::sleep(Duration::from_secs(61)).await;
        let first = rx.recv().await.unwrap();
        assert_eq!(first.rate(), Some(1.0));

        controller.set(RunState::Draining);
        handle.await.unwrap().unwrap();

        // final cycle result, then the channel closes
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
