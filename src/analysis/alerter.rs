//! Threshold alerting and evidence packaging.
//!
//! Every alert lands in two places: a line in the alert log and a fresh
//! evidence package. Failing to write either is a [`MonitorError::Report`]
//! and ends the run, so an alert is never counted without its records.

use crate::error::MonitorError;
use crate::models::{AggregationResult, Alert, EvidencePackage};
use crate::monitor::stats::MonitorStats;
use crate::report::{AlertLog, PackageWriter};
use crate::store::{EvidenceStore, ObservationFilter};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// The rate that should raise an alert, if any.
///
/// Groups without data never alert.
pub fn alert_rate(result: &AggregationResult, threshold: f64) -> Option<f64> {
    result.rate().filter(|rate| *rate > threshold)
}

/// What the alerter produced during the run.
#[derive(Debug, Clone, Default)]
pub struct AlerterReport {
    pub alerts: Vec<Alert>,
    pub packages: Vec<PathBuf>,
}

/// Consumes aggregation results until the aggregator closes the channel.
pub struct Alerter {
    store: EvidenceStore,
    threshold: f64,
    packages: PackageWriter,
    alert_log: AlertLog,
    stats: Arc<MonitorStats>,
    results: mpsc::Receiver<AggregationResult>,
    report: AlerterReport,
}

impl Alerter {
    pub fn new(
        store: EvidenceStore,
        threshold: f64,
        packages: PackageWriter,
        alert_log: AlertLog,
        stats: Arc<MonitorStats>,
        results: mpsc::Receiver<AggregationResult>,
    ) -> Self {
        Self {
            store,
            threshold,
            packages,
            alert_log,
            stats,
            results,
            report: AlerterReport::default(),
        }
    }

    pub async fn run(mut self) -> Result<AlerterReport, MonitorError> {
        info!(
            "Alerting above {:.0}% anomaly rate, packages in {}",
            self.threshold * 100.0,
            self.packages.dir().display()
        );

        while let Some(result) = self.results.recv().await {
            self.handle(&result)?;
        }

        Ok(self.report)
    }

    /// Evaluate one aggregation result, raising an alert and writing a
    /// package when the threshold is crossed.
    pub fn handle(&mut self, result: &AggregationResult) -> Result<Option<Alert>, MonitorError> {
        let Some(rate) = alert_rate(result, self.threshold) else {
            return Ok(None);
        };

        let alert = Alert {
            identifier: result.identifier.clone(),
            source: result.source.clone(),
            rate,
            total_count: result.total_count,
            anomalous_count: result.anomalous_count,
            raised_at: Utc::now(),
        };

        warn!(
            identifier = %alert.identifier,
            source = %alert.source,
            rate,
            "High anomaly rate: {:.1}% ({}/{})",
            rate * 100.0,
            alert.anomalous_count,
            alert.total_count
        );
        self.alert_log
            .append(&alert)
            .map_err(|e| MonitorError::Report(format!("{e:#}")))?;
        self.stats.record_alert();

        let path = self.generate_evidence_package(&alert.identifier, &alert.source, rate)?;
        self.report.packages.push(path);
        self.report.alerts.push(alert.clone());

        Ok(Some(alert))
    }

    /// Snapshot every observation for the pair into a new package file.
    pub fn generate_evidence_package(
        &self,
        identifier: &str,
        source: &str,
        rate: f64,
    ) -> Result<PathBuf, MonitorError> {
        let observations = self.store.query(&ObservationFilter::pair(identifier, source))?;
        let package = EvidencePackage {
            created_at: Utc::now(),
            identifier: identifier.to_string(),
            source: source.to_string(),
            trigger_rate: rate,
            observations,
        };

        let path = self
            .packages
            .write(&package)
            .map_err(|e| MonitorError::Report(format!("{e:#}")))?;
        self.stats.record_package();

        info!(
            path = %path.display(),
            "Evidence package created ({} observations)",
            package.observations.len()
        );
        Ok(path)
    }
}
