//! Data models for the monitor.
//!
//! This module contains the core data structures shared by the workers,
//! the evidence store, the aggregation loop, and the report writers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse outcome class of a single source response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseClass {
    /// The source answered normally.
    Success,
    /// Access denied or otherwise restricted (401/403/451).
    Restricted,
    /// The source throttled the request (429).
    RateLimited,
    /// Transport failure, unexpected status, or unparseable payload.
    Error,
}

impl ResponseClass {
    /// Map an HTTP status code to a response class.
    pub fn from_status(code: u16) -> Self {
        match code {
            200..=299 => ResponseClass::Success,
            401 | 403 | 451 => ResponseClass::Restricted,
            429 => ResponseClass::RateLimited,
            _ => ResponseClass::Error,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseClass::Success)
    }
}

impl fmt::Display for ResponseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseClass::Success => write!(f, "success"),
            ResponseClass::Restricted => write!(f, "restricted"),
            ResponseClass::RateLimited => write!(f, "rate_limited"),
            ResponseClass::Error => write!(f, "error"),
        }
    }
}

/// Hint attached by a source when the payload itself signals withheld data.
pub const HINT_WITHHELD: &str = "withheld";

/// One raw result returned by a source for one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    /// Outcome class of the response.
    pub class: ResponseClass,
    /// HTTP status code, when the source speaks HTTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Response body (or error text for transport failures).
    pub payload: String,
    /// Source-side classification hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl RawResult {
    /// A successful result carrying a payload.
    pub fn success(payload: impl Into<String>) -> Self {
        Self {
            class: ResponseClass::Success,
            status_code: Some(200),
            payload: payload.into(),
            hint: None,
        }
    }

    /// A transport-level failure.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            class: ResponseClass::Error,
            status_code: None,
            payload: message.into(),
            hint: None,
        }
    }

    /// Whether this result represents a transport/source failure.
    pub fn is_transport_error(&self) -> bool {
        self.class == ResponseClass::Error
    }
}

/// One recorded poll result. Immutable once appended to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Tracked identifier.
    pub identifier: String,
    /// Source id.
    pub source: String,
    /// Whether this observation indicates restricted/missing/reclassified data.
    pub anomalous: bool,
    /// Status label ("found", "restricted", "error", "not_found", ...).
    pub classification: String,
    /// When the result was observed.
    pub observed_at: DateTime<Utc>,
    /// Deterministic digest of the raw result.
    pub fingerprint: String,
    /// Short excerpt of the payload or error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Observation {
    /// Shortened fingerprint for log lines.
    pub fn short_fingerprint(&self) -> &str {
        let end = self.fingerprint.len().min(16);
        &self.fingerprint[..end]
    }
}

/// Anomaly rate for one (identifier, source) group over a window.
///
/// Not persisted; consumed by the alerter and discarded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResult {
    pub identifier: String,
    pub source: String,
    pub total_count: usize,
    pub anomalous_count: usize,
}

impl AggregationResult {
    /// The anomaly rate, or `None` when the window holds no data.
    pub fn rate(&self) -> Option<f64> {
        if self.total_count == 0 {
            None
        } else {
            Some(self.anomalous_count as f64 / self.total_count as f64)
        }
    }
}

/// An alert raised when a group's rate exceeds the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub identifier: String,
    pub source: String,
    pub rate: f64,
    pub total_count: usize,
    pub anomalous_count: usize,
    pub raised_at: DateTime<Utc>,
}

/// Frozen snapshot of all observations for one (identifier, source) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidencePackage {
    pub created_at: DateTime<Utc>,
    pub identifier: String,
    pub source: String,
    /// Rate that triggered the package.
    pub trigger_rate: f64,
    pub observations: Vec<Observation>,
}

/// Last known condition of a source worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Polling normally.
    Active,
    /// Sleeping out a backoff after repeated transport failures.
    BackingOff,
    /// Stopped by a storage failure or aborted while draining.
    Failed,
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Active => write!(f, "active"),
            SourceStatus::BackingOff => write!(f, "backing_off"),
            SourceStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Per-source activity reported by a worker when it exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: String,
    pub name: String,
    pub passes_completed: u64,
    pub polls: u64,
    pub transport_errors: u64,
    pub status: SourceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

/// Run-wide counts for one (identifier, source) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairSummary {
    pub identifier: String,
    pub source: String,
    pub total: usize,
    pub anomalous: usize,
}

/// Why the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every task exited on its own.
    Completed,
    /// The run-duration bound expired.
    TimedOut,
    /// A storage or task failure ended the run early.
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::TimedOut => write!(f, "timed out"),
            RunOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal per-run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub outcome: RunOutcome,
    pub pairs: Vec<PairSummary>,
    pub sources: Vec<SourceReport>,
    pub alerts: Vec<Alert>,
    pub packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    /// Total observations recorded during the run.
    pub fn total_observations(&self) -> usize {
        self.pairs.iter().map(|p| p.total).sum()
    }

    /// Total anomalous observations recorded during the run.
    pub fn total_anomalous(&self) -> usize {
        self.pairs.iter().map(|p| p.anomalous).sum()
    }
}
