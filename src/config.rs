//! Configuration file handling.
//!
//! This module handles loading, merging, and validating configuration from
//! `.markerwatch.toml` files.

use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = ".markerwatch.toml";

/// Slowest accepted source pace: one request per day.
pub const MIN_RATE_LIMIT: f64 = 1.0 / 86_400.0;

/// Upper bound for every `*_secs` setting (one year).
pub const MAX_DURATION_SECS: u64 = 365 * 86_400;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Worker pacing and run bounds.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Aggregation and alerting.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Tracked identifiers, polled in this order.
    #[serde(default)]
    pub identifiers: Vec<IdentifierConfig>,

    /// Configured repositories.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            monitor: MonitorConfig::default(),
            analysis: AnalysisConfig::default(),
            identifiers: vec![IdentifierConfig {
                id: "rs4988235".to_string(),
                related: vec!["lactase".to_string(), "LCT".to_string()],
            }],
            sources: vec![SourceConfig {
                id: "ncbi_sra".to_string(),
                name: "NCBI Sequence Read Archive".to_string(),
                url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi?db=sra&retmode=xml&term={identifier}".to_string(),
                rate_limit: 3.0,
                format: PayloadFormat::Text,
                classifier: ClassifierKind::Presence,
                absent_markers: vec!["<PhraseNotFound>".to_string()],
            }],
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory for the evidence log, packages, alerts, and reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            verbose: false,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("markerwatch-output")
}

/// Worker pacing and run bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Pause between full passes over all identifiers.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Pause used instead of the normal delays after repeated failures.
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,

    /// Consecutive transport failures that trigger the backoff.
    #[serde(default = "default_backoff_after_errors")]
    pub backoff_after_errors: u32,

    /// Global wall-clock bound for the run.
    #[serde(default = "default_run_duration")]
    pub run_duration_secs: u64,

    /// Per-request timeout for every source call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long to wait for tasks to exit once draining starts.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            backoff_secs: default_backoff(),
            backoff_after_errors: default_backoff_after_errors(),
            run_duration_secs: default_run_duration(),
            request_timeout_secs: default_request_timeout(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

fn default_scan_interval() -> u64 {
    30
}

fn default_backoff() -> u64 {
    60
}

fn default_backoff_after_errors() -> u32 {
    3
}

fn default_run_duration() -> u64 {
    2700 // 45 min
}

fn default_request_timeout() -> u64 {
    20
}

fn default_drain_timeout() -> u64 {
    30
}

/// Aggregation and alerting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Trailing window the anomaly rate is computed over.
    #[serde(default = "default_window")]
    pub window_secs: u64,

    /// Pause between aggregation cycles.
    #[serde(default = "default_analysis_interval")]
    pub interval_secs: u64,

    /// Rate above which an alert fires.
    #[serde(default = "default_threshold")]
    pub alert_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window(),
            interval_secs: default_analysis_interval(),
            alert_threshold: default_threshold(),
        }
    }
}

fn default_window() -> u64 {
    3600
}

fn default_analysis_interval() -> u64 {
    60
}

fn default_threshold() -> f64 {
    0.75
}

/// A tracked identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierConfig {
    /// The marker searched for.
    pub id: String,

    /// Keywords whose presence implies the identifier should be present too.
    #[serde(default)]
    pub related: Vec<String>,
}

/// How a source's response body is split into results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// The whole body is one result.
    #[default]
    Text,
    /// The body is a JSON array; each element is one result.
    JsonRecords,
}

/// Anomaly policy applied to a source's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Only non-success responses and withheld hints are anomalous.
    Status,
    /// A successful payload that lacks the identifier is anomalous.
    #[default]
    Presence,
    /// A payload mentioning a related keyword but not the identifier is anomalous.
    Context,
}

/// One configured repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stable id recorded on every observation.
    pub id: String,

    /// Human-readable name.
    #[serde(default)]
    pub name: String,

    /// Request URL template; `{identifier}` is replaced per poll.
    pub url: String,

    /// Requests per second.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: f64,

    #[serde(default)]
    pub format: PayloadFormat,

    #[serde(default)]
    pub classifier: ClassifierKind,

    /// Payload substrings that mark the identifier as withheld.
    #[serde(default)]
    pub absent_markers: Vec<String>,
}

fn default_rate_limit() -> f64 {
    1.0
}

impl SourceConfig {
    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were explicitly provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(duration) = args.duration {
            self.monitor.run_duration_secs = duration;
        }
        if let Some(ref dir) = args.output_dir {
            self.general.output_dir = dir.clone();
        }
        if let Some(threshold) = args.threshold {
            self.analysis.alert_threshold = threshold;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Check every invariant the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        if self.identifiers.is_empty() {
            return Err(ConfigError::NoIdentifiers);
        }

        let mut seen = HashSet::new();
        for identifier in &self.identifiers {
            if identifier.id.trim().is_empty() {
                return Err(ConfigError::EmptyIdentifier);
            }
            if !seen.insert(identifier.id.as_str()) {
                return Err(ConfigError::DuplicateIdentifier(identifier.id.clone()));
            }
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::DuplicateSource(source.id.clone()));
            }
            if !(source.rate_limit.is_finite() && source.rate_limit >= MIN_RATE_LIMIT) {
                return Err(ConfigError::InvalidRateLimit {
                    source_id: source.id.clone(),
                    rate_limit: source.rate_limit,
                });
            }
            let scheme_ok =
                source.url.starts_with("http://") || source.url.starts_with("https://");
            if !scheme_ok || !source.url.contains("{identifier}") {
                return Err(ConfigError::InvalidUrl {
                    source_id: source.id.clone(),
                });
            }
        }

        let threshold = self.analysis.alert_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }

        let durations = [
            ("scan_interval_secs", self.monitor.scan_interval_secs),
            ("backoff_secs", self.monitor.backoff_secs),
            ("run_duration_secs", self.monitor.run_duration_secs),
            ("request_timeout_secs", self.monitor.request_timeout_secs),
            ("drain_timeout_secs", self.monitor.drain_timeout_secs),
            ("window_secs", self.analysis.window_secs),
            ("interval_secs", self.analysis.interval_secs),
        ];
        for (name, secs) in durations {
            if secs == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::DurationTooLong {
                    name,
                    max: MAX_DURATION_SECS,
                });
            }
        }

        // A worker blocked on its last request must be able to report back
        // before the drain deadline aborts it.
        if self.monitor.drain_timeout_secs < self.monitor.request_timeout_secs {
            return Err(ConfigError::DrainShorterThanRequest {
                drain: self.monitor.drain_timeout_secs,
                request: self.monitor.request_timeout_secs,
            });
        }

        if self.monitor.backoff_after_errors == 0 {
            return Err(ConfigError::ZeroBackoffTrigger);
        }

        Ok(())
    }

    pub fn run_duration(&self) -> Duration {
        Duration::from_secs(self.monitor.run_duration_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor.drain_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor.request_timeout_secs)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
