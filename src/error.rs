//! Error types shared across the monitor.

use thiserror::Error;

/// Errors raised by the evidence store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("evidence log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("evidence record could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("corrupt evidence log line {line}: {message}")]
    Corrupt { line: usize, message: String },

    #[error("evidence store lock poisoned")]
    Poisoned,

    #[error("evidence store is closed after an earlier write failure")]
    Closed,
}

/// Invalid static configuration. Always fatal at startup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no sources configured")]
    NoSources,

    #[error("no identifiers configured")]
    NoIdentifiers,

    #[error("duplicate source id '{0}'")]
    DuplicateSource(String),

    #[error("duplicate identifier '{0}'")]
    DuplicateIdentifier(String),

    #[error("identifier ids must not be empty")]
    EmptyIdentifier,

    #[error("source '{source_id}' has invalid rate limit {rate_limit} (must be at least one request per day)")]
    InvalidRateLimit { source_id: String, rate_limit: f64 },

    #[error("source '{source_id}' url must start with http:// or https:// and contain '{{identifier}}'")]
    InvalidUrl { source_id: String },

    #[error("alert threshold {0} must be within (0, 1]")]
    InvalidThreshold(f64),

    #[error("{0} must be at least 1 second")]
    ZeroDuration(&'static str),

    #[error("{name} must be at most {max} seconds")]
    DurationTooLong { name: &'static str, max: u64 },

    #[error("drain_timeout_secs ({drain}) must be at least request_timeout_secs ({request})")]
    DrainShorterThanRequest { drain: u64, request: u64 },

    #[error("backoff_after_errors must be at least 1")]
    ZeroBackoffTrigger,
}

/// Failures that escalate to the orchestrator.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("failed to write report output: {0}")]
    Report(String),

    #[error("task '{task}' failed: {message}")]
    TaskFailed { task: String, message: String },
}
