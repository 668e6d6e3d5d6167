//! Append-only evidence store.
//!
//! Observations are kept in an in-memory index and, when opened on a path,
//! mirrored to a JSON Lines log that is replayed on the next open. The store
//! synchronizes internally; callers never take locks themselves.

use crate::error::StoreError;
use crate::models::Observation;
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Selects observations by identifier, source, and start time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationFilter {
    pub identifier: Option<String>,
    pub source: Option<String>,
    /// Inclusive lower bound on `observed_at`.
    pub since: Option<DateTime<Utc>>,
}

impl ObservationFilter {
    /// Matches everything.
    #[cfg(test)]
    pub fn all() -> Self {
        Self::default()
    }

    /// Everything observed at or after `since`.
    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            ..Self::default()
        }
    }

    /// Every observation for one (identifier, source) pair.
    pub fn pair(identifier: &str, source: &str) -> Self {
        Self {
            identifier: Some(identifier.to_string()),
            source: Some(source.to_string()),
            since: None,
        }
    }

    fn matches(&self, obs: &Observation) -> bool {
        self.identifier
            .as_deref()
            .map_or(true, |id| obs.identifier == id)
            && self.source.as_deref().map_or(true, |s| obs.source == s)
            && self.since.map_or(true, |t| obs.observed_at >= t)
    }
}

/// Running totals over everything the store holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreTotals {
    pub observations: u64,
    pub anomalous: u64,
}

#[derive(Debug, Default)]
struct Inner {
    records: Vec<Observation>,
    totals: StoreTotals,
    log: Option<File>,
    closed: bool,
}

/// Thread-safe, cloneable handle to the evidence log.
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    inner: Arc<RwLock<Inner>>,
    path: Option<PathBuf>,
}

impl EvidenceStore {
    /// A store with no backing file.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            path: None,
        }
    }

    /// Open (or create) a JSON Lines evidence log, replaying existing records.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut inner = Inner::default();

        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for (index, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let obs: Observation =
                    serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
                        line: index + 1,
                        message: e.to_string(),
                    })?;
                inner.totals.observations += 1;
                if obs.anomalous {
                    inner.totals.anomalous += 1;
                }
                inner.records.push(obs);
            }
            info!(
                "Replayed {} observations from {}",
                inner.records.len(),
                path.display()
            );
        }

        inner.log = Some(OpenOptions::new().create(true).append(true).open(path)?);

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Path of the backing log, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one observation.
    ///
    /// The record is synced to disk before this returns. A write failure closes the
    /// store; every later append fails with [`StoreError::Closed`].
    pub fn append(&self, obs: Observation) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        if inner.closed {
            return Err(StoreError::Closed);
        }

        if let Some(log) = inner.log.as_mut() {
            let written = serde_json::to_string(&obs)
                .map_err(StoreError::from)
                .and_then(|line| {
                    writeln!(log, "{line}")?;
                    log.sync_data()?;
                    Ok(())
                });
            if let Err(e) = written {
                inner.closed = true;
                return Err(e);
            }
        }

        debug!(
            identifier = %obs.identifier,
            source = %obs.source,
            classification = %obs.classification,
            fingerprint = obs.short_fingerprint(),
            "observation recorded"
        );

        inner.totals.observations += 1;
        if obs.anomalous {
            inner.totals.anomalous += 1;
        }
        inner.records.push(obs);
        Ok(())
    }

    /// Matching observations ordered by `observed_at`, insertion order on ties.
    pub fn query(&self, filter: &ObservationFilter) -> Result<Vec<Observation>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let mut matched: Vec<Observation> = inner
            .records
            .iter()
            .filter(|obs| filter.matches(obs))
            .cloned()
            .collect();
        // sort_by_key is stable, which preserves insertion order on ties
        matched.sort_by_key(|obs| obs.observed_at);
        Ok(matched)
    }

    pub fn totals(&self) -> Result<StoreTotals, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.totals)
    }

    /// Stop accepting writes.
    pub fn close(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.closed = true;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().map(|inner| inner.closed).unwrap_or(true)
    }
}
