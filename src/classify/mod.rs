//! Anomaly classification policies.
//!
//! A classifier decides whether one raw result indicates restricted,
//! missing, or reclassified data. Each source is configured with one policy.

use crate::config::{ClassifierKind, IdentifierConfig};
use crate::models::{RawResult, HINT_WITHHELD};
use std::sync::Arc;

/// Outcome of classifying one raw result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub anomalous: bool,
    pub classification: String,
}

impl Verdict {
    pub fn normal(classification: &str) -> Self {
        Self {
            anomalous: false,
            classification: classification.to_string(),
        }
    }

    pub fn anomaly(classification: &str) -> Self {
        Self {
            anomalous: true,
            classification: classification.to_string(),
        }
    }
}

/// Pluggable per-source anomaly predicate.
pub trait AnomalyClassifier: Send + Sync {
    /// Policy name for logs.
    fn name(&self) -> &'static str;

    /// Classify a single raw result.
    fn classify(&self, identifier: &IdentifierConfig, raw: &RawResult) -> Verdict;

    /// Verdict for a search that returned no results at all.
    fn classify_empty(&self, _identifier: &IdentifierConfig) -> Verdict {
        Verdict::anomaly("not_found")
    }
}

/// Build the classifier for a configured policy.
pub fn classifier_for(kind: ClassifierKind) -> Arc<dyn AnomalyClassifier> {
    match kind {
        ClassifierKind::Status => Arc::new(StatusClassifier),
        ClassifierKind::Presence => Arc::new(PresenceClassifier),
        ClassifierKind::Context => Arc::new(ContextClassifier),
    }
}

/// Verdict shared by every policy for failed or withheld responses.
fn response_verdict(raw: &RawResult) -> Option<Verdict> {
    if !raw.class.is_success() {
        return Some(Verdict::anomaly(&raw.class.to_string()));
    }
    if raw.hint.as_deref() == Some(HINT_WITHHELD) {
        return Some(Verdict::anomaly(HINT_WITHHELD));
    }
    None
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    !needle.is_empty() && haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Anomalous only when the source itself reports a problem.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusClassifier;

impl AnomalyClassifier for StatusClassifier {
    fn name(&self) -> &'static str {
        "status"
    }

    fn classify(&self, identifier: &IdentifierConfig, raw: &RawResult) -> Verdict {
        if let Some(verdict) = response_verdict(raw) {
            return verdict;
        }
        if contains_ignore_case(&raw.payload, &identifier.id) {
            Verdict::normal("found")
        } else {
            Verdict::normal("no_match")
        }
    }

    fn classify_empty(&self, _identifier: &IdentifierConfig) -> Verdict {
        Verdict::normal("empty")
    }
}

/// A successful payload must mention the identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresenceClassifier;

impl AnomalyClassifier for PresenceClassifier {
    fn name(&self) -> &'static str {
        "presence"
    }

    fn classify(&self, identifier: &IdentifierConfig, raw: &RawResult) -> Verdict {
        if let Some(verdict) = response_verdict(raw) {
            return verdict;
        }
        if contains_ignore_case(&raw.payload, &identifier.id) {
            Verdict::normal("found")
        } else {
            Verdict::anomaly("not_found")
        }
    }
}

/// A payload mentioning a related keyword must also mention the identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextClassifier;

impl AnomalyClassifier for ContextClassifier {
    fn name(&self) -> &'static str {
        "context"
    }

    fn classify(&self, identifier: &IdentifierConfig, raw: &RawResult) -> Verdict {
        if let Some(verdict) = response_verdict(raw) {
            return verdict;
        }
        if contains_ignore_case(&raw.payload, &identifier.id) {
            return Verdict::normal("found");
        }
        let related_present = identifier
            .related
            .iter()
            .any(|keyword| contains_ignore_case(&raw.payload, keyword));
        if related_present {
            Verdict::anomaly("missing_in_context")
        } else {
            Verdict::normal("unrelated")
        }
    }
}
