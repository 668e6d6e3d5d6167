//! Test doubles shared by unit tests.

use crate::classify::classifier_for;
use crate::config::{ClassifierKind, Config, IdentifierConfig, SourceConfig};
use crate::models::RawResult;
use crate::sources::{MonitoredSource, SourceCapability};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

type Responder = Box<dyn Fn(&str) -> Vec<RawResult> + Send + Sync>;

/// A source that answers from a closure and records every call.
pub struct ScriptedSource {
    id: String,
    rate_limit: f64,
    respond: Responder,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedSource {
    pub fn new(
        id: &str,
        rate_limit: f64,
        respond: impl Fn(&str) -> Vec<RawResult> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            rate_limit,
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Every call so far as (identifier, time).
    pub fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceCapability for ScriptedSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn rate_limit(&self) -> f64 {
        self.rate_limit
    }

    async fn search(&self, identifier: &str) -> Vec<RawResult> {
        self.calls
            .lock()
            .unwrap()
            .push((identifier.to_string(), Instant::now()));
        (self.respond)(identifier)
    }
}

/// Wrap a scripted source with the presence classifier.
pub fn monitored(source: Arc<ScriptedSource>) -> MonitoredSource {
    MonitoredSource {
        capability: source,
        classifier: classifier_for(ClassifierKind::Presence),
    }
}

pub fn identifiers(ids: &[&str]) -> Vec<IdentifierConfig> {
    ids.iter()
        .map(|id| IdentifierConfig {
            id: id.to_string(),
            related: Vec::new(),
        })
        .collect()
}

/// A valid configuration naming the given source ids and identifiers.
pub fn config_for(source_ids: &[&str], ids: &[&str]) -> Config {
    let mut config = Config::default();
    config.identifiers = identifiers(ids);
    config.sources = source_ids
        .iter()
        .map(|id| SourceConfig {
            id: id.to_string(),
            name: String::new(),
            url: "http://127.0.0.1:1/?q={identifier}".to_string(),
            rate_limit: 10.0,
            format: Default::default(),
            classifier: ClassifierKind::Presence,
            absent_markers: Vec::new(),
        })
        .collect();
    config
}
