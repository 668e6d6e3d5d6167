//! Repository source capabilities.
//!
//! The worker framework is written once against [`SourceCapability`]; each
//! repository is one implementation.

pub mod http;

pub use http::HttpSource;

use crate::classify::{classifier_for, AnomalyClassifier};
use crate::config::Config;
use crate::models::RawResult;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// A repository that can be searched for an identifier.
///
/// `search` never fails past this boundary: transport and parse failures are
/// returned as [`RawResult`]s with an error class.
#[async_trait]
pub trait SourceCapability: Send + Sync {
    /// Stable source id recorded on observations.
    fn id(&self) -> &str;

    /// Human-readable name for logs and reports.
    fn name(&self) -> &str {
        self.id()
    }

    /// Requests per second this source tolerates.
    fn rate_limit(&self) -> f64;

    /// Query the source for one identifier.
    async fn search(&self, identifier: &str) -> Vec<RawResult>;
}

/// A source paired with the anomaly policy applied to its results.
#[derive(Clone)]
pub struct MonitoredSource {
    pub capability: Arc<dyn SourceCapability>,
    pub classifier: Arc<dyn AnomalyClassifier>,
}

/// Build every configured source.
pub fn build_sources(config: &Config) -> Result<Vec<MonitoredSource>> {
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .user_agent(concat!("markerwatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;

    Ok(config
        .sources
        .iter()
        .map(|source| MonitoredSource {
            capability: Arc::new(HttpSource::new(source, client.clone())),
            classifier: classifier_for(source.classifier),
        })
        .collect())
}
