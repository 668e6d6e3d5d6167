//! Generic HTTP repository source.
//!
//! Requests are built from a URL template, and response bodies are split
//! into raw results according to the configured payload format.

use crate::config::{PayloadFormat, SourceConfig};
use crate::models::{RawResult, ResponseClass, HINT_WITHHELD};
use crate::sources::SourceCapability;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

/// A repository reachable over HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpSource {
    id: String,
    name: String,
    url_template: String,
    rate_limit: f64,
    format: PayloadFormat,
    absent_markers: Vec<String>,
    /// Shared HTTP client (connection pooling, per-request timeout).
    client: reqwest::Client,
}

impl HttpSource {
    /// Create a source from its configuration and a shared client.
    pub fn new(config: &SourceConfig, client: reqwest::Client) -> Self {
        Self {
            id: config.id.clone(),
            name: config.display_name().to_string(),
            url_template: config.url.clone(),
            rate_limit: config.rate_limit,
            format: config.format,
            absent_markers: config.absent_markers.clone(),
            client,
        }
    }

    /// Request URL for one identifier (percent-encoded).
    pub fn request_url(&self, identifier: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(identifier.as_bytes()).collect();
        self.url_template.replace("{identifier}", &encoded)
    }

    /// Split a response body into raw results.
    pub fn split_body(&self, class: ResponseClass, status_code: u16, body: String) -> Vec<RawResult> {
        if !class.is_success() {
            return vec![RawResult {
                class,
                status_code: Some(status_code),
                payload: body,
                hint: None,
            }];
        }

        match self.format {
            PayloadFormat::Text => vec![self.success_result(status_code, body)],
            PayloadFormat::JsonRecords => match serde_json::from_str::<Value>(&body) {
                Ok(Value::Array(records)) => records
                    .into_iter()
                    .map(|record| self.success_result(status_code, record.to_string()))
                    .collect(),
                Ok(other) => vec![self.success_result(status_code, other.to_string())],
                Err(e) => vec![RawResult {
                    class: ResponseClass::Error,
                    status_code: Some(status_code),
                    payload: format!("invalid JSON payload: {e}"),
                    hint: None,
                }],
            },
        }
    }

    fn success_result(&self, status_code: u16, payload: String) -> RawResult {
        let withheld = self
            .absent_markers
            .iter()
            .any(|marker| !marker.is_empty() && payload.contains(marker.as_str()));
        RawResult {
            class: ResponseClass::Success,
            status_code: Some(status_code),
            payload,
            hint: withheld.then(|| HINT_WITHHELD.to_string()),
        }
    }
}

#[async_trait]
impl SourceCapability for HttpSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn rate_limit(&self) -> f64 {
        self.rate_limit
    }

    async fn search(&self, identifier: &str) -> Vec<RawResult> {
        let url = self.request_url(identifier);
        debug!(source = %self.id, identifier, "GET {}", url);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(source = %self.id, identifier, "Request failed: {}", e);
                return vec![RawResult::error(e.to_string())];
            }
        };

        let status_code = response.status().as_u16();
        let class = ResponseClass::from_status(status_code);

        match response.text().await {
            Ok(body) => self.split_body(class, status_code, body),
            Err(e) => {
                warn!(source = %self.id, identifier, "Failed to read body: {}", e);
                vec![RawResult {
                    class: ResponseClass::Error,
                    status_code: Some(status_code),
                    payload: e.to_string(),
                    hint: None,
                }]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassifierKind;
    use std::time::Duration;

    fn source_config(format: PayloadFormat) -> SourceConfig {
        SourceConfig {
            id: "test".to_string(),
            name: String::new(),
            url: "http://127.0.0.1:1/search?q={identifier}&fmt=json".to_string(),
            rate_limit: 2.0,
            format,
            classifier: ClassifierKind::Presence,
            absent_markers: vec!["<PhraseNotFound>".to_string()],
        }
    }

    fn source(format: PayloadFormat) -> HttpSource {
        HttpSource::new(&source_config(format), reqwest::Client::new())
    }

    #[test]
    fn test_request_url_encodes_identifier() {
        let source = source(PayloadFormat::Text);
        assert_eq!(
            source.request_url("E-M329"),
            "http://127.0.0.1:1/search?q=E-M329&fmt=json"
        );
        assert_eq!(
            source.request_url("a b&c"),
            "http://127.0.0.1:1/search?q=a+b%26c&fmt=json"
        );
        assert_eq!(source.name(), "test");
    }

    #[test]
    fn test_split_text_body() {
        let source = source(PayloadFormat::Text);
        let results = source.split_body(ResponseClass::Success, 200, "<IdList/>".to_string());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].hint, None);

        let results = source.split_body(
            ResponseClass::Success,
            200,
            "<ErrorList><PhraseNotFound>x</PhraseNotFound></ErrorList>".to_string(),
        );
        assert_eq!(results[0].hint.as_deref(), Some(HINT_WITHHELD));
    }

    #[test]
    fn test_split_json_records() {
        let source = source(PayloadFormat::JsonRecords);
        let body = r#"[{"accession":"A1"},{"accession":"A2"},{"accession":"A3"}]"#;
        let results = source.split_body(ResponseClass::Success, 200, body.to_string());
        assert_eq!(results.len(), 3);
        assert!(results[1].payload.contains("A2"));

        let results = source.split_body(ResponseClass::Success, 200, "[]".to_string());
        assert!(results.is_empty());

        let results = source.split_body(ResponseClass::Success, 200, "{not json".to_string());
        assert_eq!(results.len(), 1);
        assert!(results[0].is_transport_error());
    }

    #[test]
    fn test_split_non_success_body() {
        let source = source(PayloadFormat::JsonRecords);
        let results =
            source.split_body(ResponseClass::Restricted, 403, "forbidden".to_string());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].class, ResponseClass::Restricted);
        assert_eq!(results[0].status_code, Some(403));
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_error_result() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let source = HttpSource::new(&source_config(PayloadFormat::Text), client);

        let results = source.search("M1").await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_transport_error());
        assert_eq!(results[0].status_code, None);
    }
}
