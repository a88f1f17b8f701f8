//! HTTP fetch boundary for remote directories
//!
//! Every upstream failure is classified here and nowhere else.

use crate::config::SourceAuth;
use async_trait::async_trait;
use op_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Fetches a JSON (or YAML) document by URL
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value>;
}

/// Map a non-success HTTP status onto the error taxonomy
pub fn classify_status(status: u16, url: &str, body: &str) -> Error {
    let detail = if body.trim().is_empty() {
        format!("HTTP {} from {}", status, url)
    } else {
        let snippet: String = body.chars().take(200).collect();
        format!("HTTP {} from {}: {}", status, url, snippet)
    };

    match status {
        404 | 410 => Error::NotFound(detail),
        429 => Error::RateLimit(detail),
        401 | 403 => Error::Auth(detail),
        408 => Error::Timeout(detail),
        500..=599 => Error::Server(detail),
        400..=499 => Error::Validation(detail),
        _ => Error::Network(detail),
    }
}

/// Map a transport-level reqwest failure onto the error taxonomy
pub fn classify_transport(err: &reqwest::Error, url: &str) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("Request to {} timed out", url))
    } else if let Some(status) = err.status() {
        classify_status(status.as_u16(), url, "")
    } else if err.is_decode() {
        Error::Validation(format!("Invalid response body from {}: {}", url, err))
    } else {
        Error::Network(format!("Request to {} failed: {}", url, err))
    }
}

/// Parse a response body as JSON, falling back to YAML
fn parse_document(body: &str, url: &str) -> Result<Value> {
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(json_err) => serde_yaml::from_str(body).map_err(|_| {
            Error::Validation(format!("Response from {} is not JSON or YAML: {}", url, json_err))
        }),
    }
}

/// reqwest-backed fetcher with a fixed per-request timeout
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration, auth: Option<&SourceAuth>) -> anyhow::Result<Self> {
        use anyhow::{anyhow, Context};

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json, application/yaml;q=0.9"),
        );

        if let Some(auth) = auth {
            match auth.resolve() {
                SourceAuth::Bearer { token } => {
                    headers.insert(
                        reqwest::header::AUTHORIZATION,
                        format!("Bearer {}", token)
                            .parse()
                            .map_err(|_| anyhow!("Invalid bearer token"))?,
                    );
                }
                SourceAuth::Header { name, value } => {
                    headers.insert(
                        reqwest::header::HeaderName::from_bytes(name.as_bytes())
                            .map_err(|_| anyhow!("Invalid header name"))?,
                        value.parse().map_err(|_| anyhow!("Invalid header value"))?,
                    );
                }
                SourceAuth::Basic { username, password } => {
                    use base64::Engine;
                    let credentials = base64::engine::general_purpose::STANDARD
                        .encode(format!("{}:{}", username, password));
                    headers.insert(
                        reqwest::header::AUTHORIZATION,
                        format!("Basic {}", credentials)
                            .parse()
                            .map_err(|_| anyhow!("Invalid basic auth"))?,
                    );
                }
            }
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("op-catalog/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get_json(&self, url: &str) -> Result<Value> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport(&e, url))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(&e, url))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), url, &body));
        }
        parse_document(&body, url)
    }
}

/// In-memory fetcher for tests and offline use. Unknown URLs answer 404.
#[derive(Default)]
pub struct MemoryFetcher {
    documents: Mutex<HashMap<String, Value>>,
    failures: Mutex<HashMap<String, u16>>,
    requests: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `value` at `url`
    pub fn insert(&self, url: impl Into<String>, value: Value) {
        let url = url.into();
        self.lock_failures().remove(&url);
        self.lock_documents().insert(url, value);
    }

    /// Answer `url` with an HTTP error status
    pub fn fail(&self, url: impl Into<String>, status: u16) {
        self.lock_failures().insert(url.into(), status);
    }

    pub fn remove(&self, url: &str) {
        self.lock_documents().remove(url);
        self.lock_failures().remove(url);
    }

    /// Total requests served, including failures
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn lock_documents(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.documents.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, HashMap<String, u16>> {
        self.failures.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl HttpFetcher for MemoryFetcher {
    async fn get_json(&self, url: &str) -> Result<Value> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        if let Some(status) = self.lock_failures().get(url).copied() {
            return Err(classify_status(status, url, ""));
        }
        self.lock_documents()
            .get(url)
            .cloned()
            .ok_or_else(|| classify_status(404, url, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_classify_status() {
        let url = "https://example.test/list.json";
        assert_eq!(classify_status(404, url, "").kind(), ErrorKind::NotFound);
        assert_eq!(classify_status(429, url, "").kind(), ErrorKind::RateLimit);
        assert_eq!(classify_status(401, url, "").kind(), ErrorKind::Auth);
        assert_eq!(classify_status(403, url, "").kind(), ErrorKind::Auth);
        assert_eq!(classify_status(503, url, "busy").kind(), ErrorKind::Server);
        assert_eq!(classify_status(400, url, "").kind(), ErrorKind::Validation);
        assert!(classify_status(502, url, "").is_retryable());
        assert!(!classify_status(404, url, "").is_retryable());
    }

    #[test]
    fn test_parse_document_falls_back_to_yaml() {
        let value = parse_document("openapi: 3.0.0\ninfo:\n  title: Y\n", "u").unwrap();
        assert_eq!(value["info"]["title"], "Y");
        assert!(parse_document("{unterminated", "u").is_err());
    }

    #[tokio::test]
    async fn test_memory_fetcher() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert("https://a.test/providers.json", json!({"data": ["a.com"]}));
        fetcher.fail("https://a.test/metrics.json", 500);

        let doc = fetcher.get_json("https://a.test/providers.json").await.unwrap();
        assert_eq!(doc["data"][0], "a.com");

        let err = fetcher.get_json("https://a.test/metrics.json").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Server);

        let err = fetcher.get_json("https://a.test/missing.json").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(fetcher.requests(), 3);
    }
}
