use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use serde_json::Value;

/// User agent sent with every request, so remote operators can identify us.
pub fn wger_user_agent() -> String {
    format!(
        "wger Workout Manager/{} (https://github.com/wger-project)",
        env!("CARGO_PKG_VERSION")
    )
}

/// Identifying headers attached to all outgoing requests.
pub fn wger_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&wger_user_agent()) {
        headers.insert(USER_AGENT, v);
    }
    headers
}

/// Raw result of downloading a file. The status is kept so the caller can
/// decide what a non-success response means.
#[derive(Debug, Clone)]
pub struct Download {
    pub status: u16,
    pub bytes: Bytes,
}

impl Download {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Request/response client used by the sync engine.
#[async_trait::async_trait]
pub trait HttpSource: Send + Sync {
    /// GET a JSON document. Transport errors, error statuses and malformed
    /// bodies are all errors.
    async fn get_json(&self, url: &str) -> Result<Value>;

    /// GET a file. Only transport errors are errors; the status is returned.
    async fn get_bytes(&self, url: &str) -> Result<Download>;
}

#[derive(Debug, Clone)]
pub struct ReqwestSource {
    http: Client,
}

impl ReqwestSource {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .default_headers(wger_headers())
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl HttpSource for ReqwestSource {
    async fn get_json(&self, url: &str) -> Result<Value> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?;
        let v: Value = resp
            .json()
            .await
            .with_context(|| format!("decoding JSON from {url}"))?;
        Ok(v)
    }

    async fn get_bytes(&self, url: &str) -> Result<Download> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?;
        Ok(Download { status, bytes })
    }
}
