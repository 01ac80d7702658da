use crate::error::{LameduckError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Source of the worker's outstanding-work count for progress reports.
///
/// `None` means the count is unknown.
#[async_trait]
pub trait OutstandingProbe: Send + Sync {
    async fn outstanding(&self) -> Option<usize>;
}

/// Reads `in_flight` from the worker's readiness endpoint.
///
/// The endpoint answers 503 once the worker is draining, so the status code
/// is ignored and only the body is inspected.
#[derive(Debug, Clone)]
pub struct HttpStatusProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpStatusProbe {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .map_err(|e| LameduckError::system(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl OutstandingProbe for HttpStatusProbe {
    async fn outstanding(&self) -> Option<usize> {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %self.url, "Status probe failed: {}", e);
                return None;
            }
        };

        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                debug!(url = %self.url, "Status probe returned unreadable body: {}", e);
                return None;
            }
        };

        body.get("in_flight")
            .and_then(serde_json::Value::as_u64)
            .map(|n| n as usize)
    }
}
