//! HTTP access to the analysis engine's council endpoints.

use council_protocol::{AnalysisSummary, HistoryMessage};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::transport::{ByteStream, StreamRequest, Transport, TransportError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("engine returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Client for `{base}/council/...`. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CouncilApi {
    client: reqwest::Client,
    base: String,
}

impl CouncilApi {
    pub fn new(base: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base)
    }

    pub fn with_client(client: reqwest::Client, base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { client, base }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn stream_url(&self, session_id: &str, message: &str) -> String {
        format!(
            "{}/council/chat/{}/stream?message={}",
            self.base,
            urlencoding::encode(session_id),
            urlencoding::encode(message)
        )
    }

    pub fn summary_url(&self, session_id: &str) -> String {
        format!(
            "{}/council/analyses/{}",
            self.base,
            urlencoding::encode(session_id)
        )
    }

    pub fn history_url(&self, session_id: &str) -> String {
        format!(
            "{}/council/chat/{}/messages",
            self.base,
            urlencoding::encode(session_id)
        )
    }

    pub async fn fetch_summary(&self, session_id: &str) -> Result<AnalysisSummary, ApiError> {
        self.get_json(&self.summary_url(session_id)).await
    }

    pub async fn fetch_history(&self, session_id: &str) -> Result<Vec<HistoryMessage>, ApiError> {
        self.get_json(&self.history_url(session_id)).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        debug!(component = "api", event = "api.request", url = %url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                component = "api",
                event = "api.request.failed",
                url = %url,
                status = status.as_u16(),
            );
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

impl Transport for CouncilApi {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, TransportError> {
        let url = self.stream_url(&request.session_id, &request.message);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TransportError::from)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_encodes_message() {
        let api = CouncilApi::new("http://localhost:4000/api/");
        assert_eq!(
            api.stream_url("abc-1", "How to grow a SaaS?"),
            "http://localhost:4000/api/council/chat/abc-1/stream?message=How%20to%20grow%20a%20SaaS%3F"
        );
        assert_eq!(
            api.summary_url("abc-1"),
            "http://localhost:4000/api/council/analyses/abc-1"
        );
        assert_eq!(
            api.history_url("abc-1"),
            "http://localhost:4000/api/council/chat/abc-1/messages"
        );
    }
}
