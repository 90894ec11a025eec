//! `reqwest`-backed [`Transport`].

use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use reqwest::Method;
use reqwest::header::HeaderMap;

use crate::error::OrchestrateError;

use super::{Transport, UpstreamResponse, UpstreamStream};

/// Production transport over a shared [`reqwest::Client`].
///
/// Only a connect timeout is configured: a whole-request timeout would cut
/// long-lived streams, and poll deadlines are enforced by the poller.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with the given connect timeout.
    pub fn new(connect_timeout: Duration) -> Result<Self, OrchestrateError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { http })
    }

    /// Wrap an existing client.
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn buffer(resp: reqwest::Response) -> Result<UpstreamResponse, OrchestrateError> {
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(UpstreamResponse { status, body })
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn post(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &serde_json::Value,
    ) -> Result<UpstreamResponse, OrchestrateError> {
        tracing::debug!(name: "upstream.http.post", url = %url, "POST");
        let resp = self
            .http
            .post(url)
            .headers(headers.clone())
            .json(body)
            .send()
            .await?;
        Self::buffer(resp).await
    }

    async fn get(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<UpstreamResponse, OrchestrateError> {
        tracing::trace!(name: "upstream.http.get", url = %url, "GET");
        let resp = self.http.get(url).headers(headers.clone()).send().await?;
        Self::buffer(resp).await
    }

    async fn open_stream(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: &serde_json::Value,
    ) -> Result<UpstreamStream, OrchestrateError> {
        tracing::debug!(name: "upstream.http.stream", method = %method, url = %url, "Opening stream");
        let resp = self
            .http
            .request(method, url)
            .headers(headers.clone())
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let chunks = resp.bytes_stream().map_err(OrchestrateError::from).boxed();
        Ok(UpstreamStream { status, chunks })
    }
}
