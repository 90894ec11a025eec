//! Collaborators consumed by the orchestration core.
//!
//! The core never talks to `reqwest` directly. It depends on two seams:
//!
//! - [`TokenSource`]: hands out a bearer token for one orchestration call.
//! - [`Transport`]: issues JSON requests and opens chunked streams.
//!
//! [`http::ReqwestTransport`] and [`token::ApiKeyTokenSource`] are the
//! production implementations; tests substitute scripted fakes.

pub mod http;
pub mod token;

pub use http::ReqwestTransport;
pub use token::{AccessToken, ApiKeyTokenSource, CachedTokenSource};

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};

use crate::error::OrchestrateError;

/// Chunked response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, OrchestrateError>> + Send>>;

/// A fully buffered upstream reply.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw body text.
    pub body: String,
}

impl UpstreamResponse {
    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode a successful reply as JSON.
    ///
    /// Non-2xx statuses and undecodable bodies both surface as
    /// [`OrchestrateError::Upstream`] with the body echoed.
    pub fn into_json(self) -> Result<serde_json::Value, OrchestrateError> {
        if !self.is_success() {
            return Err(OrchestrateError::Upstream {
                status: self.status,
                body: self.body,
            });
        }
        serde_json::from_str(&self.body).map_err(|e| OrchestrateError::Upstream {
            status: self.status,
            body: format!("invalid JSON body ({e}): {}", self.body),
        })
    }
}

/// An opened chunked response.
pub struct UpstreamStream {
    /// Status line of the opening response.
    pub status: u16,
    /// Body chunks as they arrive.
    pub chunks: ByteStream,
}

impl std::fmt::Debug for UpstreamStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamStream")
            .field("status", &self.status)
            .finish()
    }
}

/// Supplies bearer tokens.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    /// Acquire a token usable for the next upstream calls.
    async fn acquire(&self) -> Result<AccessToken, OrchestrateError>;
}

/// Outbound HTTP transport.
///
/// Dropping any returned future aborts the underlying request.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body.
    async fn post(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &serde_json::Value,
    ) -> Result<UpstreamResponse, OrchestrateError>;

    /// GET a resource.
    async fn get(&self, url: &str, headers: &HeaderMap)
    -> Result<UpstreamResponse, OrchestrateError>;

    /// Open a chunked response without buffering the body.
    async fn open_stream(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: &serde_json::Value,
    ) -> Result<UpstreamStream, OrchestrateError>;
}

/// Standard headers for an authenticated JSON call.
pub fn auth_headers(token: &AccessToken) -> Result<HeaderMap, OrchestrateError> {
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token.secret())).map_err(|e| {
        OrchestrateError::Auth {
            status: None,
            body: format!("token is not a valid header value: {e}"),
        }
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_json_rejects_non_success() {
        let resp = UpstreamResponse {
            status: 503,
            body: "busy".to_string(),
        };
        match resp.into_json() {
            Err(OrchestrateError::Upstream { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_into_json_rejects_garbage() {
        let resp = UpstreamResponse {
            status: 200,
            body: "<html>".to_string(),
        };
        assert!(matches!(
            resp.into_json(),
            Err(OrchestrateError::Upstream { status: 200, .. })
        ));
    }

    #[test]
    fn test_auth_headers() {
        let headers = auth_headers(&AccessToken::new("abc")).unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer abc");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }
}
