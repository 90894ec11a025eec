//! API-key → bearer token exchange.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::OrchestrateError;

use super::TokenSource;

/// Grant type for the IAM API-key exchange.
pub const API_KEY_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// Tokens are considered stale this long before their advertised expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// A short-lived bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    expires_in: Option<Duration>,
}

impl AccessToken {
    /// Token without a known lifetime.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            expires_in: None,
        }
    }

    /// Token with an advertised lifetime.
    pub fn with_expiry(secret: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            secret: secret.into(),
            expires_in: Some(expires_in),
        }
    }

    /// Raw token value.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Lifetime advertised by the token endpoint.
    pub fn expires_in(&self) -> Option<Duration> {
        self.expires_in
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Exchanges a configured API key for a bearer token with one form POST.
///
/// Never retries; the caller owns retry policy.
#[derive(Clone)]
pub struct ApiKeyTokenSource {
    http: reqwest::Client,
    token_url: String,
    api_key: String,
}

impl std::fmt::Debug for ApiKeyTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyTokenSource")
            .field("token_url", &self.token_url)
            .finish()
    }
}

impl ApiKeyTokenSource {
    /// Create a token source for `token_url`.
    pub fn new(http: reqwest::Client, token_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            api_key: api_key.into(),
        }
    }
}

fn auth_error(status: Option<u16>, body: impl Into<String>) -> OrchestrateError {
    OrchestrateError::Auth {
        status,
        body: body.into(),
    }
}

#[async_trait::async_trait]
impl TokenSource for ApiKeyTokenSource {
    async fn acquire(&self) -> Result<AccessToken, OrchestrateError> {
        let form = [
            ("grant_type", API_KEY_GRANT_TYPE),
            ("apikey", self.api_key.as_str()),
        ];

        let resp = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| auth_error(None, e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| auth_error(Some(status), e.to_string()))?;

        if !(200..300).contains(&status) {
            tracing::warn!(name: "upstream.token.rejected", status, "Token exchange rejected");
            return Err(auth_error(Some(status), body));
        }

        let reply: TokenReply = serde_json::from_str(&body)
            .map_err(|e| auth_error(Some(status), format!("invalid token reply ({e}): {body}")))?;

        let secret = reply
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| auth_error(Some(status), format!("no access_token in reply: {body}")))?;

        tracing::debug!(name: "upstream.token.acquired", expires_in = ?reply.expires_in, "Token acquired");

        Ok(match reply.expires_in {
            Some(secs) => AccessToken::with_expiry(secret, Duration::from_secs(secs)),
            None => AccessToken::new(secret),
        })
    }
}

/// Reuses a token until shortly before it expires.
///
/// Tokens without an advertised lifetime are never cached.
pub struct CachedTokenSource {
    inner: Arc<dyn TokenSource>,
    cached: Mutex<Option<(AccessToken, Instant)>>,
}

impl std::fmt::Debug for CachedTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTokenSource").finish_non_exhaustive()
    }
}

impl CachedTokenSource {
    /// Wrap another token source.
    pub fn new(inner: Arc<dyn TokenSource>) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl TokenSource for CachedTokenSource {
    async fn acquire(&self) -> Result<AccessToken, OrchestrateError> {
        // Held across the fetch so concurrent callers share one exchange.
        let mut guard = self.cached.lock().await;

        if let Some((token, stale_at)) = guard.as_ref()
            && Instant::now() < *stale_at
        {
            return Ok(token.clone());
        }

        let token = self.inner.acquire().await?;
        *guard = token
            .expires_in()
            .and_then(|ttl| ttl.checked_sub(EXPIRY_MARGIN))
            .map(|usable| (token.clone(), Instant::now() + usable));
        Ok(token)
    }
}
