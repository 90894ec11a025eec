//! Error taxonomy for the orchestration core.
//!
//! Every failure a collaborator can produce is surfaced through
//! [`OrchestrateError`] with enough context (status code, body, terminal
//! payload) to diagnose it without re-querying the upstream service.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while driving an upstream run.
#[derive(Error, Debug)]
pub enum OrchestrateError {
    /// The API-key exchange for a bearer token failed.
    #[error("token exchange failed ({}): {body}", status_text(.status))]
    Auth {
        /// HTTP status returned by the token endpoint, if any was received.
        status: Option<u16>,
        /// Response body or transport message.
        body: String,
    },

    /// The conversational API answered with a non-2xx status or without a
    /// field the caller depends on.
    #[error("upstream error ({status}): {body}")]
    Upstream {
        /// HTTP status code echoed from the upstream reply.
        status: u16,
        /// Upstream body, or a description of the missing field.
        body: String,
    },

    /// Polling reached a terminal failure status.
    #[error("run failed with status {}", payload_status(payload))]
    RunFailed {
        /// Full terminal payload, kept for diagnosis.
        payload: serde_json::Value,
    },

    /// The poll deadline passed before the run reached a terminal status.
    #[error("run {run_id} still pending after {elapsed:?}")]
    PollTimeout {
        /// Run being polled.
        run_id: String,
        /// Wall-clock time spent polling.
        elapsed: Duration,
    },

    /// Transport-level fault (connect, read, decode).
    #[error("network error: {0}")]
    Network(String),

    /// The caller went away and the work was abandoned.
    #[error("request cancelled")]
    Cancelled,
}

impl OrchestrateError {
    /// Short machine-readable label used as the `status` of error results.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth_error",
            Self::Upstream { .. } => "upstream_error",
            Self::RunFailed { .. } => "failed",
            Self::PollTimeout { .. } => "timeout",
            Self::Network(_) => "network_error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Build an [`OrchestrateError::Upstream`] for a reply missing `field`.
    pub fn missing_field(status: u16, what: &str) -> Self {
        Self::Upstream {
            status,
            body: what.to_string(),
        }
    }
}

impl From<reqwest::Error> for OrchestrateError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

fn status_text(status: &Option<u16>) -> String {
    status.map_or_else(|| "no response".to_string(), |s| s.to_string())
}

fn payload_status(payload: &serde_json::Value) -> &str {
    payload
        .get("status")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown")
}
