//! Normalized result shapes returned to callers.
//!
//! Every poll-mode outcome, whether the answer arrived inline, after
//! polling, or not at all, converges on [`NormalizedResult`]. Stream mode
//! wraps each text delta in a [`DeltaFrame`] and writes it as one
//! server-sent-event frame.
//!
//! # Example
//!
//! ```rust
//! use agent_run_relay::normalized::{DeltaFrame, sse_frame};
//!
//! let frame = DeltaFrame::delta("Hello", "thread-1");
//! let sse = sse_frame(&frame);
//! assert!(sse.starts_with("data: "));
//! assert!(sse.ends_with("\n\n"));
//! ```

use serde::{Deserialize, Serialize};

use crate::error::OrchestrateError;
use crate::orchestrate::STATUS_COMPLETED;

/// The single result shape of poll mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedResult {
    /// `true` when `response` carries an error description.
    pub error_message: bool,
    /// `completed`, an upstream-reported status, or an error kind.
    pub status: String,
    /// Answer text; empty when the payload held no text.
    pub response: String,
    /// Thread the exchange belongs to (empty when unknown).
    pub thread_id: String,
    /// Final upstream payload, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl NormalizedResult {
    /// An answered request.
    pub fn completed(response: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            error_message: false,
            status: STATUS_COMPLETED.to_string(),
            response: response.into(),
            thread_id: thread_id.into(),
            raw: None,
        }
    }

    /// Accepted upstream without text or a run to follow.
    pub fn reported(status: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            error_message: false,
            status: status.into(),
            response: String::new(),
            thread_id: thread_id.into(),
            raw: None,
        }
    }

    /// A request rejected before reaching the upstream.
    pub fn invalid(message: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            error_message: true,
            status: "invalid_request".to_string(),
            response: message.into(),
            thread_id: thread_id.into(),
            raw: None,
        }
    }

    /// A failed request. `RunFailed` payloads are kept in `raw`.
    pub fn from_error(err: &OrchestrateError, thread_id: impl Into<String>) -> Self {
        let raw = match err {
            OrchestrateError::RunFailed { payload } => Some(payload.clone()),
            _ => None,
        };
        Self {
            error_message: true,
            status: err.kind().to_string(),
            response: err.to_string(),
            thread_id: thread_id.into(),
            raw,
        }
    }

    #[must_use]
    pub fn with_raw(mut self, raw: Option<serde_json::Value>) -> Self {
        if raw.is_some() {
            self.raw = raw;
        }
        self
    }
}

/// Payload of one stream-mode SSE frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeltaFrame {
    pub error_message: bool,
    pub response: String,
    pub thread_id: String,
}

impl DeltaFrame {
    /// A text delta.
    pub fn delta(text: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            error_message: false,
            response: text.into(),
            thread_id: thread_id.into(),
        }
    }

    /// An error reported before any delta was sent.
    pub fn error(err: &OrchestrateError, thread_id: impl Into<String>) -> Self {
        Self {
            error_message: true,
            response: err.to_string(),
            thread_id: thread_id.into(),
        }
    }
}

/// Format a value as one SSE frame: `data: <JSON>\n\n`.
pub fn sse_frame<T: Serialize>(payload: &T) -> String {
    let json = serde_json::to_string(payload).unwrap_or_else(|e| {
        serde_json::json!({ "error_message": true, "response": e.to_string() }).to_string()
    });
    format!("data: {json}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completed_shape() {
        let result = NormalizedResult::completed("All green.", "t1");
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "error_message": false,
                "status": "completed",
                "response": "All green.",
                "thread_id": "t1"
            })
        );
    }

    #[test]
    fn test_run_failed_keeps_payload() {
        let err = OrchestrateError::RunFailed {
            payload: json!({ "status": "failed", "reason": "quota" }),
        };
        let result = NormalizedResult::from_error(&err, "t1");
        assert!(result.error_message);
        assert_eq!(result.status, "failed");
        assert_eq!(result.raw.unwrap()["reason"], "quota");
    }

    #[test]
    fn test_with_raw_none_keeps_existing() {
        let result = NormalizedResult::completed("x", "t").with_raw(None);
        assert!(result.raw.is_none());
    }

    #[test]
    fn test_sse_frame_format() {
        let sse = sse_frame(&DeltaFrame::delta("Hi", "t1"));
        assert_eq!(
            sse,
            "data: {\"error_message\":false,\"response\":\"Hi\",\"thread_id\":\"t1\"}\n\n"
        );
    }
}
