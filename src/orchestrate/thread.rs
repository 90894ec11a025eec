//! Conversation thread resolution.

use reqwest::header::HeaderMap;
use serde_json::json;

use crate::error::OrchestrateError;
use crate::upstream::Transport;

/// Return `thread_id` when supplied, otherwise open a thread upstream.
///
/// A supplied id is trusted as-is; no validation round-trip is made. A new
/// thread is created by posting the query as a user message and reading
/// `thread_id` from the reply.
pub async fn resolve_thread(
    transport: &dyn Transport,
    messages_url: &str,
    headers: &HeaderMap,
    query: &str,
    thread_id: Option<&str>,
) -> Result<String, OrchestrateError> {
    if let Some(id) = thread_id.filter(|id| !id.is_empty()) {
        tracing::debug!(name: "orchestrate.thread.reused", thread_id = %id, "Reusing thread");
        return Ok(id.to_string());
    }

    let body = json!({ "role": "user", "content": query });
    let resp = transport.post(messages_url, headers, &body).await?;
    let status = resp.status;
    let payload = resp.into_json()?;

    let id = payload
        .get("thread_id")
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            OrchestrateError::missing_field(status, &format!("no thread id returned: {payload}"))
        })?;

    tracing::info!(name: "orchestrate.thread.created", thread_id = %id, "Created thread");
    Ok(id.to_string())
}
