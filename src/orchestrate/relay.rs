//! Streaming relay over a chunked upstream connection.
//!
//! The upstream emits one JSON object per chunk, usually newline
//! terminated. Only `message.delta` events carrying `response_type ==
//! "text"` parts are forwarded; blank chunks, malformed JSON and other event
//! kinds are dropped silently.
//!
//! ```text
//! Connecting ──(2xx)──▶ Streaming ──(eof)──▶ Closed-Normal
//!     │                     └──(read error)──▶ Closed-Error
//!     └──(non-2xx)──▶ UpstreamError (no events emitted)
//! ```

use std::pin::Pin;

use futures::{Stream, StreamExt};
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::OrchestrateError;
use crate::upstream::{ByteStream, Transport};

/// Event kind carrying answer text.
pub const MESSAGE_DELTA: &str = "message.delta";

/// One forwarded relay event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEvent {
    /// Upstream event kind (always [`MESSAGE_DELTA`] for forwarded events).
    pub kind: String,
    /// Text carried by the delta part, if any.
    pub delta_text: Option<String>,
}

impl StreamEvent {
    fn delta(text: &str) -> Self {
        Self {
            kind: MESSAGE_DELTA.to_string(),
            delta_text: Some(text.to_string()),
        }
    }
}

/// Lazy sequence of relay events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, OrchestrateError>> + Send>>;

/// Parse one line of the upstream stream into zero or more events.
pub fn parse_line(line: &str) -> Vec<StreamEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    let Ok(event) = serde_json::from_str::<Value>(line) else {
        tracing::trace!(name: "orchestrate.relay.skipped", len = line.len(), "Skipping malformed chunk");
        return Vec::new();
    };

    if event.get("event").and_then(Value::as_str) != Some(MESSAGE_DELTA) {
        return Vec::new();
    }

    event
        .pointer("/data/delta/content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.get("response_type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .map(StreamEvent::delta)
                .collect()
        })
        .unwrap_or_default()
}

/// Bytes held back waiting for the rest of an object.
pub const MAX_PENDING: usize = 1 << 20;

/// Whether `pending` is the start of an object still in flight.
fn is_partial(pending: &[u8]) -> bool {
    match serde_json::from_slice::<Value>(pending) {
        Ok(_) => false,
        Err(e) => e.is_eof() && !pending.trim_ascii().is_empty(),
    }
}

/// Decode a byte stream into relay events.
///
/// Complete lines are parsed as they arrive. Whatever follows the last
/// newline of a chunk is parsed too, unless it is the beginning of an object
/// still in flight, in which case it waits for the next chunk (up to
/// [`MAX_PENDING`] bytes). A read error is yielded once and ends the
/// sequence.
pub fn decode_events(chunks: ByteStream) -> EventStream {
    let out = async_stream::stream! {
        let mut buf = Vec::<u8>::new();
        let mut chunks = chunks;

        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(name: "orchestrate.relay.read_error", error = %e, "Stream read failed");
                    yield Err(e);
                    return;
                }
            };
            buf.extend_from_slice(&chunk);

            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line = buf.drain(..=pos).collect::<Vec<_>>();
                for event in parse_line(&String::from_utf8_lossy(&line)) {
                    yield Ok(event);
                }
            }

            if is_partial(&buf) {
                if buf.len() > MAX_PENDING {
                    tracing::warn!(name: "orchestrate.relay.overflow", len = buf.len(), "Dropping oversized partial chunk");
                    buf.clear();
                }
                continue;
            }
            for event in parse_line(&String::from_utf8_lossy(&buf)) {
                yield Ok(event);
            }
            buf.clear();
        }

        if !buf.is_empty() {
            for event in parse_line(&String::from_utf8_lossy(&buf)) {
                yield Ok(event);
            }
        }
        tracing::debug!(name: "orchestrate.relay.closed", "Upstream stream closed");
    };

    Box::pin(out)
}

/// Open the upstream stream and relay its text deltas.
///
/// Fails with [`OrchestrateError::Upstream`] before yielding anything when
/// the connection opens with a non-success status.
pub async fn relay(
    transport: &dyn Transport,
    url: &str,
    headers: &HeaderMap,
    body: &Value,
) -> Result<EventStream, OrchestrateError> {
    let opened = transport.open_stream(Method::POST, url, headers, body).await?;

    if !(200..300).contains(&opened.status) {
        let body = collect_body(opened.chunks).await;
        tracing::warn!(name: "orchestrate.relay.rejected", status = opened.status, "Stream open rejected");
        return Err(OrchestrateError::Upstream {
            status: opened.status,
            body,
        });
    }

    tracing::debug!(name: "orchestrate.relay.open", status = opened.status, "Streaming");
    Ok(decode_events(opened.chunks))
}

async fn collect_body(mut chunks: ByteStream) -> String {
    let mut bytes = Vec::new();
    while let Some(Ok(chunk)) = chunks.next().await {
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    const HI: &str =
        r#"{"event":"message.delta","data":{"delta":{"content":[{"response_type":"text","text":"Hi"}]}}}"#;

    fn chunks(parts: Vec<Result<String, OrchestrateError>>) -> ByteStream {
        futures::stream::iter(parts.into_iter().map(|p| p.map(Bytes::from))).boxed()
    }

    #[test]
    fn test_only_text_deltas_survive() {
        let lines = [HI, "", "not-json", r#"{"event":"other"}"#];
        let events: Vec<_> = lines.iter().flat_map(|l| parse_line(l)).collect();
        assert_eq!(events, vec![StreamEvent::delta("Hi")]);
    }

    #[test]
    fn test_non_text_parts_dropped() {
        let line = r#"{"event":"message.delta","data":{"delta":{"content":[
            {"response_type":"image","text":"no"},
            {"response_type":"text","text":"a"},
            {"response_type":"text"},
            {"response_type":"text","text":"b"}]}}}"#
            .replace('\n', "");
        let texts: Vec<_> = parse_line(&line)
            .into_iter()
            .filter_map(|e| e.delta_text)
            .collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_delta_without_content_list() {
        assert!(parse_line(r#"{"event":"message.delta","data":{}}"#).is_empty());
        assert!(parse_line(r#"{"event":"message.delta","data":{"delta":{"content":"x"}}}"#).is_empty());
    }

    #[tokio::test]
    async fn test_decode_across_chunk_boundaries() {
        let (head, tail) = HI.split_at(20);
        let input = chunks(vec![
            Ok(head.to_string()),
            Ok(format!("{tail}\n\nnot-json\n")),
            Ok(r#"{"event":"message.delta","data":{"delta":{"content":[{"response_type":"text","text":"!"}]}}}"#.to_string()),
        ]);

        let events: Vec<_> = decode_events(input).collect().await;
        let texts: Vec<_> = events
            .into_iter()
            .map(|e| e.unwrap().delta_text.unwrap())
            .collect();
        assert_eq!(texts, vec!["Hi", "!"]);
    }

    #[tokio::test]
    async fn test_one_object_per_chunk_without_newlines() {
        let input = chunks(vec![
            Ok(HI.to_string()),
            Ok(String::new()),
            Ok("not-json".to_string()),
            Ok(r#"{"event":"other"}"#.to_string()),
        ]);

        let events: Vec<_> = decode_events(input).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap(), &StreamEvent::delta("Hi"));
    }

    #[tokio::test]
    async fn test_garbage_tail_does_not_swallow_next_object() {
        let input = chunks(vec![Ok("not-json".to_string()), Ok(HI.to_string())]);

        let events: Vec<_> = decode_events(input).collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_ok());
    }

    #[tokio::test]
    async fn test_oversized_partial_is_dropped() {
        let open = format!(r#"{{"event":"message.delta","pad":"{}"#, "x".repeat(MAX_PENDING));
        let input = chunks(vec![
            Ok(open),
            Ok("\"}\n".to_string()),
            Ok(format!("{HI}\n")),
        ]);

        let events: Vec<_> = decode_events(input).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap(), &StreamEvent::delta("Hi"));
    }

    #[tokio::test]
    async fn test_read_error_ends_stream() {
        let input = chunks(vec![
            Ok(format!("{HI}\n")),
            Err(OrchestrateError::Network("reset".to_string())),
            Ok(format!("{HI}\n")),
        ]);

        let events: Vec<_> = decode_events(input).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(OrchestrateError::Network(_))));
    }
}
