//! Orchestration of upstream agent runs.
//!
//! The [`Orchestrator`] composes the collaborators into the two request
//! modes:
//!
//! - **Poll mode** ([`Orchestrator::ask`]): token → resolve thread → submit
//!   → inline answer, or poll the run until it is terminal →
//!   [`NormalizedResult`].
//! - **Stream mode** ([`Orchestrator::ask_stream`]): token → resolve thread →
//!   open one chunked connection → lazy [`StreamEvent`] sequence.
//!
//! Each step strictly precedes the next: the token and thread id are inputs
//! to every later call. No state outlives a call.
//!
//! # Modules
//!
//! - [`extract`]: total final-answer extraction
//! - [`status`]: run status normalization table
//! - [`thread`]: thread resolution
//! - [`poller`]: fixed-interval run polling
//! - [`relay`]: newline-delimited JSON stream relay

pub mod extract;
pub mod poller;
pub mod relay;
pub mod status;
pub mod thread;

pub use extract::extract_text;
pub use poller::{PollSettings, RunPoller};
pub use relay::{EventStream, StreamEvent};
pub use status::{RunOutcome, RunStatus};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use url::Url;

use crate::error::OrchestrateError;
use crate::normalized::NormalizedResult;
use crate::upstream::{TokenSource, Transport, auth_headers};

/// Status reported when an answer was obtained.
pub const STATUS_COMPLETED: &str = "completed";

/// Status reported when the upstream accepted the message but returned
/// neither text nor a run to poll.
pub const STATUS_SUBMITTED: &str = "submitted";

/// A caller request, shared by both modes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// User query text.
    pub query: String,
    /// Agent that should answer.
    pub agent_id: String,
    /// Existing thread to continue.
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Attach the final upstream payload to the result.
    #[serde(default)]
    pub include_raw: bool,
}

/// Submission body sent to the runs endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message<'a> {
    /// Always `"user"`.
    pub role: &'static str,
    pub content: &'a str,
    pub agent_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<&'a str>,
}

impl<'a> Message<'a> {
    pub fn user(content: &'a str, agent_id: &'a str, thread_id: Option<&'a str>) -> Self {
        Self {
            role: "user",
            content,
            agent_id,
            thread_id,
        }
    }
}

/// Handle to an upstream run whose result is not inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: String,
}

impl RunHandle {
    /// Read `run_id` from a submission reply.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        payload
            .get("run_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(|id| Self {
                run_id: id.to_string(),
            })
    }
}

/// Upstream endpoints derived from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    runs: Url,
    run_status: String,
    messages: String,
}

impl Endpoints {
    /// Build endpoints from the submission URL.
    ///
    /// The status base defaults to the submission URL (the run id becomes a
    /// trailing path segment); the message-creation URL defaults to the
    /// submission URL too.
    pub fn new(
        runs_url: &str,
        run_status_url: Option<&str>,
        messages_url: Option<&str>,
    ) -> Result<Self, url::ParseError> {
        let runs = Url::parse(runs_url)?;
        let run_status = match run_status_url {
            Some(u) => Url::parse(u)?.to_string(),
            None => runs.to_string(),
        };
        let messages = match messages_url {
            Some(u) => Url::parse(u)?.to_string(),
            None => runs.to_string(),
        };
        Ok(Self {
            runs,
            run_status,
            messages,
        })
    }

    /// Submission URL for poll mode.
    pub fn submit_url(&self) -> String {
        let mut url = self.runs.clone();
        url.query_pairs_mut().append_pair("stream", "false");
        url.to_string()
    }

    /// Submission URL for stream mode, passing the upstream stream timeout.
    pub fn stream_url(&self, stream_timeout_ms: u64) -> String {
        let mut url = self.runs.clone();
        url.query_pairs_mut()
            .append_pair("stream", "true")
            .append_pair("stream_timeout", &stream_timeout_ms.to_string())
            .append_pair("multiple_content", "true");
        url.to_string()
    }

    /// Base the poller appends run ids to.
    pub fn run_status_base(&self) -> &str {
        &self.run_status
    }

    /// Message-creation URL used to open threads.
    pub fn messages_url(&self) -> &str {
        &self.messages
    }
}

/// A live stream-mode session.
pub struct RelaySession {
    /// Thread the deltas belong to.
    pub thread_id: String,
    /// Lazy sequence of text deltas.
    pub events: EventStream,
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}

/// Composes token, thread, submission, polling and relay steps.
#[derive(Clone)]
pub struct Orchestrator {
    tokens: Arc<dyn TokenSource>,
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    polling: PollSettings,
    stream_timeout_ms: u64,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("endpoints", &self.endpoints)
            .field("polling", &self.polling)
            .field("stream_timeout_ms", &self.stream_timeout_ms)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        tokens: Arc<dyn TokenSource>,
        transport: Arc<dyn Transport>,
        endpoints: Endpoints,
        polling: PollSettings,
        stream_timeout_ms: u64,
    ) -> Self {
        Self {
            tokens,
            transport,
            endpoints,
            polling,
            stream_timeout_ms,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Poll mode: resolve the thread, submit the query and converge on one
    /// [`NormalizedResult`].
    ///
    /// Inline text short-circuits polling. A reply with neither text nor a
    /// run id is reported as-is with an empty response.
    #[instrument(
        skip(self, req, cancel),
        fields(agent_id = %req.agent_id, thread_id = tracing::field::Empty, run_id = tracing::field::Empty)
    )]
    pub async fn ask(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<NormalizedResult, OrchestrateError> {
        let token = self.tokens.acquire().await?;
        let headers = auth_headers(&token)?;

        let thread_id = tokio::select! {
            () = cancel.cancelled() => return Err(OrchestrateError::Cancelled),
            id = thread::resolve_thread(
                self.transport.as_ref(),
                self.endpoints.messages_url(),
                &headers,
                &req.query,
                req.thread_id.as_deref(),
            ) => id?,
        };
        tracing::Span::current().record("thread_id", thread_id.as_str());

        let body = json!(Message::user(&req.query, &req.agent_id, Some(&thread_id)));
        let submit_url = self.endpoints.submit_url();

        let submitted = tokio::select! {
            () = cancel.cancelled() => return Err(OrchestrateError::Cancelled),
            resp = self.transport.post(&submit_url, &headers, &body) => resp?,
        };
        let submitted = submitted.into_json()?;

        let inline = extract_text(&submitted);
        if !inline.is_empty() {
            tracing::info!(name: "orchestrate.ask.inline", thread_id = %thread_id, "Inline answer");
            return Ok(NormalizedResult::completed(inline, thread_id)
                .with_raw(req.include_raw.then_some(submitted)));
        }

        let Some(run) = RunHandle::from_payload(&submitted) else {
            let status = submitted
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or(STATUS_SUBMITTED)
                .to_string();
            tracing::info!(name: "orchestrate.ask.no_run", status = %status, "Submitted without run id");
            return Ok(NormalizedResult::reported(status, thread_id)
                .with_raw(req.include_raw.then_some(submitted)));
        };

        tracing::Span::current().record("run_id", run.run_id.as_str());
        tracing::info!(name: "orchestrate.ask.polling", "Polling run");

        let poller = RunPoller::new(
            self.transport.as_ref(),
            self.endpoints.run_status_base(),
            self.polling,
        );
        let payload = poller.poll(&run.run_id, &headers, cancel).await?;

        let text = extract_text(&payload);
        tracing::info!(name: "orchestrate.ask.completed", response_len = text.len(), "Run completed");
        Ok(NormalizedResult::completed(text, thread_id)
            .with_raw(req.include_raw.then_some(payload)))
    }

    /// Stream mode: resolve the thread and open the delta relay.
    ///
    /// Errors before the connection is streaming are returned here; errors
    /// after that arrive as items of [`RelaySession::events`].
    #[instrument(skip(self, req), fields(agent_id = %req.agent_id, thread_id = ?req.thread_id))]
    pub async fn ask_stream(&self, req: &ChatRequest) -> Result<RelaySession, OrchestrateError> {
        let token = self.tokens.acquire().await?;
        let headers = auth_headers(&token)?;

        let thread_id = thread::resolve_thread(
            self.transport.as_ref(),
            self.endpoints.messages_url(),
            &headers,
            &req.query,
            req.thread_id.as_deref(),
        )
        .await?;

        let body = json!(Message::user(&req.query, &req.agent_id, Some(&thread_id)));

        let events = relay::relay(
            self.transport.as_ref(),
            &self.endpoints.stream_url(self.stream_timeout_ms),
            &headers,
            &body,
        )
        .await?;

        tracing::info!(name: "orchestrate.stream.open", thread_id = %thread_id, "Relaying deltas");
        Ok(RelaySession { thread_id, events })
    }
}
