//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use agent_run_relay::error::OrchestrateError;
use agent_run_relay::orchestrate::{Endpoints, Orchestrator, PollSettings};
use agent_run_relay::upstream::{
    AccessToken, TokenSource, Transport, UpstreamResponse, UpstreamStream,
};
use agent_run_relay::workflows::WorkflowTrigger;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde_json::Value;

pub const RUNS_URL: &str = "https://api.example.com/v1/orchestrate/runs";
pub const WORKFLOWS_URL: &str = "https://api.example.com/v1/orchestrate/digital-employees/allskills";

/// One recorded outbound call.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub authorization: Option<String>,
}

/// What the stream endpoint answers with.
pub struct ScriptedStream {
    pub status: u16,
    pub chunks: Vec<Result<String, OrchestrateError>>,
}

#[derive(Default)]
struct Script {
    posts: VecDeque<Result<UpstreamResponse, OrchestrateError>>,
    gets: VecDeque<Result<UpstreamResponse, OrchestrateError>>,
    stream: Option<ScriptedStream>,
    calls: Vec<Call>,
}

/// Transport that replays queued replies and records every call.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Script>>,
}

pub fn ok(body: Value) -> Result<UpstreamResponse, OrchestrateError> {
    Ok(UpstreamResponse {
        status: 200,
        body: body.to_string(),
    })
}

pub fn reply(status: u16, body: &str) -> Result<UpstreamResponse, OrchestrateError> {
    Ok(UpstreamResponse {
        status,
        body: body.to_string(),
    })
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_post(&self, resp: Result<UpstreamResponse, OrchestrateError>) -> &Self {
        self.inner.lock().unwrap().posts.push_back(resp);
        self
    }

    pub fn on_get(&self, resp: Result<UpstreamResponse, OrchestrateError>) -> &Self {
        self.inner.lock().unwrap().gets.push_back(resp);
        self
    }

    pub fn on_stream(&self, status: u16, chunks: Vec<Result<String, OrchestrateError>>) -> &Self {
        self.inner.lock().unwrap().stream = Some(ScriptedStream { status, chunks });
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count(&self, method: &Method) -> usize {
        self.calls().iter().filter(|c| c.method == *method).count()
    }

    fn record(&self, method: Method, url: &str, headers: &HeaderMap, body: Option<&Value>) {
        let authorization = headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        self.inner.lock().unwrap().calls.push(Call {
            method,
            url: url.to_string(),
            body: body.cloned(),
            authorization,
        });
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn post(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &Value,
    ) -> Result<UpstreamResponse, OrchestrateError> {
        self.record(Method::POST, url, headers, Some(body));
        self.inner
            .lock()
            .unwrap()
            .posts
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected POST {url}"))
    }

    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<UpstreamResponse, OrchestrateError> {
        self.record(Method::GET, url, headers, None);
        let next = self.inner.lock().unwrap().gets.pop_front();
        match next {
            Some(resp) => resp,
            // Keep reporting the run as running once the script is exhausted.
            None => ok(serde_json::json!({ "status": "running" })),
        }
    }

    async fn open_stream(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: &Value,
    ) -> Result<UpstreamStream, OrchestrateError> {
        self.record(method, url, headers, Some(body));
        let scripted = self
            .inner
            .lock()
            .unwrap()
            .stream
            .take()
            .unwrap_or_else(|| panic!("unexpected stream open {url}"));
        let chunks = futures::stream::iter(
            scripted
                .chunks
                .into_iter()
                .map(|c| c.map(Bytes::from)),
        )
        .boxed();
        Ok(UpstreamStream {
            status: scripted.status,
            chunks,
        })
    }
}

/// Token source with a fixed token, or a fixed failure.
pub struct StaticTokenSource {
    pub fail: bool,
}

#[async_trait::async_trait]
impl TokenSource for StaticTokenSource {
    async fn acquire(&self) -> Result<AccessToken, OrchestrateError> {
        if self.fail {
            Err(OrchestrateError::Auth {
                status: Some(400),
                body: "invalid apikey".to_string(),
            })
        } else {
            Ok(AccessToken::new("tok-1"))
        }
    }
}

pub fn orchestrator(transport: &ScriptedTransport, polling: PollSettings) -> Orchestrator {
    orchestrator_with_tokens(transport, polling, false)
}

pub fn orchestrator_with_tokens(
    transport: &ScriptedTransport,
    polling: PollSettings,
    fail_tokens: bool,
) -> Orchestrator {
    Orchestrator::new(
        Arc::new(StaticTokenSource { fail: fail_tokens }),
        Arc::new(transport.clone()),
        Endpoints::new(RUNS_URL, None, None).unwrap(),
        polling,
        120_000,
    )
}

pub fn workflow_trigger(
    transport: &ScriptedTransport,
    url: Option<&str>,
    fail_tokens: bool,
) -> WorkflowTrigger {
    WorkflowTrigger::new(
        Arc::new(StaticTokenSource { fail: fail_tokens }),
        Arc::new(transport.clone()),
        url.map(ToString::to_string),
    )
}

/// One NDJSON line carrying a single text delta.
pub fn delta_line(text: &str) -> String {
    format!(
        "{}\n",
        serde_json::json!({
            "event": "message.delta",
            "data": { "delta": { "content": [{ "response_type": "text", "text": text }] } }
        })
    )
}
