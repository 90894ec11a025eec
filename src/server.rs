use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::config::AppConfig;
use crate::error::OrchestrateError;
use crate::metrics::{MetricProbe, MetricsBuffer, forecast};
use crate::normalized::{DeltaFrame, NormalizedResult, sse_frame};
use crate::orchestrate::{ChatRequest, Endpoints, Orchestrator, RelaySession};
use crate::upstream::{
    ApiKeyTokenSource, CachedTokenSource, ReqwestTransport, TokenSource, Transport,
};
use crate::workflows::{AnalysisReport, WorkflowTrigger};

/// Build the shared state from settings already checked by
/// [`AppConfig::validate`].
///
/// The orchestrator and the workflow trigger share one token source and one
/// HTTP client.
pub fn build_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let upstream = &config.upstream;

    let http = reqwest::Client::builder()
        .connect_timeout(upstream.connect_timeout())
        .build()?;

    let mut tokens: Arc<dyn TokenSource> = Arc::new(ApiKeyTokenSource::new(
        http.clone(),
        &upstream.token_url,
        &upstream.api_key,
    ));
    if upstream.cache_token {
        tokens = Arc::new(CachedTokenSource::new(tokens));
    }
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::with_client(http));

    let endpoints = Endpoints::new(
        &upstream.runs_url,
        upstream.run_status_url(),
        upstream.messages_url(),
    )?;

    let orchestrator = Orchestrator::new(
        Arc::clone(&tokens),
        Arc::clone(&transport),
        endpoints,
        config.polling.settings(),
        upstream.stream_timeout_ms,
    );
    let workflows = WorkflowTrigger::new(
        tokens,
        transport,
        upstream.workflows_url().map(ToString::to_string),
    );

    Ok(AppState {
        orchestrator: Arc::new(orchestrator),
        workflows: Arc::new(workflows),
        metrics: MetricsBuffer::new(config.metrics.capacity),
        default_agent: upstream.default_agent().map(ToString::to_string),
        metrics_interval: Duration::from_secs(config.metrics.interval_secs.max(1)),
    })
}

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let state = build_state(&config)?;

    info!(
        name: "upstream.config.loaded",
        runs_url = %config.upstream.runs_url,
        workflows_url = ?config.upstream.workflows_url(),
        poll_timeout_secs = config.polling.timeout_secs,
        poll_interval_ms = config.polling.interval_ms,
        cache_token = config.upstream.cache_token,
        "Upstream configuration loaded"
    );

    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// All routes, with permissive CORS and HTTP tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/chat", post(api_chat))
        .route("/chat/stream", get(api_chat_stream))
        .route("/metrics/stream", get(api_metrics_stream))
        .route("/metrics/recent", get(api_metrics_recent))
        .route("/metrics/similar", post(api_metrics_similar))
        .route("/metrics/forecast", get(api_metrics_forecast))
        .route("/analyze", post(api_analyze))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Chat fields, from the query string or a JSON body.
#[derive(Debug, Default, Deserialize)]
struct ChatParams {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    include_raw: bool,
}

impl ChatParams {
    /// Fill fields missing from `self` with those of `other`.
    fn or(self, other: Self) -> Self {
        Self {
            query: self.query.or(other.query),
            agent_id: self.agent_id.or(other.agent_id),
            thread_id: self.thread_id.or(other.thread_id),
            include_raw: self.include_raw || other.include_raw,
        }
    }

    fn thread_hint(&self) -> String {
        self.thread_id.clone().unwrap_or_default()
    }

    fn into_request(self, default_agent: Option<&str>) -> Result<ChatRequest, String> {
        let query = self
            .query
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| "query must not be empty".to_string())?;
        let agent_id = self
            .agent_id
            .filter(|a| !a.trim().is_empty())
            .or_else(|| default_agent.map(ToString::to_string))
            .ok_or_else(|| "agent_id is required".to_string())?;

        Ok(ChatRequest {
            query,
            agent_id,
            thread_id: self.thread_id.filter(|t| !t.is_empty()),
            include_raw: self.include_raw,
        })
    }
}

fn status_for(err: &OrchestrateError) -> StatusCode {
    match err {
        OrchestrateError::PollTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        OrchestrateError::Cancelled => StatusCode::REQUEST_TIMEOUT,
        OrchestrateError::Auth { .. }
        | OrchestrateError::Upstream { .. }
        | OrchestrateError::RunFailed { .. }
        | OrchestrateError::Network(_) => StatusCode::BAD_GATEWAY,
    }
}

/// GET / - Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "agent relay active" }))
}

/// POST /chat - Poll mode, one normalized result.
async fn api_chat(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
    body: Option<Json<ChatParams>>,
) -> (StatusCode, Json<NormalizedResult>) {
    let params = match body {
        Some(Json(body)) => params.or(body),
        None => params,
    };
    let thread_hint = params.thread_hint();
    let req = match params.into_request(state.default_agent.as_deref()) {
        Ok(req) => req,
        Err(msg) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(NormalizedResult::invalid(msg, thread_hint)),
            );
        }
    };

    tracing::info!(
        agent_id = %req.agent_id,
        thread_id = ?req.thread_id,
        query_len = req.query.len(),
        "Received chat request"
    );

    // Dropping this handler (client gone) cancels the poll loop.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match state.orchestrator.ask(&req, &cancel).await {
        Ok(result) => (StatusCode::OK, Json(result)),
        Err(e) => {
            tracing::error!(error = %e, kind = e.kind(), "Chat request failed");
            (status_for(&e), Json(NormalizedResult::from_error(&e, thread_hint)))
        }
    }
}

/// GET /chat/stream - Stream mode, one SSE frame per text delta.
async fn api_chat_stream(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
) -> Response {
    let thread_hint = params.thread_hint();
    let req = match params.into_request(state.default_agent.as_deref()) {
        Ok(req) => req,
        Err(msg) => {
            let frame = DeltaFrame {
                error_message: true,
                response: msg,
                thread_id: thread_hint,
            };
            return build_sse_response(Body::from(sse_frame(&frame)));
        }
    };

    let orchestrator = Arc::clone(&state.orchestrator);
    let request_id = uuid::Uuid::new_v4().to_string();

    tracing::info!(
        request_id = %request_id,
        agent_id = %req.agent_id,
        thread_id = ?req.thread_id,
        "Starting SSE stream"
    );

    let sse_stream = async_stream::stream! {
        let RelaySession { thread_id, mut events } = match orchestrator.ask_stream(&req).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "Failed to open relay");
                yield Ok::<String, Infallible>(sse_frame(&DeltaFrame::error(&e, thread_hint)));
                return;
            }
        };

        let mut sent = 0usize;
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if let Some(text) = event.delta_text.filter(|t| !t.is_empty()) {
                        sent += 1;
                        yield Ok::<String, Infallible>(sse_frame(&DeltaFrame::delta(text, &thread_id)));
                    }
                }
                Err(e) => {
                    tracing::error!(request_id = %request_id, error = %e, frames = sent, "Relay interrupted");
                    if sent == 0 {
                        yield Ok::<String, Infallible>(sse_frame(&DeltaFrame::error(&e, &thread_id)));
                    }
                    break;
                }
            }
        }

        tracing::info!(request_id = %request_id, frames = sent, "Stream complete");
    };

    build_sse_response(Body::from_stream(sse_stream))
}

#[derive(Debug, Deserialize)]
struct RecentParams {
    #[serde(default = "default_recent_limit")]
    limit: usize,
}

fn default_recent_limit() -> usize {
    30
}

#[derive(Debug, Deserialize)]
struct SimilarParams {
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_top_k() -> usize {
    5
}

/// GET /metrics/stream - Live demo samples, each stored as it is sent.
async fn api_metrics_stream(State(state): State<AppState>) -> impl IntoResponse {
    let stream = state.metrics.live(state.metrics_interval).map(|sample| {
        let json = serde_json::to_string(&sample).unwrap_or_else(|_| "{}".to_string());
        Ok::<Event, Infallible>(Event::default().data(json))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// GET /metrics/recent - Last N stored samples.
async fn api_metrics_recent(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> impl IntoResponse {
    Json(state.metrics.recent(params.limit))
}

/// POST /metrics/similar - Nearest stored samples to the posted one.
async fn api_metrics_similar(
    State(state): State<AppState>,
    Query(params): Query<SimilarParams>,
    Json(probe): Json<MetricProbe>,
) -> impl IntoResponse {
    Json(state.metrics.similar(&probe, params.top_k))
}

/// GET /metrics/forecast - Trend forecast over the last N samples.
async fn api_metrics_forecast(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> impl IntoResponse {
    Json(forecast(&state.metrics.recent(params.limit)))
}

/// POST /analyze - Start the workflows whose threshold the sample crosses.
async fn api_analyze(
    State(state): State<AppState>,
    Json(metrics): Json<serde_json::Value>,
) -> Json<AnalysisReport> {
    let report = state.workflows.analyze(&metrics).await;
    tracing::info!(actions = report.actions.len(), "Metrics analyzed");
    Json(report)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn build_sse_response(body: Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    h.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    h.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    resp
}
