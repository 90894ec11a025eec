//! Agent Run Relay
//!
//! A thin HTTP service in front of a remote conversational "run" API. It
//! exchanges an API key for a bearer token, submits user queries to an
//! agent, and returns the answer either as one normalized result (polling
//! the run when the answer is not inline) or as a live SSE relay of text
//! deltas.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP server with SSE streaming
//! - **Orchestration**: token → thread → submit → poll or relay
//! - **Upstream**: token exchange and HTTP transport behind traits
//! - **Metrics**: demo rolling buffer with similarity search and forecast
//! - **Workflows**: threshold rules that start upstream workflows
//!
//! # Modules
//!
//! - [`config`]: layered configuration (defaults, file, env, CLI)
//! - [`error`]: the orchestration error taxonomy
//! - [`metrics`]: demo metrics buffer
//! - [`normalized`]: result and SSE frame shapes
//! - [`orchestrate`]: request modes and their steps
//! - [`server`]: router and handlers
//! - [`telemetry`]: tracing subscriber setup
//! - [`upstream`]: token sources and transport
//! - [`workflows`]: threshold rules and workflow triggers

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod normalized;
pub mod orchestrate;
pub mod server;
pub mod telemetry;
pub mod upstream;
pub mod workflows;

use std::sync::Arc;
use std::time::Duration;

use metrics::MetricsBuffer;
use orchestrate::Orchestrator;
use workflows::WorkflowTrigger;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Upstream run orchestrator.
    pub orchestrator: Arc<Orchestrator>,
    /// Starts workflows for `/analyze`.
    pub workflows: Arc<WorkflowTrigger>,
    /// Demo metrics buffer.
    pub metrics: MetricsBuffer,
    /// Agent used when a request names none.
    pub default_agent: Option<String>,
    /// Tick of the live metrics stream.
    pub metrics_interval: Duration,
}
