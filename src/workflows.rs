//! Threshold rules over a metrics sample and the workflows they trigger.
//!
//! Each rule compares one metric against a fixed limit. Every rule that
//! fires names a workflow, which is then started upstream with one
//! authenticated POST carrying the posted sample as its inputs. Rules are
//! evaluated in table order and triggers run one after another, so the
//! report lists actions in the same order.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::instrument;

use crate::error::OrchestrateError;
use crate::upstream::{TokenSource, Transport, auth_headers};

/// One threshold rule: `field > threshold` starts `workflow`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rule {
    pub field: &'static str,
    pub threshold: f64,
    pub workflow: &'static str,
}

/// Rule table, in evaluation order.
pub const RULES: &[Rule] = &[
    Rule {
        field: "co2_emissions",
        threshold: 100.0,
        workflow: "CarbonAuditWorkflow",
    },
    Rule {
        field: "waste_level",
        threshold: 80.0,
        workflow: "WasteCollectionWorkflow",
    },
    Rule {
        field: "energy_usage",
        threshold: 12_000.0,
        workflow: "EnergyOptimizationWorkflow",
    },
];

/// Workflows whose rule fires for `metrics`.
///
/// Missing or non-numeric fields read as zero and never fire. The
/// comparison is strict: a value equal to the threshold does not fire.
pub fn matching_workflows(metrics: &Value) -> Vec<&'static str> {
    RULES
        .iter()
        .filter(|rule| {
            metrics
                .get(rule.field)
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                > rule.threshold
        })
        .map(|rule| rule.workflow)
        .collect()
}

/// Outcome of one triggered workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeredAction {
    pub workflow: String,
    /// Upstream reply, or `{"error": ...}` when the trigger failed.
    pub result: Value,
}

/// Reply of `/analyze`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub actions: Vec<TriggeredAction>,
}

/// Starts workflows on the upstream instance.
#[derive(Clone)]
pub struct WorkflowTrigger {
    tokens: Arc<dyn TokenSource>,
    transport: Arc<dyn Transport>,
    url: Option<String>,
}

impl std::fmt::Debug for WorkflowTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowTrigger")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

fn error_value(err: &impl std::fmt::Display) -> Value {
    json!({ "error": err.to_string() })
}

impl WorkflowTrigger {
    pub fn new(
        tokens: Arc<dyn TokenSource>,
        transport: Arc<dyn Transport>,
        url: Option<String>,
    ) -> Self {
        Self {
            tokens,
            transport,
            url,
        }
    }

    /// Evaluate the rules and start every matching workflow.
    ///
    /// Trigger failures are reported per action and never fail the whole
    /// analysis. One token is acquired per call, and only when a rule fired.
    #[instrument(skip_all, fields(matched = tracing::field::Empty))]
    pub async fn analyze(&self, metrics: &Value) -> AnalysisReport {
        let workflows = matching_workflows(metrics);
        tracing::Span::current().record("matched", workflows.len());
        if workflows.is_empty() {
            return AnalysisReport {
                actions: Vec::new(),
            };
        }

        let headers = match self.url.as_deref() {
            None => Err(error_value(&"workflow endpoint not configured")),
            Some(_) => match self.tokens.acquire().await {
                Ok(token) => auth_headers(&token).map_err(|e| error_value(&e)),
                Err(e) => {
                    tracing::warn!(name: "workflows.auth.failed", error = %e, "Token acquisition failed");
                    Err(error_value(&e))
                }
            },
        };

        let mut actions = Vec::with_capacity(workflows.len());
        for workflow in workflows {
            let result = match (&headers, self.url.as_deref()) {
                (Ok(headers), Some(url)) => {
                    let body = json!({ "name": workflow, "inputs": { "metrics": metrics } });
                    self.trigger(url, headers, &body)
                        .await
                        .unwrap_or_else(|e| error_value(&e))
                }
                (Err(failure), _) => failure.clone(),
                (Ok(_), None) => error_value(&"workflow endpoint not configured"),
            };
            tracing::info!(
                name: "workflows.triggered",
                workflow,
                ok = result.get("error").is_none(),
                "Workflow triggered"
            );
            actions.push(TriggeredAction {
                workflow: workflow.to_string(),
                result,
            });
        }

        AnalysisReport { actions }
    }

    async fn trigger(
        &self,
        url: &str,
        headers: &reqwest::header::HeaderMap,
        body: &Value,
    ) -> Result<Value, OrchestrateError> {
        self.transport.post(url, headers, body).await?.into_json()
    }
}
