//! Run status polling.

use std::time::Duration;

use reqwest::header::HeaderMap;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::OrchestrateError;
use crate::upstream::Transport;

use super::status::{RunOutcome, RunStatus};

/// Poll loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Wall-clock deadline for the whole loop.
    pub timeout: Duration,
    /// Fixed pause between polls.
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(1),
        }
    }
}

/// Queries a run's status until it reaches a terminal state.
///
/// The interval is fixed. Backoff would change the observable poll timing
/// and is left to a later hardening pass.
#[derive(Clone)]
pub struct RunPoller<'a> {
    transport: &'a dyn Transport,
    status_base: &'a str,
    settings: PollSettings,
}

impl std::fmt::Debug for RunPoller<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunPoller")
            .field("status_base", &self.status_base)
            .field("settings", &self.settings)
            .finish()
    }
}

impl<'a> RunPoller<'a> {
    pub fn new(transport: &'a dyn Transport, status_base: &'a str, settings: PollSettings) -> Self {
        Self {
            transport,
            status_base,
            settings,
        }
    }

    /// URL of the status resource for `run_id`.
    pub fn status_url(&self, run_id: &str) -> String {
        format!("{}/{run_id}", self.status_base.trim_end_matches('/'))
    }

    /// Poll `run_id` and return the terminal success payload.
    ///
    /// Fails with [`OrchestrateError::RunFailed`] on a terminal failure,
    /// [`OrchestrateError::PollTimeout`] once the deadline passes, and
    /// [`OrchestrateError::Cancelled`] as soon as `cancel` fires. No request
    /// is issued after the deadline.
    pub async fn poll(
        &self,
        run_id: &str,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Value, OrchestrateError> {
        let url = self.status_url(run_id);
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let resp = tokio::select! {
                () = cancel.cancelled() => return Err(OrchestrateError::Cancelled),
                resp = self.transport.get(&url, headers) => resp?,
            };
            let payload = resp.into_json()?;
            let status = RunStatus::from_payload(&payload);

            tracing::debug!(
                name: "orchestrate.poll.tick",
                run_id = %run_id,
                attempt,
                status = ?status,
                "Polled run status"
            );

            match status.outcome() {
                RunOutcome::Success => return Ok(payload),
                RunOutcome::Failure => {
                    tracing::warn!(name: "orchestrate.poll.failed", run_id = %run_id, status = ?status, "Run failed");
                    return Err(OrchestrateError::RunFailed { payload });
                }
                RunOutcome::Pending => {}
            }

            let elapsed = started.elapsed();
            let Some(remaining) = self.settings.timeout.checked_sub(elapsed).filter(|r| !r.is_zero())
            else {
                tracing::warn!(name: "orchestrate.poll.timeout", run_id = %run_id, attempts = attempt, "Poll deadline reached");
                return Err(OrchestrateError::PollTimeout {
                    run_id: run_id.to_string(),
                    elapsed,
                });
            };

            tokio::select! {
                () = cancel.cancelled() => return Err(OrchestrateError::Cancelled),
                () = tokio::time::sleep(self.settings.interval.min(remaining)) => {}
            }
        }
    }
}
