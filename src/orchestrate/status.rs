//! Run status normalization.
//!
//! Upstream variants report run progress with different vocabularies. The
//! table below maps every known spelling onto a closed [`RunStatus`]; any
//! other string is [`RunStatus::Unknown`], which is treated as non-terminal
//! so polling continues until the deadline.

/// Known run statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Succeeded,
    Success,
    Done,
    Failed,
    Error,
    Cancelled,
    Unknown,
}

/// Tri-state outcome a poll loop acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Terminal success: stop and extract the answer.
    Success,
    /// Terminal failure: stop and surface the payload.
    Failure,
    /// Keep polling.
    Pending,
}

/// Lowercase upstream spelling → status.
const STATUS_TABLE: &[(&str, RunStatus)] = &[
    ("pending", RunStatus::Pending),
    ("queued", RunStatus::Pending),
    ("running", RunStatus::Running),
    ("in_progress", RunStatus::Running),
    ("completed", RunStatus::Completed),
    ("succeeded", RunStatus::Succeeded),
    ("success", RunStatus::Success),
    ("done", RunStatus::Done),
    ("failed", RunStatus::Failed),
    ("error", RunStatus::Error),
    ("cancelled", RunStatus::Cancelled),
    ("canceled", RunStatus::Cancelled),
];

impl RunStatus {
    /// Case-insensitive lookup; unlisted strings map to `Unknown`.
    pub fn parse(raw: &str) -> Self {
        let needle = raw.trim().to_ascii_lowercase();
        STATUS_TABLE
            .iter()
            .find(|(name, _)| *name == needle)
            .map_or(Self::Unknown, |(_, status)| *status)
    }

    /// Read the `status` field of a poll payload.
    pub fn from_payload(payload: &serde_json::Value) -> Self {
        payload
            .get("status")
            .and_then(serde_json::Value::as_str)
            .map_or(Self::Unknown, Self::parse)
    }

    pub fn outcome(self) -> RunOutcome {
        match self {
            Self::Completed | Self::Succeeded | Self::Success | Self::Done => RunOutcome::Success,
            Self::Failed | Self::Error | Self::Cancelled => RunOutcome::Failure,
            Self::Pending | Self::Running | Self::Unknown => RunOutcome::Pending,
        }
    }
}
