use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::Action;

pub const DISPATCH_EVENT: &str = "approved_actions.dispatch";

pub const DISPATCH_ID_HEADER: &str = "x-nanoclaw-dispatch-id";
pub const SIGNATURE_TS_HEADER: &str = "x-nanoclaw-signature-ts";
pub const SIGNATURE_HEADER: &str = "x-nanoclaw-signature";
pub const RUNNER_SECRET_HEADER: &str = "x-ops-runner-secret";

/// Signed batch of approved actions posted to the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEnvelope {
    pub event: String,
    #[serde(rename = "dispatchId")]
    pub dispatch_id: String,
    #[serde(rename = "dispatchedAt")]
    pub dispatched_at: DateTime<Utc>,
    pub source: String,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Ok,
    Failed,
    Blocked,
    Skipped,
}

/// Per-action execution outcome, positionally zipped to the dispatched
/// batch. `exit_code` is 0 only when the action completed successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub action_id: String,
    pub status: ActionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ActionResult {
    pub fn ok(action_id: impl Into<String>, stdout: String, duration_ms: u64) -> Self {
        Self {
            action_id: action_id.into(),
            status: ActionStatus::Ok,
            stdout,
            stderr: String::new(),
            exit_code: 0,
            executed_at: Utc::now(),
            duration_ms,
        }
    }

    pub fn failed(action_id: impl Into<String>, stderr: String, duration_ms: u64) -> Self {
        Self {
            action_id: action_id.into(),
            status: ActionStatus::Failed,
            stdout: String::new(),
            stderr,
            exit_code: 1,
            executed_at: Utc::now(),
            duration_ms,
        }
    }

    pub fn blocked(action_id: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            status: ActionStatus::Blocked,
            stdout: String::new(),
            stderr: cause.into(),
            exit_code: 1,
            executed_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn skipped(action_id: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            status: ActionStatus::Skipped,
            stdout: String::new(),
            stderr: cause.into(),
            exit_code: 0,
            executed_at: Utc::now(),
            duration_ms: 0,
        }
    }
}

/// Runner reply for one dispatch; `results` is index-aligned with the
/// envelope's `actions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub success: bool,
    pub dispatch_id: String,
    pub results: Vec<ActionResult>,
}
