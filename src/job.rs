//! Job and outcome data model.
//!
//! A job is one queued request to run a named automation action for a
//! team/game/credential. Outcomes are the structured result of one action
//! execution and feed the append-only audit log.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a queued job.
pub type JobId = String;

static JOB_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a unique job ID.
pub fn generate_job_id() -> JobId {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let seq = JOB_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("job-{:x}-{:x}", timestamp, seq)
}

/// Get current time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One queued request to execute an automation action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub user_id: i64,
    pub team_id: i64,
    pub game_id: i64,
    pub game_name: String,
    /// Name of the registered script to run (e.g. "recharge").
    pub action: String,
    /// Script-specific parameters (account, amount, ...).
    #[serde(default)]
    pub params: serde_json::Value,
    pub game_credential_id: i64,
    /// Correlator for observability, not authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Queue lifecycle state of a job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Internal queue record for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: JobId,
    pub request: JobRequest,
    pub state: JobState,
    /// Stable partition key (`team:action`) used to serialize jobs that
    /// touch the same external account.
    pub partition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ActionOutcome>,
    /// Infrastructure failure message when the job never produced an outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_ms: Option<u64>,
}

/// Status view returned to producers. Carries the result payload once the
/// job reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ActionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured result of one action execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Set when the submission ran but no confirmation signal was found.
    /// Audited as `unknown` rather than a confirmed failure.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub indeterminate: bool,
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            amount: None,
            username: None,
            indeterminate: false,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            amount: None,
            username: None,
            indeterminate: false,
        }
    }

    /// Failure whose real result is unknown (no confirmation signal found).
    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            indeterminate: true,
            ..Self::fail(message)
        }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Audit status for this outcome.
    pub fn audit_status(&self) -> AuditStatus {
        if self.success {
            AuditStatus::Success
        } else if self.indeterminate {
            AuditStatus::Unknown
        } else {
            AuditStatus::Fail
        }
    }
}

/// Status recorded on the append-only audit log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Fail,
    Unknown,
}

/// Aggregate queue counts for one team, for operational dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}
