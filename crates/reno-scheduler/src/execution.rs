//! Workflow execution records — the audit log.
//!
//! One record per firing, written in three phases: inserted as `pending`,
//! then finalized to `success` or `failed` once every action has
//! resolved. The record keeps a soft reference to its definition — the
//! definition may later be deleted or deactivated without invalidating
//! history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    /// The trigger payload that caused this run, verbatim.
    pub trigger_snapshot: Value,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    /// Kinds of the actions that completed, in order.
    pub executed_actions: Vec<String>,
    pub executed_at: DateTime<Utc>,
}

impl WorkflowExecution {
    pub fn pending(workflow_id: &str, trigger_snapshot: Value, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            trigger_snapshot,
            status: ExecutionStatus::Pending,
            error: None,
            executed_actions: Vec::new(),
            executed_at: at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "success" => Some(ExecutionStatus::Success),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}
