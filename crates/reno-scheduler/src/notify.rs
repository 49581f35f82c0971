//! In-app notification model — the sink's row type plus default text
//! builders. The executor and the overdue scan write these; the
//! application UI reads and mutates them afterwards (mark-as-read,
//! delete), which is outside this crate.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::tasks::{Task, TaskPriority};

/// A notification addressed to one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: NotifyPriority,
    /// Freeform context (task id, due date, transition...) for the UI.
    pub metadata: serde_json::Value,
    pub read: bool,
    /// Task this notification concerns, when any.
    pub task_id: Option<String>,
    /// Local calendar day for once-per-day kinds. Together with
    /// (task_id, kind) this is the sink's uniqueness invariant.
    pub dedup_day: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: &str,
        kind: NotificationKind,
        title: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            project_id: None,
            kind,
            title: title.to_string(),
            message: message.to_string(),
            priority: NotifyPriority::Normal,
            metadata: json!({}),
            read: false,
            task_id: None,
            dedup_day: None,
            created_at: at,
        }
    }

    /// Unconditional system alert for an overdue task. Bypasses workflow
    /// definitions entirely. Returns None when the task has nobody to
    /// notify.
    pub fn overdue_alert(
        task: &Task,
        days_overdue: i64,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let recipient = task.recipient()?;
        let due = task.due_date?;
        let mut n = Self::new(
            recipient,
            NotificationKind::TaskOverdue,
            "Task overdue",
            &format!(
                "\"{}\" was due on {} ({} day(s) ago)",
                task.title, due, days_overdue
            ),
            now,
        );
        n.project_id = Some(task.project_id.clone());
        n.priority = match task.priority {
            TaskPriority::Urgent => NotifyPriority::Urgent,
            TaskPriority::High => NotifyPriority::High,
            _ => NotifyPriority::Normal,
        };
        n.metadata = json!({
            "task_id": task.id,
            "due_date": due.to_string(),
            "days_overdue": days_overdue,
        });
        n.task_id = Some(task.id.clone());
        n.dedup_day = Some(today);
        Some(n)
    }
}

/// What produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A user-configured workflow fired.
    Workflow,
    DueDateApproaching,
    TaskOverdue,
    TaskStatusChanged,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Workflow => "workflow",
            NotificationKind::DueDateApproaching => "due_date_approaching",
            NotificationKind::TaskOverdue => "task_overdue",
            NotificationKind::TaskStatusChanged => "task_status_changed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "workflow" => Some(NotificationKind::Workflow),
            "due_date_approaching" => Some(NotificationKind::DueDateApproaching),
            "task_overdue" => Some(NotificationKind::TaskOverdue),
            "task_status_changed" => Some(NotificationKind::TaskStatusChanged),
            _ => None,
        }
    }
}

/// Notification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl NotifyPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyPriority::Low => "low",
            NotifyPriority::Normal => "normal",
            NotifyPriority::High => "high",
            NotifyPriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(NotifyPriority::Low),
            "normal" => Some(NotifyPriority::Normal),
            "high" => Some(NotifyPriority::High),
            "urgent" => Some(NotifyPriority::Urgent),
            _ => None,
        }
    }
}

impl From<TaskPriority> for NotifyPriority {
    fn from(p: TaskPriority) -> Self {
        match p {
            TaskPriority::Low => NotifyPriority::Low,
            TaskPriority::Medium => NotifyPriority::Normal,
            TaskPriority::High => NotifyPriority::High,
            TaskPriority::Urgent => NotifyPriority::Urgent,
        }
    }
}
