//! Workflow definitions — user-configured trigger → action rules.
//!
//! Definitions are created and edited by project owners elsewhere in the
//! application; this crate consumes them read-only (except for the
//! `last_executed` guard on scheduled triggers). Trigger and action
//! configs are stored as JSON and decoded into closed enums here, so an
//! unknown action type is a hard error instead of a silent no-op.

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use reno_core::{RenoError, Result};

use crate::notify::NotifyPriority;
use crate::tasks::{Task, TaskStatus};

/// A workflow rule: when the trigger condition holds, run the actions.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub trigger: Trigger,
    /// Ordered list of effects to perform on firing.
    pub actions: Vec<Action>,
    pub is_active: bool,
    /// Project owner who configured the rule. Fallback notification
    /// recipient for triggers without a task context.
    pub created_by: Option<String>,
    /// Last successful scheduled dispatch. The once-per-local-day guard.
    pub last_executed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn new(project_id: &str, name: &str, trigger: Trigger, actions: Vec<Action>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            trigger,
            actions,
            is_active: true,
            created_by: None,
            last_executed: None,
            created_at: Utc::now(),
        }
    }

    /// Decode a stored row into a typed definition. Fails per-definition
    /// on an unintelligible trigger config or an unsupported action.
    pub fn decode(stored: StoredDefinition) -> Result<Self> {
        let trigger = Trigger::decode(&stored.trigger_type, &stored.trigger_config)?;
        let actions = Action::decode_list(&stored.actions)?;
        Ok(Self {
            id: stored.id,
            project_id: stored.project_id,
            name: stored.name,
            trigger,
            actions,
            is_active: stored.is_active,
            created_by: stored.created_by,
            last_executed: stored.last_executed,
            created_at: stored.created_at,
        })
    }
}

/// A definition row as persisted: trigger and actions still raw JSON.
/// Decoding is deferred so one bad row is a per-definition error, not a
/// failed scan.
#[derive(Debug, Clone)]
pub struct StoredDefinition {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub trigger_type: String,
    pub trigger_config: Value,
    pub actions: Value,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub last_executed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Trigger condition of a workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Task due date lands exactly `days_before` days from today.
    DueDateApproaching {
        days_before: i64,
        /// When set, only tasks with one of these priorities match.
        priority_filter: Option<Vec<crate::tasks::TaskPriority>>,
    },
    /// Fires in a window around a configured local time, at most once
    /// per local calendar day.
    Scheduled { schedule: Schedule },
    /// Event-driven: the owning app reports a status transition.
    TaskStatusChanged {
        from: Option<TaskStatus>,
        to: Option<TaskStatus>,
    },
}

impl Trigger {
    pub const DUE_DATE_APPROACHING: &'static str = "due_date_approaching";
    pub const SCHEDULED: &'static str = "scheduled";
    pub const TASK_STATUS_CHANGED: &'static str = "task_status_changed";

    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::DueDateApproaching { .. } => Self::DUE_DATE_APPROACHING,
            Trigger::Scheduled { .. } => Self::SCHEDULED,
            Trigger::TaskStatusChanged { .. } => Self::TASK_STATUS_CHANGED,
        }
    }

    /// Decode from the stored (trigger_type, trigger_config) pair.
    /// Missing optional fields fall back to defaults (`days_before` = 1);
    /// a missing schedule time or unknown type cannot fire and is an
    /// error.
    pub fn decode(trigger_type: &str, config: &Value) -> Result<Self> {
        match trigger_type {
            Self::DUE_DATE_APPROACHING => {
                let days_before = config["days_before"].as_i64().unwrap_or(1);
                let priority_filter = config["priority_filter"].as_array().map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str())
                        .filter_map(crate::tasks::TaskPriority::parse)
                        .collect()
                });
                Ok(Trigger::DueDateApproaching {
                    days_before,
                    priority_filter,
                })
            }
            Self::SCHEDULED => Ok(Trigger::Scheduled {
                schedule: Schedule::decode(config)?,
            }),
            Self::TASK_STATUS_CHANGED => Ok(Trigger::TaskStatusChanged {
                from: config["from"].as_str().and_then(TaskStatus::parse),
                to: config["to"].as_str().and_then(TaskStatus::parse),
            }),
            other => Err(RenoError::InvalidTrigger(format!(
                "unknown trigger type '{other}'"
            ))),
        }
    }

    /// Encode back to the stored (trigger_type, trigger_config) pair.
    pub fn encode(&self) -> (&'static str, Value) {
        match self {
            Trigger::DueDateApproaching {
                days_before,
                priority_filter,
            } => {
                let mut cfg = json!({ "days_before": days_before });
                if let Some(filter) = priority_filter {
                    cfg["priority_filter"] =
                        Value::from(filter.iter().map(|p| p.as_str()).collect::<Vec<_>>());
                }
                (Self::DUE_DATE_APPROACHING, cfg)
            }
            Trigger::Scheduled { schedule } => (Self::SCHEDULED, schedule.encode()),
            Trigger::TaskStatusChanged { from, to } => {
                let mut cfg = json!({});
                if let Some(from) = from {
                    cfg["from"] = Value::from(from.as_str());
                }
                if let Some(to) = to {
                    cfg["to"] = Value::from(to.as_str());
                }
                (Self::TASK_STATUS_CHANGED, cfg)
            }
        }
    }
}

/// Supported schedule grammar: a daily or weekly local time of day.
/// Cron expressions and monthly schedules are deliberately not supported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Schedule {
    Daily { at: NaiveTime },
    Weekly { weekday: Weekday, at: NaiveTime },
}

impl Schedule {
    fn decode(config: &Value) -> Result<Self> {
        let at = config["schedule_time"]
            .as_str()
            .ok_or_else(|| {
                RenoError::InvalidTrigger("scheduled trigger requires schedule_time".into())
            })
            .and_then(|s| {
                NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| {
                    RenoError::InvalidTrigger(format!("schedule_time '{s}' is not HH:MM"))
                })
            })?;

        match config["schedule_type"].as_str().unwrap_or("daily") {
            "daily" => Ok(Schedule::Daily { at }),
            "weekly" => {
                let weekday = config["weekday"]
                    .as_str()
                    .ok_or_else(|| {
                        RenoError::InvalidTrigger("weekly schedule requires weekday".into())
                    })?
                    .parse::<Weekday>()
                    .map_err(|_| {
                        RenoError::InvalidTrigger(format!(
                            "unknown weekday '{}'",
                            config["weekday"]
                        ))
                    })?;
                Ok(Schedule::Weekly { weekday, at })
            }
            other => Err(RenoError::InvalidTrigger(format!(
                "unsupported schedule_type '{other}' (supported: daily, weekly)"
            ))),
        }
    }

    fn encode(&self) -> Value {
        match self {
            Schedule::Daily { at } => json!({
                "schedule_type": "daily",
                "schedule_time": at.format("%H:%M").to_string(),
            }),
            Schedule::Weekly { weekday, at } => json!({
                "schedule_type": "weekly",
                "schedule_time": at.format("%H:%M").to_string(),
                "weekday": weekday.to_string().to_lowercase(),
            }),
        }
    }

    /// Time of day this schedule targets.
    pub fn at(&self) -> NaiveTime {
        match self {
            Schedule::Daily { at } | Schedule::Weekly { at, .. } => *at,
        }
    }
}

/// An effect performed when a workflow fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    SendNotification {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<NotifyPriority>,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::SendNotification { .. } => "send_notification",
        }
    }

    /// Decode a stored actions array. An action whose type tag is not
    /// implemented fails the whole definition loudly.
    pub fn decode_list(value: &Value) -> Result<Vec<Action>> {
        let items = value.as_array().ok_or_else(|| {
            RenoError::InvalidTrigger("actions must be a JSON array".to_string())
        })?;
        let mut actions = Vec::with_capacity(items.len());
        for item in items {
            match item["type"].as_str() {
                Some("send_notification") => actions.push(serde_json::from_value(item.clone())?),
                Some(other) => return Err(RenoError::UnsupportedAction(other.to_string())),
                None => {
                    return Err(RenoError::UnsupportedAction(
                        "action without a type tag".to_string(),
                    ));
                }
            }
        }
        Ok(actions)
    }

    pub fn encode_list(actions: &[Action]) -> Value {
        Value::from(
            actions
                .iter()
                .map(|a| serde_json::to_value(a).unwrap_or_else(|_| json!({"type": a.kind()})))
                .collect::<Vec<_>>(),
        )
    }
}

/// The trigger payload: a snapshot of the input that caused a firing,
/// persisted verbatim on the execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Which trigger type fired.
    pub kind: String,
    pub project_id: String,
    /// User the resulting notifications should address, when resolvable
    /// from the event itself.
    pub recipient: Option<String>,
    /// Task the event concerns, when any. Drives once-per-day dedup.
    pub task_id: Option<String>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    /// A task's due date landed exactly on the configured threshold.
    pub fn due_date(task: &Task, days_until_due: i64, now: DateTime<Utc>) -> Self {
        Self {
            kind: Trigger::DUE_DATE_APPROACHING.to_string(),
            project_id: task.project_id.clone(),
            recipient: task.recipient().map(String::from),
            task_id: Some(task.id.clone()),
            data: json!({
                "task_id": task.id,
                "title": task.title,
                "priority": task.priority.as_str(),
                "due_date": task.due_date.map(|d| d.to_string()),
                "days_until_due": days_until_due,
                "assignee": task.assignee,
            }),
            timestamp: now,
        }
    }

    /// A scheduled workflow's window opened today.
    pub fn schedule(
        workflow_name: &str,
        project_id: &str,
        scheduled_for: chrono::NaiveDateTime,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: Trigger::SCHEDULED.to_string(),
            project_id: project_id.to_string(),
            recipient: None,
            task_id: None,
            data: json!({
                "workflow": workflow_name,
                "scheduled_for": scheduled_for.to_string(),
            }),
            timestamp: now,
        }
    }

    /// The owning app reported a task status transition.
    pub fn status_change(
        task: &Task,
        from: TaskStatus,
        to: TaskStatus,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: Trigger::TASK_STATUS_CHANGED.to_string(),
            project_id: task.project_id.clone(),
            // prefer the user who caused the change
            recipient: actor.map(String::from).or(task.recipient().map(String::from)),
            task_id: Some(task.id.clone()),
            data: json!({
                "task_id": task.id,
                "title": task.title,
                "from": from.as_str(),
                "to": to.as_str(),
                "actor": actor,
            }),
            timestamp: now,
        }
    }

    /// Whether notifications for this event dedup once per local day.
    pub fn daily_dedup(&self) -> bool {
        self.kind == Trigger::DUE_DATE_APPROACHING
    }
}
