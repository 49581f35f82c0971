//! Workflow executor — one execution record per firing.
//!
//! Three-phase so the audit log stays truthful: the record is inserted as
//! `pending`, every action runs with per-action error capture, then the
//! record is finalized to `success` or `failed` from the aggregated
//! outcomes. A failed action never aborts its siblings.

use reno_core::{RenoError, Result};

use crate::clock::DayClock;
use crate::execution::{ExecutionStatus, WorkflowExecution};
use crate::notify::{Notification, NotificationKind, NotifyPriority};
use crate::persistence::SchedulerDb;
use crate::tasks::TaskPriority;
use crate::workflow::{Action, Trigger, TriggerEvent, WorkflowDefinition};

pub struct WorkflowExecutor<'a> {
    db: &'a SchedulerDb,
    clock: DayClock,
}

impl<'a> WorkflowExecutor<'a> {
    pub fn new(db: &'a SchedulerDb, clock: DayClock) -> Self {
        Self { db, clock }
    }

    /// Run one firing of a workflow. Errors only on infrastructure
    /// failure (the execution record itself cannot be written); action
    /// failures are captured in the returned record.
    pub fn execute(
        &self,
        def: &WorkflowDefinition,
        event: &TriggerEvent,
    ) -> Result<WorkflowExecution> {
        let mut execution =
            WorkflowExecution::pending(&def.id, serde_json::to_value(event)?, event.timestamp);
        self.db.insert_execution(&execution)?;

        let mut executed = Vec::new();
        let mut failures = Vec::new();
        for action in &def.actions {
            match self.run_action(def, event, action) {
                Ok(()) => executed.push(action.kind().to_string()),
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Action '{}' of workflow '{}' failed: {e}",
                        action.kind(),
                        def.name
                    );
                    failures.push(format!("{}: {e}", action.kind()));
                }
            }
        }

        let (status, error) = if failures.is_empty() {
            (ExecutionStatus::Success, None)
        } else {
            (ExecutionStatus::Failed, Some(failures.join("; ")))
        };
        self.db
            .finalize_execution(&execution.id, status, error.as_deref(), &executed)?;
        execution.status = status;
        execution.error = error;
        execution.executed_actions = executed;

        // The once-per-day guard for scheduled workflows. Only a
        // successful run arms it, so a failed dispatch retries while the
        // window is still open.
        if status == ExecutionStatus::Success && event.kind == Trigger::SCHEDULED {
            self.db.touch_last_executed(&def.id, event.timestamp)?;
        }

        tracing::info!(
            "⚡ Workflow '{}' executed ({}, {} action(s))",
            def.name,
            status.as_str(),
            execution.executed_actions.len()
        );
        Ok(execution)
    }

    fn run_action(
        &self,
        def: &WorkflowDefinition,
        event: &TriggerEvent,
        action: &Action,
    ) -> Result<()> {
        match action {
            Action::SendNotification {
                title,
                message,
                priority,
            } => self.send_notification(def, event, title, message, priority),
        }
    }

    fn send_notification(
        &self,
        def: &WorkflowDefinition,
        event: &TriggerEvent,
        title: &Option<String>,
        message: &Option<String>,
        priority: &Option<NotifyPriority>,
    ) -> Result<()> {
        let Some(user) = event
            .recipient
            .clone()
            .or_else(|| def.created_by.clone())
        else {
            return Err(RenoError::Action(format!(
                "no recipient resolvable for workflow '{}'",
                def.name
            )));
        };

        let title = title.clone().unwrap_or_else(|| default_title(event));
        let message = message.clone().unwrap_or_else(|| default_message(def, event));
        let mut n = Notification::new(&user, notification_kind(event), &title, &message, event.timestamp);
        n.project_id = Some(event.project_id.clone());
        n.priority = (*priority).unwrap_or_else(|| default_priority(event));
        n.metadata = event.data.clone();
        n.task_id = event.task_id.clone();
        if event.daily_dedup() {
            n.dedup_day = Some(self.clock.today(event.timestamp));
        }

        if !self.db.insert_notification(&n)? {
            // same-day duplicate, suppressed by the sink's uniqueness invariant
            tracing::debug!(
                "Duplicate notification suppressed (task {:?}, kind {})",
                n.task_id,
                n.kind.as_str()
            );
        }
        Ok(())
    }
}

fn notification_kind(event: &TriggerEvent) -> NotificationKind {
    match event.kind.as_str() {
        Trigger::DUE_DATE_APPROACHING => NotificationKind::DueDateApproaching,
        Trigger::TASK_STATUS_CHANGED => NotificationKind::TaskStatusChanged,
        _ => NotificationKind::Workflow,
    }
}

fn default_title(event: &TriggerEvent) -> String {
    match event.kind.as_str() {
        Trigger::DUE_DATE_APPROACHING => "Task due soon".to_string(),
        Trigger::TASK_STATUS_CHANGED => "Task status changed".to_string(),
        _ => "Workflow triggered".to_string(),
    }
}

fn default_message(def: &WorkflowDefinition, event: &TriggerEvent) -> String {
    let data = &event.data;
    match event.kind.as_str() {
        Trigger::DUE_DATE_APPROACHING => format!(
            "\"{}\" is due on {} ({} day(s) from now) — workflow '{}'",
            data["title"].as_str().unwrap_or("a task"),
            data["due_date"].as_str().unwrap_or("?"),
            data["days_until_due"].as_i64().unwrap_or(0),
            def.name
        ),
        Trigger::TASK_STATUS_CHANGED => format!(
            "\"{}\" moved from {} to {} — workflow '{}'",
            data["title"].as_str().unwrap_or("a task"),
            data["from"].as_str().unwrap_or("?"),
            data["to"].as_str().unwrap_or("?"),
            def.name
        ),
        _ => format!(
            "Scheduled workflow '{}' ran at {}",
            def.name,
            data["scheduled_for"].as_str().unwrap_or("?")
        ),
    }
}

fn default_priority(event: &TriggerEvent) -> NotifyPriority {
    event.data["priority"]
        .as_str()
        .and_then(TaskPriority::parse)
        .map(NotifyPriority::from)
        .unwrap_or(NotifyPriority::Normal)
}
