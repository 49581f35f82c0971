//! Trigger scanner — discovers (workflow, entity) pairs whose trigger
//! condition is newly satisfied and hands each match to the executor.
//!
//! One scanner instance is one scan tick: it captures a single logical
//! "now" at construction so every check in the tick agrees on the time.
//! Items are processed independently — a failure in one definition or
//! task is logged and counted, never aborting the rest of the tick. Only
//! a top-level store failure (listing definitions, querying tasks) fails
//! the invocation.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::Serialize;

use reno_core::{Result, SchedulerConfig};

use crate::clock::DayClock;
use crate::executor::WorkflowExecutor;
use crate::notify::{Notification, NotificationKind};
use crate::persistence::SchedulerDb;
use crate::tasks::{Task, TaskStatus};
use crate::workflow::{Schedule, StoredDefinition, Trigger, TriggerEvent, WorkflowDefinition};

/// Outcome of one scan tick.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanReport {
    pub due_date: usize,
    pub scheduled: usize,
    pub overdue: usize,
    pub errors: usize,
}

impl ScanReport {
    pub fn total(&self) -> usize {
        self.due_date + self.scheduled + self.overdue
    }

    pub fn summary(&self) -> String {
        format!(
            "{} due-date trigger(s), {} scheduled workflow(s), {} overdue alert(s), {} error(s)",
            self.due_date, self.scheduled, self.overdue, self.errors
        )
    }
}

pub struct TriggerScanner<'a> {
    db: &'a SchedulerDb,
    clock: DayClock,
    window_minutes: i64,
    now: DateTime<Utc>,
}

impl<'a> TriggerScanner<'a> {
    pub fn new(db: &'a SchedulerDb, cfg: &SchedulerConfig) -> Self {
        Self::at(db, cfg, Utc::now())
    }

    /// Scanner pinned to an explicit tick time.
    pub fn at(db: &'a SchedulerDb, cfg: &SchedulerConfig, now: DateTime<Utc>) -> Self {
        Self {
            db,
            clock: DayClock::new(cfg.utc_offset_minutes),
            window_minutes: cfg.schedule_window_minutes,
            now,
        }
    }

    fn executor(&self) -> WorkflowExecutor<'a> {
        WorkflowExecutor::new(self.db, self.clock)
    }

    /// One full tick: all three periodic scans.
    pub fn run(&self) -> Result<ScanReport> {
        let mut report = ScanReport::default();

        let (fired, errors) = self.scan_due_date_approaching()?;
        report.due_date = fired;
        report.errors += errors;

        let (fired, errors) = self.scan_scheduled()?;
        report.scheduled = fired;
        report.errors += errors;

        let (fired, errors) = self.scan_overdue()?;
        report.overdue = fired;
        report.errors += errors;

        if report.total() > 0 || report.errors > 0 {
            tracing::info!("🔔 Scan complete: {}", report.summary());
        }
        Ok(report)
    }

    // ─── due_date_approaching ──────────────────────────────────

    /// Fire workflows for tasks whose due date lands exactly
    /// `days_before` days from today. Returns (fired, errors).
    pub fn scan_due_date_approaching(&self) -> Result<(usize, usize)> {
        let rows = self.db.active_definitions(Trigger::DUE_DATE_APPROACHING)?;
        let mut fired = 0;
        let mut errors = 0;
        for stored in rows {
            let name = stored.name.clone();
            match self.process_due_date_definition(stored) {
                Ok((f, e)) => {
                    fired += f;
                    errors += e;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Workflow '{name}' skipped: {e}");
                    errors += 1;
                }
            }
        }
        Ok((fired, errors))
    }

    fn process_due_date_definition(&self, stored: StoredDefinition) -> Result<(usize, usize)> {
        let def = WorkflowDefinition::decode(stored)?;
        let Trigger::DueDateApproaching {
            days_before,
            ref priority_filter,
        } = def.trigger
        else {
            return Ok((0, 0));
        };

        let threshold = self.clock.today(self.now) + Duration::days(days_before);
        let tasks = self
            .db
            .tasks_due_on(&def.project_id, threshold, priority_filter.as_deref())?;

        let executor = self.executor();
        let mut fired = 0;
        let mut errors = 0;
        for task in tasks {
            let event = TriggerEvent::due_date(&task, days_before, self.now);
            match executor.execute(&def, &event) {
                Ok(_) => fired += 1,
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Workflow '{}' failed for task '{}': {e}",
                        def.name,
                        task.id
                    );
                    errors += 1;
                }
            }
        }
        Ok((fired, errors))
    }

    // ─── scheduled ─────────────────────────────────────────────

    /// Fire scheduled workflows whose window around `schedule_time` is
    /// open and which have not run yet this local day.
    pub fn scan_scheduled(&self) -> Result<(usize, usize)> {
        let rows = self.db.active_definitions(Trigger::SCHEDULED)?;
        let mut fired = 0;
        let mut errors = 0;
        for stored in rows {
            let name = stored.name.clone();
            match self.process_scheduled_definition(stored) {
                Ok(f) => fired += f,
                Err(e) => {
                    tracing::warn!("⚠️ Workflow '{name}' skipped: {e}");
                    errors += 1;
                }
            }
        }
        Ok((fired, errors))
    }

    fn process_scheduled_definition(&self, stored: StoredDefinition) -> Result<usize> {
        let def = WorkflowDefinition::decode(stored)?;
        let Trigger::Scheduled { schedule } = def.trigger else {
            return Ok(0);
        };
        if !self.schedule_due(&schedule, def.last_executed) {
            return Ok(0);
        }

        let scheduled_for = self.clock.today(self.now).and_time(schedule.at());
        let event = TriggerEvent::schedule(&def.name, &def.project_id, scheduled_for, self.now);
        // a successful run arms the once-per-day guard via last_executed
        self.executor().execute(&def, &event)?;
        Ok(1)
    }

    fn schedule_due(&self, schedule: &Schedule, last_executed: Option<DateTime<Utc>>) -> bool {
        // at most once per local calendar day
        if let Some(last) = last_executed
            && self.clock.local_day(last) == self.clock.today(self.now)
        {
            return false;
        }

        let day_matches = match schedule {
            Schedule::Daily { .. } => true,
            Schedule::Weekly { weekday, .. } => self.clock.weekday(self.now) == *weekday,
        };
        if !day_matches {
            return false;
        }

        let at = schedule.at();
        let target = i64::from(at.hour()) * 60 + i64::from(at.minute());
        (self.clock.minutes_of_day(self.now) - target).abs() <= self.window_minutes
    }

    // ─── overdue ───────────────────────────────────────────────

    /// Unconditional system alerts for tasks due strictly before today.
    /// Bypasses workflow definitions; at most one alert per task per
    /// local day.
    pub fn scan_overdue(&self) -> Result<(usize, usize)> {
        let today = self.clock.today(self.now);
        let tasks = self.db.overdue_tasks(today)?;
        let mut fired = 0;
        let mut errors = 0;
        for task in tasks {
            match self.process_overdue_task(&task, today) {
                Ok(f) => fired += f,
                Err(e) => {
                    tracing::warn!("⚠️ Overdue alert for task '{}' failed: {e}", task.id);
                    errors += 1;
                }
            }
        }
        Ok((fired, errors))
    }

    fn process_overdue_task(&self, task: &Task, today: NaiveDate) -> Result<usize> {
        if self.db.notification_exists_for_task_on_day(
            &task.id,
            NotificationKind::TaskOverdue,
            today,
        )? {
            return Ok(0);
        }
        let Some(due) = task.due_date else {
            return Ok(0);
        };
        let days_overdue = (today - due).num_days();
        let Some(alert) = Notification::overdue_alert(task, days_overdue, today, self.now) else {
            tracing::debug!("Overdue task '{}' has nobody to notify", task.id);
            return Ok(0);
        };
        // insert-or-ignore: a concurrent tick may have won the race
        Ok(usize::from(self.db.insert_notification(&alert)?))
    }

    // ─── task_status_changed (event intake) ────────────────────

    /// The owning application reports a status transition it has already
    /// applied to its task row. Fires matching workflows in the task's
    /// project. Returns (fired, errors).
    pub fn handle_task_status_changed(
        &self,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
        actor: Option<&str>,
    ) -> Result<(usize, usize)> {
        let Some(task) = self.db.get_task(task_id)? else {
            tracing::warn!("⚠️ Status change reported for unknown task '{task_id}'");
            return Ok((0, 1));
        };

        let rows = self.db.active_definitions(Trigger::TASK_STATUS_CHANGED)?;
        let mut fired = 0;
        let mut errors = 0;
        for stored in rows {
            if stored.project_id != task.project_id {
                continue;
            }
            let name = stored.name.clone();
            match self.process_status_definition(stored, &task, from, to, actor) {
                Ok(f) => fired += f,
                Err(e) => {
                    tracing::warn!("⚠️ Workflow '{name}' skipped: {e}");
                    errors += 1;
                }
            }
        }
        Ok((fired, errors))
    }

    fn process_status_definition(
        &self,
        stored: StoredDefinition,
        task: &Task,
        from: TaskStatus,
        to: TaskStatus,
        actor: Option<&str>,
    ) -> Result<usize> {
        let def = WorkflowDefinition::decode(stored)?;
        let Trigger::TaskStatusChanged {
            from: want_from,
            to: want_to,
        } = def.trigger
        else {
            return Ok(0);
        };
        if want_from.is_some_and(|w| w != from) || want_to.is_some_and(|w| w != to) {
            return Ok(0);
        }

        let event = TriggerEvent::status_change(task, from, to, actor, self.now);
        self.executor().execute(&def, &event)?;
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;
    use crate::notify::NotifyPriority;
    use crate::tasks::TaskPriority;
    use crate::workflow::Action;
    use chrono::{NaiveTime, TimeZone, Weekday};
    use serde_json::json;

    // 2026-08-06 is a Thursday
    fn tick(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 6, h, m, 0).unwrap()
    }

    fn cfg() -> SchedulerConfig {
        SchedulerConfig::default()
    }

    fn seed_task(
        db: &SchedulerDb,
        id: &str,
        due: Option<NaiveDate>,
        status: TaskStatus,
        priority: TaskPriority,
    ) {
        db.upsert_task(&Task {
            id: id.into(),
            project_id: "p1".into(),
            title: format!("task {id}"),
            status,
            priority,
            due_date: due,
            assignee: Some("alice".into()),
            created_by: Some("bob".into()),
            created_at: Utc::now(),
        })
        .unwrap();
    }

    fn notify_action() -> Action {
        Action::SendNotification {
            title: None,
            message: None,
            priority: None,
        }
    }

    fn due_date_def(days_before: i64, filter: Option<Vec<TaskPriority>>) -> WorkflowDefinition {
        WorkflowDefinition::new(
            "p1",
            "due soon",
            Trigger::DueDateApproaching {
                days_before,
                priority_filter: filter,
            },
            vec![notify_action()],
        )
    }

    fn daily_def(h: u32, m: u32) -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new(
            "p1",
            "daily digest",
            Trigger::Scheduled {
                schedule: Schedule::Daily {
                    at: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
                },
            },
            vec![notify_action()],
        );
        def.created_by = Some("bob".into());
        def
    }

    #[test]
    fn test_due_date_exact_day_match() {
        let db = SchedulerDb::open_in_memory().unwrap();
        db.save_definition(&due_date_def(2, None)).unwrap();
        let now = tick(9, 0);
        let today = DayClock::new(0).today(now);

        seed_task(&db, "hit", Some(today + Duration::days(2)), TaskStatus::InProgress, TaskPriority::Medium);
        seed_task(&db, "early", Some(today + Duration::days(1)), TaskStatus::Todo, TaskPriority::Medium);
        seed_task(&db, "late", Some(today + Duration::days(3)), TaskStatus::Todo, TaskPriority::Medium);
        seed_task(&db, "finished", Some(today + Duration::days(2)), TaskStatus::Done, TaskPriority::Medium);

        let scanner = TriggerScanner::at(&db, &cfg(), now);
        let (fired, errors) = scanner.scan_due_date_approaching().unwrap();
        assert_eq!((fired, errors), (1, 0));

        // exactly one notification, addressed to the task's assignee
        let notifications = db.recent_notifications(10).unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].user_id, "alice");
        assert_eq!(notifications[0].kind, NotificationKind::DueDateApproaching);
        assert_eq!(notifications[0].task_id.as_deref(), Some("hit"));

        // the trigger snapshot records what fired and why
        let executions = db.recent_executions(10).unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Success);
        let snapshot = &executions[0].trigger_snapshot;
        assert_eq!(snapshot["kind"], "due_date_approaching");
        assert_eq!(snapshot["data"]["days_until_due"], 2);
        assert_eq!(snapshot["data"]["task_id"], "hit");
    }

    #[test]
    fn test_priority_filter() {
        let db = SchedulerDb::open_in_memory().unwrap();
        db.save_definition(&due_date_def(
            1,
            Some(vec![TaskPriority::High, TaskPriority::Urgent]),
        ))
        .unwrap();
        let now = tick(9, 0);
        let due = DayClock::new(0).today(now) + Duration::days(1);

        seed_task(&db, "medium", Some(due), TaskStatus::Todo, TaskPriority::Medium);
        let scanner = TriggerScanner::at(&db, &cfg(), now);
        assert_eq!(scanner.scan_due_date_approaching().unwrap(), (0, 0));

        seed_task(&db, "urgent", Some(due), TaskStatus::Todo, TaskPriority::Urgent);
        assert_eq!(scanner.scan_due_date_approaching().unwrap(), (1, 0));
        let notifications = db.recent_notifications(10).unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].task_id.as_deref(), Some("urgent"));
        assert_eq!(notifications[0].priority, NotifyPriority::Urgent);
    }

    #[test]
    fn test_rescan_is_pure_and_notifications_dedup() {
        let db = SchedulerDb::open_in_memory().unwrap();
        db.save_definition(&due_date_def(2, None)).unwrap();
        let now = tick(9, 0);
        seed_task(
            &db,
            "hit",
            Some(DayClock::new(0).today(now) + Duration::days(2)),
            TaskStatus::InProgress,
            TaskPriority::Medium,
        );

        let scanner = TriggerScanner::at(&db, &cfg(), now);
        // same trigger set on both scans — pure function of current state
        assert_eq!(scanner.scan_due_date_approaching().unwrap(), (1, 0));
        assert_eq!(scanner.scan_due_date_approaching().unwrap(), (1, 0));
        // both firings are audited, but the sink deduped the second write
        assert_eq!(db.recent_executions(10).unwrap().len(), 2);
        assert_eq!(db.recent_notifications(10).unwrap().len(), 1);
    }

    #[test]
    fn test_scheduled_window_and_daily_guard() {
        let db = SchedulerDb::open_in_memory().unwrap();
        db.save_definition(&daily_def(9, 0)).unwrap();

        // within the 15-minute window → fires
        let scanner = TriggerScanner::at(&db, &cfg(), tick(9, 5));
        assert_eq!(scanner.scan_scheduled().unwrap(), (1, 0));

        // again the same day, still in the window → guarded
        let scanner = TriggerScanner::at(&db, &cfg(), tick(9, 10));
        assert_eq!(scanner.scan_scheduled().unwrap(), (0, 0));

        // next day → fires again
        let next_day = Utc.with_ymd_and_hms(2026, 8, 7, 9, 2, 0).unwrap();
        let scanner = TriggerScanner::at(&db, &cfg(), next_day);
        assert_eq!(scanner.scan_scheduled().unwrap(), (1, 0));
    }

    #[test]
    fn test_scheduled_outside_window() {
        let db = SchedulerDb::open_in_memory().unwrap();
        db.save_definition(&daily_def(9, 0)).unwrap();
        let scanner = TriggerScanner::at(&db, &cfg(), tick(10, 0));
        assert_eq!(scanner.scan_scheduled().unwrap(), (0, 0));
        // window is symmetric: a scan slightly before the time also fires
        let scanner = TriggerScanner::at(&db, &cfg(), tick(8, 50));
        assert_eq!(scanner.scan_scheduled().unwrap(), (1, 0));
    }

    #[test]
    fn test_weekly_schedule_day_match() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let mut def = daily_def(9, 0);
        def.trigger = Trigger::Scheduled {
            schedule: Schedule::Weekly {
                weekday: Weekday::Thu,
                at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            },
        };
        db.save_definition(&def).unwrap();

        // 2026-08-06 is a Thursday
        let scanner = TriggerScanner::at(&db, &cfg(), tick(9, 3));
        assert_eq!(scanner.scan_scheduled().unwrap(), (1, 0));

        // Friday same time → wrong day
        let mut monday_def = daily_def(9, 0);
        monday_def.trigger = Trigger::Scheduled {
            schedule: Schedule::Weekly {
                weekday: Weekday::Mon,
                at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            },
        };
        db.save_definition(&monday_def).unwrap();
        let scanner = TriggerScanner::at(&db, &cfg(), tick(9, 3));
        assert_eq!(scanner.scan_scheduled().unwrap(), (0, 0));
    }

    #[test]
    fn test_overdue_once_per_day() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let now = tick(9, 0);
        let today = DayClock::new(0).today(now);
        seed_task(&db, "late", Some(today - Duration::days(5)), TaskStatus::Todo, TaskPriority::High);
        seed_task(&db, "ontime", Some(today), TaskStatus::Todo, TaskPriority::High);

        let scanner = TriggerScanner::at(&db, &cfg(), now);
        assert_eq!(scanner.scan_overdue().unwrap(), (1, 0));
        let n = &db.recent_notifications(10).unwrap()[0];
        assert_eq!(n.kind, NotificationKind::TaskOverdue);
        assert_eq!(n.metadata["days_overdue"], 5);

        // any number of re-runs the same day add nothing
        assert_eq!(scanner.scan_overdue().unwrap(), (0, 0));
        assert_eq!(scanner.scan_overdue().unwrap(), (0, 0));
        assert_eq!(db.recent_notifications(10).unwrap().len(), 1);

        // the next day alerts again
        let tomorrow = Utc.with_ymd_and_hms(2026, 8, 7, 9, 0, 0).unwrap();
        let scanner = TriggerScanner::at(&db, &cfg(), tomorrow);
        assert_eq!(scanner.scan_overdue().unwrap(), (1, 0));
        assert_eq!(db.recent_notifications(10).unwrap().len(), 2);
    }

    #[test]
    fn test_bad_definition_does_not_block_later_ones() {
        let db = SchedulerDb::open_in_memory().unwrap();
        // first definition has an unintelligible schedule config
        db.insert_definition_json(
            "wf-bad",
            "p1",
            "broken",
            Trigger::SCHEDULED,
            &json!({"schedule_type": "daily"}), // schedule_time missing
            &json!([{"type": "send_notification"}]),
            Some("bob"),
        )
        .unwrap();
        db.save_definition(&daily_def(9, 0)).unwrap();

        let scanner = TriggerScanner::at(&db, &cfg(), tick(9, 5));
        let (fired, errors) = scanner.scan_scheduled().unwrap();
        assert_eq!(fired, 1);
        assert_eq!(errors, 1);
        assert_eq!(db.recent_notifications(10).unwrap().len(), 1);
    }

    #[test]
    fn test_unsupported_action_is_per_definition_error() {
        let db = SchedulerDb::open_in_memory().unwrap();
        db.insert_definition_json(
            "wf-future",
            "p1",
            "future feature",
            Trigger::DUE_DATE_APPROACHING,
            &json!({"days_before": 1}),
            &json!([{"type": "escalate_to_manager"}]),
            Some("bob"),
        )
        .unwrap();
        db.save_definition(&due_date_def(1, None)).unwrap();
        let now = tick(9, 0);
        seed_task(
            &db,
            "hit",
            Some(DayClock::new(0).today(now) + Duration::days(1)),
            TaskStatus::Todo,
            TaskPriority::Medium,
        );

        let scanner = TriggerScanner::at(&db, &cfg(), now);
        let (fired, errors) = scanner.scan_due_date_approaching().unwrap();
        // the valid definition still fired; the unknown action failed loudly
        assert_eq!((fired, errors), (1, 1));
    }

    #[test]
    fn test_status_change_event() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let mut def = WorkflowDefinition::new(
            "p1",
            "done watcher",
            Trigger::TaskStatusChanged {
                from: None,
                to: Some(TaskStatus::Done),
            },
            vec![notify_action()],
        );
        def.created_by = Some("bob".into());
        db.save_definition(&def).unwrap();
        seed_task(&db, "t1", None, TaskStatus::InProgress, TaskPriority::Medium);

        let scanner = TriggerScanner::at(&db, &cfg(), tick(12, 0));
        // transition into done → fires, addressed to the acting user
        let (fired, errors) = scanner
            .handle_task_status_changed("t1", TaskStatus::InProgress, TaskStatus::Done, Some("carol"))
            .unwrap();
        assert_eq!((fired, errors), (1, 0));
        let n = &db.recent_notifications(10).unwrap()[0];
        assert_eq!(n.user_id, "carol");
        assert_eq!(n.kind, NotificationKind::TaskStatusChanged);

        // a different transition does not match
        let (fired, _) = scanner
            .handle_task_status_changed("t1", TaskStatus::Todo, TaskStatus::Review, None)
            .unwrap();
        assert_eq!(fired, 0);

        // unknown task is a counted, non-fatal error
        let (fired, errors) = scanner
            .handle_task_status_changed("ghost", TaskStatus::Todo, TaskStatus::Done, None)
            .unwrap();
        assert_eq!((fired, errors), (0, 1));
    }

    #[test]
    fn test_full_tick_report() {
        let db = SchedulerDb::open_in_memory().unwrap();
        db.save_definition(&due_date_def(2, None)).unwrap();
        let now = tick(9, 0);
        let today = DayClock::new(0).today(now);
        seed_task(&db, "soon", Some(today + Duration::days(2)), TaskStatus::Todo, TaskPriority::Medium);
        seed_task(&db, "late", Some(today - Duration::days(1)), TaskStatus::Todo, TaskPriority::Medium);

        let report = TriggerScanner::at(&db, &cfg(), now).run().unwrap();
        assert_eq!(report.due_date, 1);
        assert_eq!(report.scheduled, 0);
        assert_eq!(report.overdue, 1);
        assert_eq!(report.errors, 0);
        assert_eq!(report.total(), 2);
        assert!(report.summary().contains("1 due-date trigger(s)"));
    }
}
