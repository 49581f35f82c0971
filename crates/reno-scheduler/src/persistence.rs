//! SQLite-backed persistence for workflow definitions, tasks, execution
//! records, and the notification sink.
//!
//! The handle is constructed explicitly and injected into the scanner and
//! executor — there is no process-wide client. Tests run against an
//! in-memory database.

use chrono::{DateTime, NaiveDate, Utc};
use std::path::Path;

use reno_core::Result;

use crate::execution::{ExecutionStatus, WorkflowExecution};
use crate::notify::{Notification, NotificationKind, NotifyPriority};
use crate::tasks::{Task, TaskPriority, TaskStatus};
use crate::workflow::{StoredDefinition, WorkflowDefinition};

/// Persistence handle for all scheduler data.
pub struct SchedulerDb {
    conn: rusqlite::Connection,
}

impl SchedulerDb {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path)?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            -- User-configured workflow rules (trigger → actions)
            CREATE TABLE IF NOT EXISTS workflow_definitions (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                name TEXT NOT NULL,
                trigger_type TEXT NOT NULL,      -- 'due_date_approaching', 'scheduled', 'task_status_changed'
                trigger_config TEXT NOT NULL,    -- JSON
                actions TEXT NOT NULL,           -- JSON array of tagged actions
                is_active INTEGER NOT NULL DEFAULT 1,
                created_by TEXT,
                last_executed TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_definitions_trigger
                ON workflow_definitions(trigger_type, is_active);

            -- Tasks, owned by the rest of the application; read-only here
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'todo',
                priority TEXT NOT NULL DEFAULT 'medium',
                due_date TEXT,                   -- YYYY-MM-DD
                assignee TEXT,
                created_by TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(project_id, due_date);

            -- Append-only audit log of workflow firings
            CREATE TABLE IF NOT EXISTS workflow_executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,       -- soft reference, definition may be deleted later
                trigger_snapshot TEXT NOT NULL,  -- JSON
                status TEXT NOT NULL DEFAULT 'pending',
                error TEXT,
                executed_actions TEXT NOT NULL DEFAULT '[]',
                executed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_workflow
                ON workflow_executions(workflow_id, executed_at);

            -- In-app notifications, read and mutated by the UI afterwards
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                project_id TEXT,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                priority TEXT NOT NULL DEFAULT 'normal',
                metadata TEXT NOT NULL DEFAULT '{}',
                read INTEGER NOT NULL DEFAULT 0,
                task_id TEXT,
                dedup_day TEXT,                  -- local calendar day, YYYY-MM-DD
                created_at TEXT NOT NULL
            );
            -- At most one notification per (task, kind, local day).
            -- Makes the check-then-insert dedup race-proof across
            -- overlapping scan invocations.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_daily
                ON notifications(task_id, kind, dedup_day)
                WHERE task_id IS NOT NULL AND dedup_day IS NOT NULL;
            ",
        )?;
        Ok(())
    }

    // ─── Workflow definitions ──────────────────────────────────

    pub fn save_definition(&self, def: &WorkflowDefinition) -> Result<()> {
        let (trigger_type, trigger_config) = def.trigger.encode();
        let actions = crate::workflow::Action::encode_list(&def.actions);
        self.conn.execute(
            "INSERT OR REPLACE INTO workflow_definitions
             (id, project_id, name, trigger_type, trigger_config, actions,
              is_active, created_by, last_executed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                def.id,
                def.project_id,
                def.name,
                trigger_type,
                trigger_config.to_string(),
                actions.to_string(),
                def.is_active as i32,
                def.created_by,
                def.last_executed.map(|t| t.to_rfc3339()),
                def.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Insert a definition in its raw stored shape — the form the
    /// application's definition editor writes. The scanner decodes (and
    /// rejects) the config when it reads it back.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_definition_json(
        &self,
        id: &str,
        project_id: &str,
        name: &str,
        trigger_type: &str,
        trigger_config: &serde_json::Value,
        actions: &serde_json::Value,
        created_by: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO workflow_definitions
             (id, project_id, name, trigger_type, trigger_config, actions,
              is_active, created_by, last_executed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, NULL, ?8)",
            rusqlite::params![
                id,
                project_id,
                name,
                trigger_type,
                trigger_config.to_string(),
                actions.to_string(),
                created_by,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Active definitions of one trigger type, trigger/actions still raw.
    pub fn active_definitions(&self, trigger_type: &str) -> Result<Vec<StoredDefinition>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, name, trigger_type, trigger_config, actions,
                    is_active, created_by, last_executed, created_at
             FROM workflow_definitions
             WHERE is_active = 1 AND trigger_type = ?1
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map([trigger_type], |row| {
            let trigger_config: String = row.get(4)?;
            let actions: String = row.get(5)?;
            let last_executed: Option<String> = row.get(8)?;
            let created_at: String = row.get(9)?;
            Ok(StoredDefinition {
                id: row.get(0)?,
                project_id: row.get(1)?,
                name: row.get(2)?,
                trigger_type: row.get(3)?,
                trigger_config: serde_json::from_str(&trigger_config)
                    .unwrap_or(serde_json::Value::Null),
                actions: serde_json::from_str(&actions).unwrap_or(serde_json::Value::Null),
                is_active: row.get::<_, i32>(6)? != 0,
                created_by: row.get(7)?,
                last_executed: last_executed.and_then(parse_ts),
                created_at: parse_ts_or_now(&created_at),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Record a successful scheduled dispatch — the once-per-day guard.
    pub fn touch_last_executed(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE workflow_definitions SET last_executed = ?1 WHERE id = ?2",
            rusqlite::params![at.to_rfc3339(), id],
        )?;
        Ok(())
    }

    // ─── Tasks (collaborator-owned) ────────────────────────────

    /// Upsert a task row. Called by the owning application and by test
    /// fixtures; the scanner itself never writes tasks.
    pub fn upsert_task(&self, task: &Task) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO tasks
             (id, project_id, title, status, priority, due_date, assignee, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                task.id,
                task.project_id,
                task.title,
                task.status.as_str(),
                task.priority.as_str(),
                task.due_date.map(|d| d.to_string()),
                task.assignee,
                task.created_by,
                task.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map([id], map_task)?;
        Ok(rows.next().transpose()?)
    }

    /// Non-terminal tasks in a project due exactly on one day, optionally
    /// narrowed to a set of priorities.
    pub fn tasks_due_on(
        &self,
        project_id: &str,
        due: NaiveDate,
        priorities: Option<&[TaskPriority]>,
    ) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE project_id = ?1 AND due_date = ?2 AND status != 'done'
             ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![project_id, due.to_string()],
            map_task,
        )?;
        let tasks = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(match priorities {
            Some(filter) => tasks
                .into_iter()
                .filter(|t| filter.contains(&t.priority))
                .collect(),
            None => tasks,
        })
    }

    /// Non-terminal tasks due strictly before a day, across all projects.
    pub fn overdue_tasks(&self, before: NaiveDate) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE due_date IS NOT NULL AND due_date < ?1 AND status != 'done'
             ORDER BY due_date"
        ))?;
        let rows = stmt.query_map([before.to_string()], map_task)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ─── Execution log ─────────────────────────────────────────

    pub fn insert_execution(&self, exec: &WorkflowExecution) -> Result<()> {
        self.conn.execute(
            "INSERT INTO workflow_executions
             (id, workflow_id, trigger_snapshot, status, error, executed_actions, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                exec.id,
                exec.workflow_id,
                exec.trigger_snapshot.to_string(),
                exec.status.as_str(),
                exec.error,
                serde_json::to_string(&exec.executed_actions)?,
                exec.executed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Settle a pending execution once all its actions have resolved.
    pub fn finalize_execution(
        &self,
        id: &str,
        status: ExecutionStatus,
        error: Option<&str>,
        executed_actions: &[String],
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE workflow_executions
             SET status = ?1, error = ?2, executed_actions = ?3
             WHERE id = ?4",
            rusqlite::params![
                status.as_str(),
                error,
                serde_json::to_string(executed_actions)?,
                id,
            ],
        )?;
        Ok(())
    }

    pub fn recent_executions(&self, limit: usize) -> Result<Vec<WorkflowExecution>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, workflow_id, trigger_snapshot, status, error, executed_actions, executed_at
             FROM workflow_executions ORDER BY executed_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            let snapshot: String = row.get(2)?;
            let status: String = row.get(3)?;
            let executed: String = row.get(5)?;
            let executed_at: String = row.get(6)?;
            Ok(WorkflowExecution {
                id: row.get(0)?,
                workflow_id: row.get(1)?,
                trigger_snapshot: serde_json::from_str(&snapshot)
                    .unwrap_or(serde_json::Value::Null),
                status: ExecutionStatus::parse(&status).unwrap_or(ExecutionStatus::Pending),
                error: row.get(4)?,
                executed_actions: serde_json::from_str(&executed).unwrap_or_default(),
                executed_at: parse_ts_or_now(&executed_at),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ─── Notification sink ─────────────────────────────────────

    /// Insert a notification. Returns false when the daily-dedup
    /// uniqueness invariant suppressed the row.
    pub fn insert_notification(&self, n: &Notification) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO notifications
             (id, user_id, project_id, kind, title, message, priority,
              metadata, read, task_id, dedup_day, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                n.id,
                n.user_id,
                n.project_id,
                n.kind.as_str(),
                n.title,
                n.message,
                n.priority.as_str(),
                n.metadata.to_string(),
                n.read as i32,
                n.task_id,
                n.dedup_day.map(|d| d.to_string()),
                n.created_at.to_rfc3339(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Same-day existence check backing the overdue dedup.
    pub fn notification_exists_for_task_on_day(
        &self,
        task_id: &str,
        kind: NotificationKind,
        day: NaiveDate,
    ) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM notifications
                 WHERE task_id = ?1 AND kind = ?2 AND dedup_day = ?3
             )",
            rusqlite::params![task_id, kind.as_str(), day.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn recent_notifications(&self, limit: usize) -> Result<Vec<Notification>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, project_id, kind, title, message, priority,
                    metadata, read, task_id, dedup_day, created_at
             FROM notifications ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            let kind: String = row.get(3)?;
            let priority: String = row.get(6)?;
            let metadata: String = row.get(7)?;
            let dedup_day: Option<String> = row.get(10)?;
            let created_at: String = row.get(11)?;
            Ok(Notification {
                id: row.get(0)?,
                user_id: row.get(1)?,
                project_id: row.get(2)?,
                kind: NotificationKind::parse(&kind).unwrap_or(NotificationKind::Workflow),
                title: row.get(4)?,
                message: row.get(5)?,
                priority: NotifyPriority::parse(&priority).unwrap_or(NotifyPriority::Normal),
                metadata: serde_json::from_str(&metadata).unwrap_or_default(),
                read: row.get::<_, i32>(8)? != 0,
                task_id: row.get(9)?,
                dedup_day: dedup_day.and_then(|d| d.parse().ok()),
                created_at: parse_ts_or_now(&created_at),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

const TASK_COLUMNS: &str =
    "id, project_id, title, status, priority, due_date, assignee, created_by, created_at";

fn map_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(3)?;
    let priority: String = row.get(4)?;
    let due_date: Option<String> = row.get(5)?;
    let created_at: String = row.get(8)?;
    Ok(Task {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Todo),
        priority: TaskPriority::parse(&priority).unwrap_or(TaskPriority::Medium),
        due_date: due_date.and_then(|d| d.parse().ok()),
        assignee: row.get(6)?,
        created_by: row.get(7)?,
        created_at: parse_ts_or_now(&created_at),
    })
}

fn parse_ts(s: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn parse_ts_or_now(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
