//! # RenoTimeline Scheduler
//!
//! The workflow automation core: scans project state for trigger
//! conditions, fires user-configured workflows, and writes in-app
//! notifications. Runs one short scan per invocation — an external cron
//! (or the gateway's optional built-in loop) supplies the heartbeat.
//!
//! ## Architecture
//! ```text
//! Invocation (HTTP endpoint, CLI, or interval loop)
//!   └── TriggerScanner
//!         ├── due_date_approaching: tasks due exactly N days out
//!         ├── scheduled: daily/weekly HH:MM windows, once per local day
//!         ├── overdue: unconditional system alerts, deduped per day
//!         └── task_status_changed: event intake from the owning app
//!               └── on match → WorkflowExecutor
//!                     ├── execution record: pending → success/failed
//!                     └── actions → Notification sink (SQLite)
//! ```

pub mod clock;
pub mod execution;
pub mod executor;
pub mod notify;
pub mod persistence;
pub mod scanner;
pub mod tasks;
pub mod workflow;

pub use clock::DayClock;
pub use execution::{ExecutionStatus, WorkflowExecution};
pub use executor::WorkflowExecutor;
pub use notify::{Notification, NotificationKind, NotifyPriority};
pub use persistence::SchedulerDb;
pub use scanner::{ScanReport, TriggerScanner};
pub use tasks::{Task, TaskPriority, TaskStatus};
pub use workflow::{Action, Schedule, Trigger, TriggerEvent, WorkflowDefinition};
