//! API route handlers for the gateway.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use reno_scheduler::{TaskStatus, TriggerScanner};

use super::server::AppState;

/// Health check endpoint.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "reno-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// System information endpoint.
pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime = state.start_time.elapsed();
    Json(json!({
        "service": "reno-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime.as_secs(),
        "database": state.config.database.path.display().to_string(),
        "scheduler": {
            "utc_offset_minutes": state.config.scheduler.utc_offset_minutes,
            "schedule_window_minutes": state.config.scheduler.schedule_window_minutes,
            "tick_interval_secs": state.config.scheduler.tick_interval_secs,
        },
    }))
}

/// Run one scan tick. The external cron's entrypoint: returns 200 with a
/// per-scan summary, or 500 when a top-level store call fails.
pub async fn run_scan(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let db = state.db.lock().await;
    let scanner = TriggerScanner::new(&db, &state.config.scheduler);
    match scanner.run() {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": report.summary(),
                "report": report,
                "timestamp": Utc::now().to_rfc3339(),
            })),
        ),
        Err(e) => {
            tracing::error!("❌ Scan invocation failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": e.to_string(),
                    "timestamp": Utc::now().to_rfc3339(),
                })),
            )
        }
    }
}

/// Event intake for the task_status_changed trigger. The owning app
/// calls this after it has updated its task row.
pub async fn task_status_event(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let task_id = body["task_id"].as_str().unwrap_or("");
    let from = body["old_status"].as_str().and_then(TaskStatus::parse);
    let to = body["new_status"].as_str().and_then(TaskStatus::parse);
    let actor = body["actor"].as_str().filter(|s| !s.is_empty());

    let (Some(from), Some(to)) = (from, to) else {
        return bad_request("old_status and new_status must be valid task statuses");
    };
    if task_id.is_empty() {
        return bad_request("task_id is required");
    }

    let db = state.db.lock().await;
    let scanner = TriggerScanner::new(&db, &state.config.scheduler);
    match scanner.handle_task_status_changed(task_id, from, to, actor) {
        Ok((fired, errors)) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": format!("{fired} workflow(s) fired, {errors} error(s)"),
                "timestamp": Utc::now().to_rfc3339(),
            })),
        ),
        Err(e) => {
            tracing::error!("❌ Status event failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": e.to_string(),
                    "timestamp": Utc::now().to_rfc3339(),
                })),
            )
        }
    }
}

fn bad_request(msg: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "success": false,
            "error": msg,
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}

/// Recent workflow executions — the audit log.
pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let limit = params
        .get("limit")
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(20)
        .min(200);

    let db = state.db.lock().await;
    match db.recent_executions(limit) {
        Ok(executions) => {
            let rows: Vec<_> = executions
                .iter()
                .map(|e| {
                    json!({
                        "id": e.id,
                        "workflow_id": e.workflow_id,
                        "status": e.status.as_str(),
                        "error": e.error,
                        "executed_actions": e.executed_actions,
                        "trigger": e.trigger_snapshot["kind"],
                        "executed_at": e.executed_at.to_rfc3339(),
                    })
                })
                .collect();
            Json(json!({"ok": true, "executions": rows, "count": rows.len()}))
        }
        Err(e) => Json(json!({"ok": false, "error": e.to_string()})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use reno_core::RenoConfig;
    use reno_scheduler::{
        Action, SchedulerDb, Task, TaskPriority, Trigger, WorkflowDefinition,
    };

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            config: RenoConfig::default(),
            db: Arc::new(tokio::sync::Mutex::new(
                SchedulerDb::open_in_memory().unwrap(),
            )),
            start_time: std::time::Instant::now(),
        })
    }

    async fn seed_scenario(state: &Arc<AppState>) {
        let db = state.db.lock().await;
        db.save_definition(&WorkflowDefinition::new(
            "p1",
            "due soon",
            Trigger::DueDateApproaching {
                days_before: 2,
                priority_filter: None,
            },
            vec![Action::SendNotification {
                title: None,
                message: None,
                priority: None,
            }],
        ))
        .unwrap();
        db.upsert_task(&Task {
            id: "t1".into(),
            project_id: "p1".into(),
            title: "Paint hallway".into(),
            status: reno_scheduler::TaskStatus::InProgress,
            priority: TaskPriority::Medium,
            due_date: Some(Utc::now().date_naive() + Duration::days(2)),
            assignee: Some("alice".into()),
            created_by: None,
            created_at: Utc::now(),
        })
        .unwrap();
    }

    #[tokio::test]
    async fn test_health() {
        let result = health_check().await;
        assert_eq!(result.0["status"], "ok");
    }

    #[tokio::test]
    async fn test_run_scan_empty_db() {
        let (status, body) = run_scan(State(test_state())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.0["success"].as_bool().unwrap());
        assert!(body.0["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_run_scan_fires_workflow() {
        let state = test_state();
        seed_scenario(&state).await;

        let (status, body) = run_scan(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.0["report"]["due_date"], 1);

        let db = state.db.lock().await;
        let notifications = db.recent_notifications(10).unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].user_id, "alice");
    }

    #[tokio::test]
    async fn test_task_status_event_validation() {
        let (status, body) = task_status_event(
            State(test_state()),
            Json(json!({"task_id": "t1", "old_status": "nonsense"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.0["success"].as_bool().unwrap());

        let (status, _) = task_status_event(
            State(test_state()),
            Json(json!({"old_status": "todo", "new_status": "done"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_task_status_event_ok() {
        let state = test_state();
        seed_scenario(&state).await;

        let (status, body) = task_status_event(
            State(state),
            Json(json!({
                "task_id": "t1",
                "old_status": "in_progress",
                "new_status": "done",
                "actor": "carol",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        // no task_status_changed workflow configured → nothing fired
        assert!(body.0["message"].as_str().unwrap().starts_with("0 workflow"));
    }

    #[tokio::test]
    async fn test_list_executions() {
        let state = test_state();
        seed_scenario(&state).await;
        run_scan(State(state.clone())).await;

        let result = list_executions(State(state), Query(HashMap::new())).await;
        assert!(result.0["ok"].as_bool().unwrap());
        assert_eq!(result.0["count"], 1);
        assert_eq!(result.0["executions"][0]["status"], "success");
    }
}
