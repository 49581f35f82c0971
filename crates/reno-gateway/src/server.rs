//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use reno_core::RenoConfig;
use reno_scheduler::{SchedulerDb, TriggerScanner};

/// Shared state for the gateway server.
///
/// The database handle sits behind an async mutex: overlapping scan
/// invocations (a slow previous tick plus a new one) serialize on it
/// instead of racing each other.
pub struct AppState {
    pub config: RenoConfig,
    pub db: Arc<tokio::sync::Mutex<SchedulerDb>>,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(shared: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/v1/info", get(super::routes::system_info))
        // the periodic invocation endpoint (external cron)
        .route("/api/v1/scheduler/run", post(super::routes::run_scan))
        // event intake for the task_status_changed trigger
        .route(
            "/api/v1/events/task-status",
            post(super::routes::task_status_event),
        )
        // audit log — where workflow failures surface
        .route("/api/v1/executions", get(super::routes::list_executions))
        .layer(
            CorsLayer::new()
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server.
pub async fn start(config: RenoConfig) -> anyhow::Result<()> {
    let db = SchedulerDb::open(&config.database.path)?;
    tracing::info!("💾 Scheduler DB: {}", config.database.path.display());
    let db = Arc::new(tokio::sync::Mutex::new(db));

    // Optional built-in heartbeat for deployments without an external cron.
    if config.scheduler.tick_interval_secs > 0 {
        let db_clone = db.clone();
        let sched_cfg = config.scheduler.clone();
        tokio::spawn(async move {
            run_tick_loop(db_clone, sched_cfg).await;
        });
    }

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(AppState {
        config,
        db,
        start_time: std::time::Instant::now(),
    });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Background scan loop — the same tick an external cron would drive.
async fn run_tick_loop(
    db: Arc<tokio::sync::Mutex<SchedulerDb>>,
    cfg: reno_core::SchedulerConfig,
) {
    tracing::info!(
        "⏰ Built-in scan loop started (every {}s)",
        cfg.tick_interval_secs
    );
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(cfg.tick_interval_secs));
    loop {
        interval.tick().await;
        let guard = db.lock().await;
        match TriggerScanner::new(&guard, &cfg).run() {
            Ok(report) if report.total() > 0 || report.errors > 0 => {
                tracing::info!("📣 Tick: {}", report.summary());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("⚠️ Scan tick failed: {e}"),
        }
    }
}
