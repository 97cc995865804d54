//! HTTP status surface for the scanner.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::circuit_breaker::CircuitBreakerStats;
use crate::governor::{ExecutionSlot, GovernorStats};
use crate::scheduler::{SchedulerState, TaskStatus};
use crate::stats::{ErrorEntry, RunRecord, TodayTotals};
use crate::universe::UniverseStats;
use crate::ScannerState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub scheduler: SchedulerState,
    pub trading_day: NaiveDate,
    pub is_trading_day: bool,
    pub tasks: Vec<TaskStatus>,
    pub live: Vec<ExecutionSlot>,
    pub today: TodayTotals,
    pub governor: GovernorStats,
    pub circuit_breaker: CircuitBreakerStats,
    pub universe: UniverseStats,
    pub recent_errors: Vec<ErrorEntry>,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub task: TaskStatus,
    pub today: Option<RunRecord>,
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct SetEnabledResponse {
    pub task: String,
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub reloaded: bool,
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: "zero-scanner".to_string(),
    })
}

/// Scheduler, tasks, today's totals, breaker and universe
pub async fn get_status(State(state): State<Arc<ScannerState>>) -> Json<StatusResponse> {
    let now = state.clock.now();
    let calendar = state.stats.calendar();

    Json(StatusResponse {
        scheduler: state.scheduler.get_state().await,
        trading_day: calendar.trading_day(now),
        is_trading_day: calendar.is_trading_day_at(now),
        tasks: state.scheduler.task_statuses(),
        live: state.governor.live_slots(),
        today: state.stats.aggregate_today(),
        governor: state.governor.stats(),
        circuit_breaker: state.breaker.stats(),
        universe: state.universe.stats(),
        recent_errors: state.stats.recent_errors(10),
    })
}

/// One task with today's record
pub async fn get_task(
    State(state): State<Arc<ScannerState>>,
    Path(name): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = state
        .scheduler
        .task_statuses()
        .into_iter()
        .find(|t| t.name.eq_ignore_ascii_case(&name))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown task {name}")))?;

    Ok(Json(TaskResponse {
        today: state.stats.get_today(&task.name),
        last_run_at: state.stats.last_run_at(&task.name),
        task,
    }))
}

/// Toggle a task's enabled flag
pub async fn set_task_enabled(
    State(state): State<Arc<ScannerState>>,
    Path(name): Path<String>,
    Json(req): Json<SetEnabledRequest>,
) -> Result<Json<SetEnabledResponse>, ApiError> {
    if !state.registry.set_enabled(&name, req.enabled) {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("unknown task {name}"),
        ));
    }
    Ok(Json(SetEnabledResponse {
        task: name,
        enabled: req.enabled,
    }))
}

/// Re-read enabled flags from the configuration file
pub async fn reload(
    State(state): State<Arc<ScannerState>>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let config = state.reload_config().map_err(|e| {
        tracing::warn!(error = %e, "Configuration reload failed");
        api_error(StatusCode::UNPROCESSABLE_ENTITY, format!("{e:#}"))
    })?;
    state.registry.reload_flags(&config);

    let (enabled, disabled): (Vec<_>, Vec<_>) = state
        .registry
        .tasks()
        .iter()
        .map(|t| t.name.clone())
        .partition(|name| state.registry.is_enabled(name));
    tracing::info!(enabled = enabled.len(), disabled = disabled.len(), "Task flags reloaded");

    Ok(Json(ReloadResponse {
        reloaded: true,
        enabled,
        disabled,
    }))
}

/// Build the status router.
pub fn build_router(state: Arc<ScannerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/tasks/:name", get(get_task))
        .route("/api/v1/tasks/:name/enabled", post(set_task_enabled))
        .route("/api/v1/reload", post(reload))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{ManualClock, SharedClock};
    use crate::data::{DataProvider, ProviderError, RankedSymbol};
    use crate::ScannerService;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use tower::ServiceExt;
    use zero_common::config::{Config, ScheduleConfig, TaskConfig};

    struct Empty;

    #[async_trait]
    impl DataProvider for Empty {
        fn name(&self) -> &str {
            "empty"
        }

        async fn list_ranked_symbols(&self) -> Result<Vec<RankedSymbol>, ProviderError> {
            Ok(Vec::new())
        }
    }

    fn test_state() -> Arc<ScannerState> {
        let mut config = Config::default();
        config.tasks.push(TaskConfig {
            name: "rsi".into(),
            entrypoint: "heartbeat".into(),
            interval_secs: 60,
            schedule: ScheduleConfig::Continuous,
            enabled: true,
            test_mode: false,
            timeout_secs: None,
            universe_cap: None,
            volume_coverage: None,
        });
        let clock: SharedClock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap(),
        ));
        ScannerService::builder(config)
            .provider(Arc::new(Empty))
            .clock(clock)
            .stats_path(None)
            .build()
            .unwrap()
            .state()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["service"], "zero-scanner");
    }

    #[tokio::test]
    async fn test_status_lists_tasks() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/api/v1/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["scheduler"], "stopped");
        assert_eq!(json["tasks"].as_array().unwrap().len(), 2);
        assert_eq!(json["circuit_breaker"]["state"], "closed");
        assert_eq!(json["today"]["runs"], 0);
    }

    #[tokio::test]
    async fn test_get_unknown_task() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/tasks/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_toggle_enabled() {
        let state = test_state();
        let app = build_router(state.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/tasks/RSI/enabled")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"enabled": false}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.registry.is_enabled("rsi"));

        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/tasks/rsi")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["task"]["enabled"], false);
        assert!(json["today"].is_null());
    }
}
