// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Powerverter.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! HTTP surface: schedule management, manual execution and the runner endpoint.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{get, post};
use axum::{Json, Router};
use powerverter_core::{
    DueCheck, ExecutionPriority, ExecutionRequest, RunRequest, describe_skew, format_countdown,
    is_due,
};
use powerverter_types::{Schedule, ScheduleIssue, TriggeredBy, normalize_trigger_time};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::engine::Engine;

const DEFAULT_RECORD_LIMIT: u32 = 50;
const MAX_RECORD_LIMIT: u32 = 500;

type ApiResponse = (StatusCode, Json<Value>);

#[derive(Debug, Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
}

pub fn router(engine: Arc<Engine>) -> Router {
    let state = ApiState { engine };

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/time", get(time_handler))
        .route("/api/schedule-runner", post(runner_handler))
        .route(
            "/api/systems/{system_id}/schedules",
            get(list_schedules_handler).post(create_schedule_handler),
        )
        .route(
            "/api/systems/{system_id}/schedules/validation",
            get(validation_handler),
        )
        .route(
            "/api/systems/{system_id}/trigger-records",
            get(trigger_records_handler),
        )
        .route("/api/schedules/{id}/normalize", post(normalize_handler))
        .route("/api/schedules/{id}/active", post(set_active_handler))
        .route("/api/schedules/{id}/execute", post(execute_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (status, Json(json!({ "ok": false, "error": message.into() })))
}

fn internal_error(context: &str, e: &anyhow::Error) -> ApiResponse {
    warn!(error = %format!("{e:#}"), "{context}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}

/// Bearer token check against the configured shared secret
fn authorize(state: &ApiState, headers: &HeaderMap) -> Result<(), ApiResponse> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(token) if token == state.engine.config.auth.shared_secret => Ok(()),
        Some(_) | None => {
            warn!("Request rejected: missing or invalid bearer token");
            Err(error_response(
                StatusCode::UNAUTHORIZED,
                "Invalid or missing bearer token",
            ))
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
async fn health_handler(State(state): State<ApiState>) -> ApiResponse {
    let clock = state.engine.clock.status();
    (StatusCode::OK, Json(json!({ "ok": true, "clock": clock })))
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
async fn time_handler(State(state): State<ApiState>) -> ApiResponse {
    let reference = state.engine.clock.reference_instant();
    (
        StatusCode::OK,
        Json(json!({
            "time": reference.instant,
            "timezone": "UTC",
            "estimated": reference.estimated,
            "skew_description": describe_skew(state.engine.clock.skew_ms()),
        })),
    )
}

#[derive(Debug, Default, Deserialize)]
struct RunnerBody {
    #[serde(flatten)]
    run: RunRequest,
    #[serde(default)]
    diagnostics_only: bool,
}

async fn runner_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResponse {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }

    let body: RunnerBody = if body.iter().all(u8::is_ascii_whitespace) {
        RunnerBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid runner request: {e}"),
                );
            }
        }
    };

    if body.diagnostics_only {
        let report = state.engine.runner.diagnostics(&body.run).await;
        return (StatusCode::OK, Json(to_json(&report)));
    }

    match state.engine.runner.run_once(&body.run).await {
        Ok(report) => (StatusCode::OK, Json(to_json(&report))),
        Err(e) => {
            warn!(error = %e, "Schedule runner failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
struct ScheduleStatus {
    #[serde(flatten)]
    schedule: Schedule,
    due: DueCheck,
    #[serde(skip_serializing_if = "Option::is_none")]
    countdown: Option<String>,
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
async fn list_schedules_handler(
    State(state): State<ApiState>,
    Path(system_id): Path<String>,
) -> ApiResponse {
    let schedules = match state.engine.db.list_schedules(&system_id, false) {
        Ok(schedules) => schedules,
        Err(e) => return internal_error("Failed to list schedules", &e),
    };

    let reference = state.engine.clock.reference_instant();
    let statuses: Vec<ScheduleStatus> = schedules
        .into_iter()
        .map(|schedule| {
            let due = is_due(&schedule, &reference);
            let countdown = due.seconds_to_next.map(format_countdown);
            ScheduleStatus {
                schedule,
                due,
                countdown,
            }
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "system_id": system_id,
            "reference_time": reference.instant,
            "estimated": reference.estimated,
            "schedules": statuses,
        })),
    )
}

#[derive(Debug, Deserialize)]
struct CreateScheduleBody {
    trigger_time: String,
    days_of_week: Vec<String>,
    #[serde(alias = "state")]
    target_state: bool,
    #[serde(default = "default_true")]
    is_active: bool,
}

fn default_true() -> bool {
    true
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
async fn create_schedule_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(system_id): Path<String>,
    Json(body): Json<CreateScheduleBody>,
) -> ApiResponse {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }

    // Loose times like "9:5" are repaired; anything else falls through to validation
    let trigger_time =
        normalize_trigger_time(&body.trigger_time).unwrap_or_else(|_| body.trigger_time.clone());

    let schedule = Schedule {
        id: uuid::Uuid::new_v4().to_string(),
        system_id,
        trigger_time,
        days_of_week: body.days_of_week,
        target_state: body.target_state,
        is_active: body.is_active,
        updated_at: None,
    };

    let issues = schedule.validate();
    if !issues.is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "ok": false, "error": "Invalid schedule", "issues": issues })),
        );
    }

    match state.engine.db.insert_schedule(&schedule) {
        Ok(stored) => {
            info!(
                schedule_id = %stored.id,
                system_id = %stored.system_id,
                trigger_time = %stored.trigger_time,
                state = stored.state_label(),
                "📅 [API] Schedule created"
            );
            (StatusCode::CREATED, Json(to_json(&stored)))
        }
        Err(e) => internal_error("Failed to insert schedule", &e),
    }
}

#[derive(Debug, Serialize)]
struct ValidationEntry {
    schedule_id: String,
    trigger_time: String,
    days_of_week: Vec<String>,
    valid: bool,
    issues: Vec<ScheduleIssue>,
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
async fn validation_handler(
    State(state): State<ApiState>,
    Path(system_id): Path<String>,
) -> ApiResponse {
    let schedules = match state.engine.db.list_schedules(&system_id, false) {
        Ok(schedules) => schedules,
        Err(e) => return internal_error("Failed to list schedules", &e),
    };

    let entries: Vec<ValidationEntry> = schedules
        .into_iter()
        .map(|schedule| {
            let issues = schedule.validate();
            ValidationEntry {
                valid: issues.is_empty(),
                schedule_id: schedule.id,
                trigger_time: schedule.trigger_time,
                days_of_week: schedule.days_of_week,
                issues,
            }
        })
        .collect();
    let valid = entries.iter().filter(|e| e.valid).count();

    (
        StatusCode::OK,
        Json(json!({
            "system_id": system_id,
            "total": entries.len(),
            "valid": valid,
            "invalid": entries.len() - valid,
            "schedules": entries,
        })),
    )
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
async fn normalize_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(schedule_id): Path<String>,
) -> ApiResponse {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }

    let schedule = match state.engine.db.get_schedule(&schedule_id) {
        Ok(Some(schedule)) => schedule,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Schedule not found"),
        Err(e) => return internal_error("Failed to load schedule", &e),
    };

    let after = match normalize_trigger_time(&schedule.trigger_time) {
        Ok(after) => after,
        Err(e) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    };

    let changed = after != schedule.trigger_time;
    if changed {
        if let Err(e) = state.engine.db.update_trigger_time(&schedule_id, &after) {
            return internal_error("Failed to update trigger time", &e);
        }
        info!(
            schedule_id = %schedule_id,
            before = %schedule.trigger_time,
            after = %after,
            "🔧 [API] Trigger time normalized"
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "schedule_id": schedule_id,
            "before": schedule.trigger_time,
            "after": after,
            "changed": changed,
        })),
    )
}

#[derive(Debug, Deserialize)]
struct SetActiveBody {
    is_active: bool,
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
async fn set_active_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(schedule_id): Path<String>,
    Json(body): Json<SetActiveBody>,
) -> ApiResponse {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }

    match state.engine.db.set_schedule_active(&schedule_id, body.is_active) {
        Ok(true) => {
            info!(
                schedule_id = %schedule_id,
                is_active = body.is_active,
                "[API] Schedule activation changed"
            );
            (
                StatusCode::OK,
                Json(json!({ "schedule_id": schedule_id, "is_active": body.is_active })),
            )
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Schedule not found"),
        Err(e) => internal_error("Failed to update schedule", &e),
    }
}

async fn execute_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(schedule_id): Path<String>,
) -> ApiResponse {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }

    let schedule = match state.engine.db.get_schedule(&schedule_id) {
        Ok(Some(schedule)) => schedule,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Schedule not found"),
        Err(e) => return internal_error("Failed to load schedule", &e),
    };

    let issues = schedule.validate();
    if !issues.is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "ok": false, "error": "Invalid schedule", "issues": issues })),
        );
    }

    // Inside a due window the window's target is used so watchers and the runner dedup against it
    let reference = state.engine.clock.reference_instant();
    let check = is_due(&schedule, &reference);
    let target = check
        .target
        .filter(|_| check.due)
        .unwrap_or(reference.instant);

    info!(
        schedule_id = %schedule.id,
        system_id = %schedule.system_id,
        state = schedule.state_label(),
        "⚡ [API] Manual execution requested"
    );

    let outcome = state
        .engine
        .coordinator
        .execute(ExecutionRequest {
            schedule,
            target,
            triggered_by: TriggeredBy::Manual,
            priority: ExecutionPriority::Priority,
        })
        .await;

    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(to_json(&outcome)))
}

#[derive(Debug, Deserialize)]
struct RecordsQuery {
    limit: Option<u32>,
    schedule_id: Option<String>,
}

#[expect(clippy::unused_async, reason = "axum handler must be async")]
async fn trigger_records_handler(
    State(state): State<ApiState>,
    Path(system_id): Path<String>,
    Query(query): Query<RecordsQuery>,
) -> ApiResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECORD_LIMIT)
        .clamp(1, MAX_RECORD_LIMIT);

    match state
        .engine
        .db
        .recent_trigger_records(&system_id, query.schedule_id.as_deref(), limit)
    {
        Ok(records) => (
            StatusCode::OK,
            Json(json!({ "system_id": system_id, "records": records })),
        ),
        Err(e) => internal_error("Failed to query trigger records", &e),
    }
}
