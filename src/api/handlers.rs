use axum::{
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use tracing::info;
use utoipa::OpenApi;

use super::{
    dto::{
        CollectResponse, ControlRequest, ControlResponse, DeviceMeta, EventParams, EventsResponse,
        HistoryParams, PlugStates, ScheduleRequest, StatusMeta, StatusParams, StatusResponse,
        TickResponse, TriggerParams,
    },
    errors::AppError,
    state::AppState,
};
use crate::{
    control::TickOutcome,
    db::models::{DeviceEvent, DeviceKind, EventSource, Reading, ScheduleConfig, SwitchAction},
    govee::EnvironmentSample,
    sensors::{CollectOutcome, HistoryPoint, HistoryRange},
    status::{CacheStats, DeviceState, Source},
};

/// Bearer token if present, otherwise the `key` query parameter.
fn trigger_credential<'a>(headers: &'a HeaderMap, params: &'a TriggerParams) -> Option<&'a str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .or(params.key.as_deref())
}

// ---------------------------------------------------------------------------
// Plug status & control
// ---------------------------------------------------------------------------

/// Aggregate plug status, served from the hot cache when fresh.
#[utoipa::path(
    get,
    path = "/api/status",
    params(StatusParams),
    responses(
        (status = 200, description = "Aggregate plug status", body = StatusResponse),
        (status = 503, description = "No plug reachable and no usable cache"),
    ),
    tag = "plugs"
)]
pub async fn get_status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> Result<Json<StatusResponse>, AppError> {
    let status = state.cache.read(params.refresh).await?;
    Ok(Json(status.into()))
}

/// Switch one plug on or off.
#[utoipa::path(
    post,
    path = "/api/shelly",
    request_body = ControlRequest,
    responses(
        (status = 200, description = "Relay switched", body = ControlResponse),
        (status = 502, description = "Plug vendor call failed"),
    ),
    tag = "plugs"
)]
pub async fn post_control(
    State(state): State<AppState>,
    Json(req): Json<ControlRequest>,
) -> Result<Json<ControlResponse>, AppError> {
    info!(device = %req.target, action = %req.action, "Manual switch requested");
    let outcome = state
        .control
        .switch(req.target, req.action, EventSource::User)
        .await?;

    Ok(Json(ControlResponse {
        success: true,
        target: outcome.target,
        state: outcome.state,
    }))
}

/// Status cache counters.
#[utoipa::path(
    get,
    path = "/api/cache-stats",
    responses(
        (status = 200, description = "Cache statistics", body = CacheStats),
    ),
    tag = "plugs"
)]
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

// ---------------------------------------------------------------------------
// External triggers
// ---------------------------------------------------------------------------

/// One schedule evaluation; meant to be hit by an external cron every minute.
#[utoipa::path(
    get,
    path = "/api/cron/check-light-schedule",
    params(TriggerParams),
    responses(
        (status = 200, description = "Tick evaluated", body = TickResponse),
        (status = 401, description = "Bad trigger credential"),
        (status = 502, description = "Relay command failed"),
    ),
    tag = "triggers"
)]
pub async fn check_light_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TriggerParams>,
) -> Result<Json<TickResponse>, AppError> {
    let result = state
        .scheduler
        .tick(trigger_credential(&headers, &params))
        .await?;
    Ok(Json(TickResponse {
        success: true,
        result,
    }))
}

/// Sample the environment sensor and store a reading.
#[utoipa::path(
    get,
    path = "/api/cron",
    params(TriggerParams),
    responses(
        (status = 200, description = "Collection finished", body = CollectResponse),
        (status = 401, description = "Bad trigger credential"),
        (status = 503, description = "No sensor data"),
    ),
    tag = "triggers"
)]
pub async fn collect_reading(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TriggerParams>,
) -> Result<Json<CollectResponse>, AppError> {
    state
        .scheduler
        .authorize(trigger_credential(&headers, &params))?;
    let result = state.sensors.collect().await?;
    Ok(Json(CollectResponse {
        success: true,
        result,
    }))
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Current light schedule, or the default when none was saved.
#[utoipa::path(
    get,
    path = "/api/light-schedule",
    responses(
        (status = 200, description = "Light schedule", body = ScheduleConfig),
    ),
    tag = "schedule"
)]
pub async fn get_schedule(State(state): State<AppState>) -> Result<Json<ScheduleConfig>, AppError> {
    Ok(Json(state.scheduler.schedule().await?))
}

#[utoipa::path(
    post,
    path = "/api/light-schedule",
    request_body = ScheduleRequest,
    responses(
        (status = 200, description = "Saved schedule", body = ScheduleConfig),
        (status = 400, description = "Time not in HH:MM form"),
    ),
    tag = "schedule"
)]
pub async fn update_schedule(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> Result<Json<ScheduleConfig>, AppError> {
    let saved = state
        .scheduler
        .update_schedule(req.enabled, &req.time_on, &req.time_off)
        .await?;
    Ok(Json(saved))
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/events",
    params(EventParams),
    responses(
        (status = 200, description = "Device events, newest first", body = EventsResponse),
    ),
    tag = "history"
)]
pub async fn get_events(
    State(state): State<AppState>,
    Query(params): Query<EventParams>,
) -> Result<Json<EventsResponse>, AppError> {
    let events = state.history.events(params.hours, params.device).await?;
    Ok(Json(EventsResponse { events }))
}

#[utoipa::path(
    get,
    path = "/api/history",
    params(HistoryParams),
    responses(
        (status = 200, description = "Chart points, oldest first", body = Vec<HistoryPoint>),
        (status = 400, description = "Unknown range"),
    ),
    tag = "history"
)]
pub async fn get_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<HistoryPoint>>, AppError> {
    let range = match params.range.as_deref() {
        None => HistoryRange::default(),
        Some(raw) => raw.parse::<HistoryRange>().map_err(AppError::bad_request)?,
    };
    Ok(Json(state.history.history(range).await?))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        get_status,
        post_control,
        cache_stats,
        check_light_schedule,
        collect_reading,
        get_schedule,
        update_schedule,
        get_events,
        get_history,
        health
    ),
    components(schemas(
        StatusResponse,
        PlugStates,
        StatusMeta,
        DeviceMeta,
        DeviceState,
        Source,
        ControlRequest,
        ControlResponse,
        CacheStats,
        TickResponse,
        TickOutcome,
        CollectResponse,
        CollectOutcome,
        EnvironmentSample,
        Reading,
        ScheduleConfig,
        ScheduleRequest,
        EventsResponse,
        DeviceEvent,
        DeviceKind,
        SwitchAction,
        EventSource,
        HistoryPoint
    )),
    tags(
        (name = "plugs",    description = "Smart plug status and control"),
        (name = "triggers", description = "Endpoints for the external cron"),
        (name = "schedule", description = "Light schedule configuration"),
        (name = "history",  description = "Readings and device events"),
        (name = "system",   description = "System endpoints"),
    ),
    info(
        title = "Terrarium Service API",
        version = "0.1.0",
        description = "Smart plug status aggregation, light schedule and environment history"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
