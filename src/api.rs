//! ==============================================================================
//! api.rs - rest surface for the registry, readings and outputs
//! ==============================================================================
//!
//! purpose:
//!     thin axum handlers over hub.rs. every handler locks the hub once,
//!     performs one operation and renders the result; all failure statuses
//!     come from HubError's IntoResponse.
//!
//! routes:
//!     GET  /api/sensors            POST /api/sensors/add | update | remove | scan
//!     GET  /api/alarms             POST /api/alarms (add or update), /api/alarms/delete
//!     GET  /api/webhooks           POST /api/webhooks (add or update), /api/webhooks/delete
//!                                  POST /api/webhooks/test
//!     GET  /api/snapshot           GET  /api/status
//!     POST /api/outputs
//!
//! relationships:
//!     - uses: hub.rs (state), notify.rs (webhook test delivery)
//!     - started by: main.rs
//!
//! ==============================================================================

use crate::alarms::TickTime;
use crate::domain::{AlarmPatch, SensorPatch, WebhookPatch};
use crate::error::{HubError, Result};
use crate::hub::Hub;
use crate::notify::NotificationSink;
use crate::onewire::BusAddress;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use sysinfo::System;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::info;

#[derive(Clone)]
pub struct ApiState {
    pub hub: Arc<Mutex<Hub>>,
    pub sink: Arc<dyn NotificationSink>,
    /// the tick loop's clock origin, shared so both stamp the same timeline
    pub started: Instant,
}

impl ApiState {
    pub fn new(hub: Arc<Mutex<Hub>>, sink: Arc<dyn NotificationSink>, started: Instant) -> Self {
        Self { hub, sink, started }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/sensors", get(list_sensors))
        .route("/api/sensors/add", post(add_sensor))
        .route("/api/sensors/update", post(update_sensor))
        .route("/api/sensors/remove", post(remove_sensor))
        .route("/api/sensors/scan", post(scan_sensors))
        .route("/api/alarms", get(list_alarms).post(upsert_alarm))
        .route("/api/alarms/delete", post(delete_alarm))
        .route("/api/webhooks", get(list_webhooks).post(upsert_webhook))
        .route("/api/webhooks/delete", post(delete_webhook))
        .route("/api/webhooks/test", post(test_webhook))
        .route("/api/snapshot", get(snapshot))
        .route("/api/status", get(status))
        .route("/api/outputs", post(set_output))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(bind: &str, state: ApiState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("REST API listening on http://{}", bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Unwrap a json body, reporting any rejection as malformed input.
fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| HubError::malformed(rejection.body_text()))
}

fn created_or_ok(created: bool) -> StatusCode {
    if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    }
}

// ==============================================================================
// sensors
// ==============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddSensorBody {
    bus_address: BusAddress,
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct UpdateSensorBody {
    id: String,
    #[serde(flatten)]
    patch: SensorPatch,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveSensorBody {
    bus_address: BusAddress,
}

async fn list_sensors(State(state): State<ApiState>) -> Response {
    let hub = state.hub.lock().await;
    Json(hub.sensors()).into_response()
}

async fn add_sensor(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<AddSensorBody>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    let sensor = state
        .hub
        .lock()
        .await
        .add_sensor(req.bus_address, &req.id, &req.name)?;
    Ok((StatusCode::CREATED, Json(sensor)).into_response())
}

async fn update_sensor(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<UpdateSensorBody>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    let sensor = state.hub.lock().await.update_sensor(&req.id, req.patch)?;
    Ok(Json(sensor).into_response())
}

async fn remove_sensor(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<RemoveSensorBody>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    let removed = state.hub.lock().await.remove_sensor(&req.bus_address)?;
    Ok(Json(json!({ "status": "ok", "id": removed.id })).into_response())
}

async fn scan_sensors(State(state): State<ApiState>) -> Result<Response> {
    let found = state.hub.lock().await.unregistered_probes()?;
    Ok(Json(json!({ "found": found })).into_response())
}

// ==============================================================================
// alarms and webhooks
// ==============================================================================

#[derive(Deserialize)]
struct AlarmBody {
    id: String,
    #[serde(flatten)]
    patch: AlarmPatch,
}

#[derive(Deserialize)]
struct WebhookBody {
    id: String,
    #[serde(flatten)]
    patch: WebhookPatch,
}

#[derive(Deserialize)]
struct IdBody {
    id: String,
}

async fn list_alarms(State(state): State<ApiState>) -> Response {
    let hub = state.hub.lock().await;
    Json(hub.alarms()).into_response()
}

async fn upsert_alarm(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<AlarmBody>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    let (alarm, created) = state.hub.lock().await.upsert_alarm(&req.id, req.patch)?;
    Ok((created_or_ok(created), Json(alarm)).into_response())
}

async fn delete_alarm(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<IdBody>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    let removed = state.hub.lock().await.delete_alarm(&req.id)?;
    Ok(Json(json!({ "status": "ok", "id": removed.id })).into_response())
}

async fn list_webhooks(State(state): State<ApiState>) -> Response {
    let hub = state.hub.lock().await;
    Json(hub.webhooks()).into_response()
}

async fn upsert_webhook(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<WebhookBody>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    let (webhook, created) = state.hub.lock().await.upsert_webhook(&req.id, req.patch)?;
    Ok((created_or_ok(created), Json(webhook)).into_response())
}

async fn delete_webhook(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<IdBody>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    let removed = state.hub.lock().await.delete_webhook(&req.id)?;
    Ok(Json(json!({ "status": "ok", "id": removed.id })).into_response())
}

async fn test_webhook(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<IdBody>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    // build under the lock, send without it
    let outbound = {
        let hub = state.hub.lock().await;
        hub.webhook_probe(&req.id, TickTime::since(state.started))?
    };
    state.sink.send(&outbound.url, &outbound.payload).await?;
    Ok(Json(json!({ "status": "ok", "id": req.id })).into_response())
}

// ==============================================================================
// readings, outputs, status
// ==============================================================================

#[derive(Deserialize)]
struct OutputBody {
    name: String,
    state: bool,
}

async fn snapshot(State(state): State<ApiState>) -> Response {
    let hub = state.hub.lock().await;
    Json(hub.snapshot()).into_response()
}

async fn set_output(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<OutputBody>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    state.hub.lock().await.set_output(&req.name, req.state)?;
    Ok(Json(json!({ "name": req.name, "state": req.state })).into_response())
}

async fn status(State(state): State<ApiState>) -> Response {
    let mut sys = System::new();
    sys.refresh_memory();

    let hub = state.hub.lock().await;
    Json(json!({
        "device": hub.device_name(),
        "uptime_seconds": System::uptime(),
        "memory": {
            "used_bytes": sys.used_memory(),
            "total_bytes": sys.total_memory(),
        },
        "registry": hub.counts(),
    }))
    .into_response()
}
