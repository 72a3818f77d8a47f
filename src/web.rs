//! Axum-based HTTP API over the coordinator handle
//!
//! Reads come from the latest published decision; writes are queued as
//! control commands and applied by the coordinator between cycles.

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::{validate_power_limit, validate_target_soc};
use crate::coordinator::{ControlCommand, CoordinatorHandle};

#[derive(Clone)]
pub struct AppState {
    pub handle: CoordinatorHandle,
}

#[derive(Debug, Deserialize)]
pub struct PowerLimitBody {
    pub kw: f64,
}

#[derive(Debug, Deserialize)]
pub struct PauseBody {
    pub paused: bool,
}

#[derive(Debug, Deserialize)]
pub struct TargetSocBody {
    pub pct: u8,
}

#[derive(Debug, Deserialize)]
pub struct ForceChargeBody {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentBody {
    pub charger: String,
    #[serde(default)]
    pub vehicle_id: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({"error": message.into()})),
    )
        .into_response()
}

/// Queue a command and answer 202, or 503 when the coordinator is gone
fn enqueue(state: &AppState, command: ControlCommand) -> Response {
    match state.handle.send(command) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "queued"})),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

fn known_vehicle(state: &AppState, id: &str) -> Option<Response> {
    if state.handle.snapshot().vehicles.contains_key(id) {
        None
    } else {
        Some(error_response(
            StatusCode::NOT_FOUND,
            format!("Unknown vehicle '{}'", id),
        ))
    }
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.handle.snapshot();
    Json(snapshot.as_ref().clone())
}

pub async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let stream = WatchStream::new(state.handle.subscribe())
        .map(|snapshot| Event::default().event("decision").json_data(snapshot.as_ref()));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn set_power_limit(
    State(state): State<AppState>,
    Json(body): Json<PowerLimitBody>,
) -> Response {
    if let Err(e) = validate_power_limit(body.kw) {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }
    enqueue(&state, ControlCommand::SetPowerLimit(body.kw))
}

pub async fn set_pause(State(state): State<AppState>, Json(body): Json<PauseBody>) -> Response {
    enqueue(&state, ControlCommand::SetPauseAll(body.paused))
}

pub async fn set_target_soc(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TargetSocBody>,
) -> Response {
    if let Some(resp) = known_vehicle(&state, &id) {
        return resp;
    }
    if let Err(e) = validate_target_soc(body.pct) {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }
    enqueue(
        &state,
        ControlCommand::SetTargetSoc {
            vehicle_id: id,
            pct: body.pct,
        },
    )
}

pub async fn set_force_charge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ForceChargeBody>,
) -> Response {
    if let Some(resp) = known_vehicle(&state, &id) {
        return resp;
    }
    enqueue(
        &state,
        ControlCommand::SetForceCharge {
            vehicle_id: id,
            enabled: body.enabled,
        },
    )
}

pub async fn set_assignment(
    State(state): State<AppState>,
    Json(body): Json<AssignmentBody>,
) -> Response {
    if let Some(resp) = body.vehicle_id.as_deref().and_then(|id| known_vehicle(&state, id)) {
        return resp;
    }
    enqueue(
        &state,
        ControlCommand::AssignCharger {
            charger: body.charger,
            vehicle_id: body.vehicle_id,
        },
    )
}

pub async fn run_now(State(state): State<AppState>) -> Response {
    enqueue(&state, ControlCommand::RunNow)
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/events", get(events))
        .route("/api/power_limit", post(set_power_limit))
        .route("/api/pause", post(set_pause))
        .route("/api/vehicles/{id}/target_soc", post(set_target_soc))
        .route("/api/vehicles/{id}/force_charge", post(set_force_charge))
        .route("/api/assignment", post(set_assignment))
        .route("/api/run", post(run_now))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until `shutdown` resolves
pub async fn serve<F>(
    handle: CoordinatorHandle,
    host: &str,
    port: u16,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(AppState { handle });
    let logger = crate::logging::get_logger("web");

    let addr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => {
            logger.warn(&format!("Invalid host '{}'; falling back to 127.0.0.1", host));
            ([127, 0, 0, 1], port).into()
        }
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    logger.info(&format!(
        "Web server listening at http://{}:{} (API /api)",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
