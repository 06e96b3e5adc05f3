//! Small standalone routes: the fleet dump, liveness/readiness probes, and
//! the Prometheus fuse trigger (`/v2/siteinfo/registrations`, `/ready`,
//! `/live`, `/v2/platform/prometheus`).

use crate::{fleet::model::Registration, state::AppState};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct RegistrationsDump {
    pub registrations: Vec<Registration>,
}

pub async fn registrations_handler(State(state): State<AppState>) -> impl IntoResponse {
    let registrations = state
        .tracker
        .instances()
        .into_values()
        .map(|entry| entry.registration)
        .collect();
    Json(RegistrationsDump { registrations })
}

/// True once the tracker has completed its first import from the shared
/// store.
pub async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.tracker.ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub async fn live_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Triggers an immediate fleet-wide Prometheus sweep. Deployment
/// topology is expected to keep this route internal-only; the core itself
/// applies no additional auth; this surface is internal-only.
pub async fn prometheus_trigger_handler(State(state): State<AppState>) -> impl IntoResponse {
    let Some(fuser) = state.prom_fuser.clone() else {
        return StatusCode::SERVICE_UNAVAILABLE;
    };
    match fuser.sweep().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
