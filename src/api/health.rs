//! Health and connection status endpoints

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ApiState;
use crate::sessions::RegistrySnapshot;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Broker and session status
#[derive(Serialize)]
pub struct StatusResponse {
    /// `connected` or `disconnected`, for the broker
    pub status: &'static str,
    pub connected: bool,
    #[serde(flatten)]
    pub sessions: RegistrySnapshot,
    /// Last message time per subscribed topic
    pub last_inbound: HashMap<String, DateTime<Utc>>,
}

/// Build health router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/mqtt_status", get(status))
        .with_state(state)
}

/// Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let connected = state.commands.broker_connected();
    let last_inbound = match &state.activity {
        Some(activity) => activity.snapshot().await,
        None => HashMap::new(),
    };

    Json(StatusResponse {
        status: if connected { "connected" } else { "disconnected" },
        connected,
        sessions: state.registry.snapshot().await,
        last_inbound,
    })
}
