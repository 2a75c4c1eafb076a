//! Telemetry ingestion and history endpoints

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};
use crate::telemetry::{EventKind, NormalizedRecord, TelemetryEvent, normalize};

/// Body posted by the controller
#[derive(Debug, Deserialize)]
pub struct TelemetrySubmission {
    /// The nested event mapping
    pub arduino_value: serde_json::Value,
    /// Controller-side timestamp, stored verbatim
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub event_type: EventKind,
}

/// Build telemetry router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/sensor_data", post(receive).get(history))
        .with_state(state)
}

/// Normalize and persist one event
async fn receive(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<TelemetrySubmission>, JsonRejection>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let Json(submission) = body?;
    let event = TelemetryEvent::new(submission.arduino_value, submission.timestamp);
    let log = state.log.clone();

    let kind = tokio::task::spawn_blocking(move || {
        let record = normalize(&event, log.version())?;
        let kind = record.event_kind();
        log.append(&record)?;
        Ok::<_, crate::Error>(kind)
    })
    .await?
    .inspect_err(|e| tracing::warn!(error = %e, "telemetry event not stored"))?;

    tracing::info!(kind = %kind, "telemetry stored");

    Ok(Json(SubmissionResponse {
        status: "success",
        message: "Data received and processed",
        event_type: kind,
    }))
}

/// Every stored record in arrival order
async fn history(State(state): State<Arc<ApiState>>) -> Result<Json<Vec<NormalizedRecord>>, ApiError> {
    let log = state.log.clone();
    let records = tokio::task::spawn_blocking(move || log.read_all()).await??;
    Ok(Json(records))
}
