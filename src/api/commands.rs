//! Program execution endpoints

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

use super::{ApiError, ApiState};
use crate::commands::{Channel, Command, DrainParams, FermentationParams, MixParams};

/// Reply to an execute request
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub message: String,
    pub channel: Channel,
    pub detail: String,
}

/// Build command router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/mix", post(mix))
        .route("/drain", post(drain))
        .route("/fermentation", post(fermentation))
        .route("/stop", post(stop))
        .with_state(state)
}

async fn mix(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<MixParams>, JsonRejection>,
) -> Result<Json<CommandResponse>, ApiError> {
    let Json(params) = body?;
    execute(&state, Command::Mix(params)).await
}

async fn drain(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<DrainParams>, JsonRejection>,
) -> Result<Json<CommandResponse>, ApiError> {
    let Json(params) = body?;
    execute(&state, Command::Drain(params)).await
}

async fn fermentation(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<FermentationParams>, JsonRejection>,
) -> Result<Json<CommandResponse>, ApiError> {
    let Json(params) = body?;
    tracing::info!(experiment = %params.experiment_name, "fermentation requested");
    execute(&state, Command::Fermentation(params)).await
}

async fn stop(State(state): State<Arc<ApiState>>) -> Result<Json<CommandResponse>, ApiError> {
    execute(&state, Command::Stop).await
}

async fn execute(state: &ApiState, command: Command) -> Result<Json<CommandResponse>, ApiError> {
    let outcome = state.commands.dispatch(&command).await?;

    // Unavailability is reported in the body, not as an error status
    let message = if outcome.delivered() {
        command.summary()
    } else {
        outcome.detail.clone()
    };

    Ok(Json(CommandResponse {
        message,
        channel: outcome.channel,
        detail: outcome.detail,
    }))
}
