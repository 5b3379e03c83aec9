/// Trigger registration endpoint
///
/// POST /triggers
/// Body: { "flow_id": "...", "trigger": { "type": "webhook" | "time", ... }, "nodes": [...] }

use crate::api::{error::ApiError, AppState};
use crate::pipeline::types::PipelineRegistration;
use crate::runtime::RegistrationResult;
use axum::{body::Bytes, extract::State, response::Json, routing::post, Router};
use chrono::Utc;

pub fn create_trigger_routes() -> Router<AppState> {
    Router::new().route("/triggers", post(register_trigger))
}

async fn register_trigger(State(state): State<AppState>, body: Bytes) -> Result<Json<RegistrationResult>, ApiError> {
    let registration: PipelineRegistration =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("invalid registration: {}", e)))?;

    tracing::info!(
        "📝 Registering {} node(s) for flow '{}'",
        registration.nodes.len(),
        registration.flow_id
    );
    let result = state.scheduler.register(registration, Utc::now()).await?;
    Ok(Json(result))
}
