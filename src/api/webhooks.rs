/// Webhook delivery endpoint
///
/// POST /webhook/{flow_id}/{token}
/// Body: JSON object that becomes the run's payload. A body that is not valid
/// JSON, or not an object, is treated as `{}`. The run is queued, not awaited.

use crate::api::{error::ApiError, AppState};
use crate::runtime::DeliveryAccepted;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde_json::{Map, Value};

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook/{flow_id}/{token}", post(deliver_webhook))
}

async fn deliver_webhook(
    State(state): State<AppState>,
    Path((flow_id, token)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<DeliveryAccepted>), ApiError> {
    tracing::info!("📥 Webhook request received for flow '{}'", flow_id);

    let payload = if body.is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|e| {
            tracing::debug!("📄 Webhook body is not JSON ({}), using empty payload", e);
            Value::Object(Map::new())
        })
    };

    let accepted = state.scheduler.deliver_webhook(&flow_id, &token, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
