/// Sandbox service endpoint
///
/// POST /run
/// Body: SandboxRequest. Runs the code in a child process on this host and
/// answers with the SandboxResponse. Empty code is rejected with
/// 400 `{"detail": "empty code"}` before anything is spawned.

use crate::sandbox::{SandboxError, SandboxExecutor, SandboxRequest, SandboxResponse};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde_json::json;
use std::sync::Arc;

pub fn create_sandbox_routes(executor: Arc<SandboxExecutor>) -> Router {
    Router::new().route("/run", post(run_code)).with_state(executor)
}

async fn run_code(State(executor): State<Arc<SandboxExecutor>>, body: Bytes) -> Result<Json<SandboxResponse>, Response> {
    let request: SandboxRequest = serde_json::from_slice(&body).map_err(|e| {
        detail(StatusCode::BAD_REQUEST, format!("invalid request: {}", e))
    })?;

    match executor.execute(&request).await {
        Ok(response) => {
            tracing::debug!("🧪 Sandbox run finished: ok={} code={:?}", response.ok, response.return_code);
            Ok(Json(response))
        }
        Err(SandboxError::EmptyCode) => Err(detail(StatusCode::BAD_REQUEST, "empty code".to_string())),
        Err(e) => {
            tracing::error!("❌ Sandbox run failed: {}", e);
            Err(detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

fn detail(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}
