/// Run records
///
/// GET /api/runs/{id}

use crate::api::{error::ApiError, AppState};
use crate::queue::JobRecord;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};

pub fn create_run_routes() -> Router<AppState> {
    Router::new().route("/api/runs/{id}", get(get_run))
}

async fn get_run(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<JobRecord>, ApiError> {
    match state.queue.get(&id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound(format!("run '{}' not found", id))),
    }
}
