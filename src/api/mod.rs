/// HTTP API Layer
///
/// Thin HTTP surface over the runtime:
/// - trigger registration
/// - webhook delivery
/// - run record lookup
/// - the standalone sandbox service

// Error → HTTP response mapping
pub mod error;

// POST /triggers
pub mod triggers;

// POST /webhook/{flow_id}/{token}
pub mod webhooks;

// GET /api/runs/{id}
pub mod runs;

// POST /run (sandbox service)
pub mod sandbox;

use crate::queue::TaskQueue;
use crate::runtime::TriggerScheduler;
use axum::Router;
use std::sync::Arc;

pub use error::ApiError;
pub use sandbox::create_sandbox_routes;

/// Application state shared by the engine's handlers
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<TriggerScheduler>,
    pub queue: TaskQueue,
}

/// All engine routes, bound to `state`
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .merge(triggers::create_trigger_routes())
        .merge(webhooks::create_webhook_routes())
        .merge(runs::create_run_routes())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db;
    use crate::pipeline::store::MemoryTokenStore;
    use crate::queue::JobStatus;
    use crate::sandbox::SandboxExecutor;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app() -> (Router, TaskQueue) {
        let queue = TaskQueue::new(db::connect_in_memory().await.unwrap(), Duration::from_secs(60), 3);
        let scheduler = Arc::new(TriggerScheduler::new(Arc::new(MemoryTokenStore::new()), queue.clone(), ""));
        let router = create_routes(AppState {
            scheduler,
            queue: queue.clone(),
        });
        (router, queue)
    }

    async fn send(router: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register_webhook(router: &Router) -> String {
        let body = json!({
            "flow_id": "flow-1",
            "trigger": {"type": "webhook"},
            "nodes": [{"id": "n1", "logic": "double_value"}]
        });
        let (status, value) = send(router, "POST", "/triggers", &body.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        value["webhook_url"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_webhook_flow_over_http() {
        let (router, _) = app().await;
        let url = register_webhook(&router).await;
        assert!(url.starts_with("/webhook/flow-1/"));

        let (status, accepted) = send(&router, "POST", &url, r#"{"value": 3}"#).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["status"], json!("accepted"));

        let run_uri = format!("/api/runs/{}", accepted["job_id"].as_str().unwrap());
        let (status, record) = send(&router, "GET", &run_uri, "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["status"], json!("queued"));
        assert_eq!(record["flow_id"], json!("flow-1"));

        let (status, _) = send(&router, "GET", "/api/runs/missing", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_webhook_rejections() {
        let (router, queue) = app().await;
        let url = register_webhook(&router).await;

        let (status, body) = send(&router, "POST", &url, r#"{"nodes": []}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("nodes"));

        let (status, _) = send(&router, "POST", "/webhook/flow-1/not-a-token", "{}").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let token = url.rsplit('/').next().unwrap();
        let (status, body) = send(&router, "POST", &format!("/webhook/other/{}", token), "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("flow id"));

        assert_eq!(queue.count_by_status(JobStatus::Queued).await.unwrap(), 0);

        // Unparseable body still runs, with an empty payload
        let (status, _) = send(&router, "POST", &url, "not json").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(queue.count_by_status(JobStatus::Queued).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_registrations_are_bad_requests() {
        let (router, _) = app().await;

        let (status, _) = send(&router, "POST", "/triggers", "{").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let past = json!({
            "flow_id": "f",
            "trigger": {"type": "time", "schedule": {"mode": "once", "at": "2000-01-01T00:00:00Z"}},
            "nodes": []
        });
        let (status, body) = send(&router, "POST", "/triggers", &past.to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("future"));

        let huge = json!({
            "flow_id": "f",
            "trigger": {"type": "time", "schedule": {"mode": "interval", "interval_seconds": i64::MAX}},
            "nodes": []
        });
        let (status, body) = send(&router, "POST", "/triggers", &huge.to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("too large"));
    }

    #[tokio::test]
    async fn test_sandbox_service_rejects_empty_code() {
        let mut config = Config::default().sandbox;
        config.program = "/nonexistent/pipewright".into();
        let router = create_sandbox_routes(Arc::new(SandboxExecutor::new(config)));

        let (status, body) = send(&router, "POST", "/run", r#"{"code": "   "}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"detail": "empty code"}));
    }
}
