/// Sandbox transports
///
/// The dispatcher talks to the sandbox through `SandboxClient`, either running
/// the executor in-process or posting to a remote sandbox service. The remote
/// request timeout is always strictly larger than the code timeout it carries.

use crate::config::SandboxConfig;
use crate::sandbox::error::SandboxError;
use crate::sandbox::executor::SandboxExecutor;
use crate::sandbox::types::{SandboxRequest, SandboxResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::{sync::Arc, time::Duration};

#[async_trait]
pub trait SandboxClient: Send + Sync {
    async fn run(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError>;
}

/// In-process executor
#[derive(Debug, Clone)]
pub struct LocalSandbox {
    executor: SandboxExecutor,
}

impl LocalSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            executor: SandboxExecutor::new(config),
        }
    }
}

#[async_trait]
impl SandboxClient for LocalSandbox {
    async fn run(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError> {
        self.executor.execute(&request).await
    }
}

/// HTTP client for `POST {base_url}/run`
#[derive(Debug, Clone)]
pub struct RemoteSandbox {
    client: reqwest::Client,
    endpoint: String,
    default_timeout: Duration,
    slack: Duration,
}

impl RemoteSandbox {
    pub fn new(base_url: &str, default_timeout: Duration, slack: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/run", base_url.trim_end_matches('/')),
            default_timeout,
            slack,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_timeout(&self, code_timeout: Duration) -> Duration {
        code_timeout + self.slack.max(Duration::from_millis(1))
    }
}

#[async_trait]
impl SandboxClient for RemoteSandbox {
    async fn run(&self, mut request: SandboxRequest) -> Result<SandboxResponse, SandboxError> {
        if !request.has_code() {
            return Err(SandboxError::EmptyCode);
        }

        // Pin the code timeout so both sides agree on it
        let code_timeout = request.timeout_or(self.default_timeout);
        request.timeout_seconds = Some(code_timeout.as_secs_f64());

        tracing::debug!("🌐 Posting sandbox request to {}", self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .timeout(self.request_timeout(code_timeout))
            .send()
            .await
            .map_err(|e| SandboxError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            if status.as_u16() == 400 && detail == "empty code" {
                return Err(SandboxError::EmptyCode);
            }
            return Err(SandboxError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        response
            .json::<SandboxResponse>()
            .await
            .map_err(|e| SandboxError::Transport(format!("invalid sandbox response: {}", e)))
    }
}

/// Remote client when a service URL is configured, in-process executor otherwise
pub fn client_from_config(config: &SandboxConfig) -> Arc<dyn SandboxClient> {
    match &config.remote_url {
        Some(url) => {
            tracing::info!("🌐 Using remote sandbox service at {}", url);
            Arc::new(RemoteSandbox::new(
                url,
                config.timeout(),
                Duration::from_secs(config.request_slack_seconds),
            ))
        }
        None => {
            tracing::info!("🧪 Using in-process sandbox executor ({})", config.program.display());
            Arc::new(LocalSandbox::new(config.clone()))
        }
    }
}
