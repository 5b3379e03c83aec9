/// Shared fakes for unit tests

use crate::sandbox::{SandboxClient, SandboxError, SandboxRequest, SandboxResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Sandbox that records every request and answers with a canned response
pub struct FakeSandbox {
    seen: Mutex<Vec<SandboxRequest>>,
    response: SandboxResponse,
}

impl FakeSandbox {
    pub fn new(response: SandboxResponse) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            response,
        })
    }

    pub fn ok(stdout: Value) -> Arc<Self> {
        Self::new(ok_response(stdout))
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<SandboxRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxClient for FakeSandbox {
    async fn run(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError> {
        self.seen.lock().unwrap().push(request);
        Ok(self.response.clone())
    }
}

pub fn ok_response(stdout: Value) -> SandboxResponse {
    SandboxResponse {
        ok: true,
        return_code: Some(0),
        stdout,
        stderr: String::new(),
        error: None,
        timeout_seconds: None,
        truncated: false,
    }
}
