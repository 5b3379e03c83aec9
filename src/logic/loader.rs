/// Handler Loader
///
/// Invokes whatever the resolver found. Registered handlers are called in
/// process behind a panic guard; script handlers are read from disk on every
/// call and run in the sandbox in entry mode. Nothing a handler does can take
/// the runner down: every failure comes back as a `NodeError` with a trace.

use crate::logic::registry::HandlerRegistry;
use crate::logic::resolver::HandlerLocation;
use crate::pipeline::types::{NodeError, Params};
use crate::sandbox::{SandboxClient, SandboxRequest, SandboxResponse};
use serde_json::Value;
use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

#[derive(Clone)]
pub struct HandlerLoader {
    registry: Arc<HandlerRegistry>,
    sandbox: Arc<dyn SandboxClient>,
}

impl HandlerLoader {
    pub fn new(registry: Arc<HandlerRegistry>, sandbox: Arc<dyn SandboxClient>) -> Self {
        Self { registry, sandbox }
    }

    pub async fn invoke(
        &self,
        location: &HandlerLocation,
        prev: &Value,
        params: &Params,
        payload: &Value,
    ) -> Result<Value, NodeError> {
        match location {
            HandlerLocation::Builtin(name) => self.invoke_builtin(name, prev, params, payload),
            HandlerLocation::Script(path) => {
                let code = tokio::fs::read_to_string(path).await.map_err(|e| {
                    NodeError::new(format!("failed to load {}: {}", path.display(), e))
                        .with_detail("path", path.display().to_string())
                })?;

                let request = SandboxRequest::entry(
                    code,
                    prev.clone(),
                    Value::Object(params.clone()),
                    payload.clone(),
                );
                let response = self.sandbox.run(request).await.map_err(|e| {
                    NodeError::from(e).with_detail("path", path.display().to_string())
                })?;

                script_result(response).map_err(|e| e.with_detail("path", path.display().to_string()))
            }
        }
    }

    fn invoke_builtin(&self, name: &str, prev: &Value, params: &Params, payload: &Value) -> Result<Value, NodeError> {
        let handler = self
            .registry
            .get(name)
            .ok_or_else(|| NodeError::new(format!("no registered handler '{}'", name)))?;

        match catch_unwind(AssertUnwindSafe(|| handler.invoke(prev, params, payload))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!("❌ Handler '{}' failed: {}", name, e);
                Err(NodeError::new(e.to_string())
                    .with_detail("handler", name)
                    .with_detail("trace", format!("{:?}", e)))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("💥 Handler '{}' panicked: {}", name, message);
                Err(NodeError::new(format!("handler '{}' panicked: {}", name, message))
                    .with_detail("handler", name)
                    .with_detail("trace", std::backtrace::Backtrace::force_capture().to_string()))
            }
        }
    }
}

/// A script's emitted value, or the reason it produced none
fn script_result(response: SandboxResponse) -> Result<Value, NodeError> {
    if response.ok {
        return Ok(response.stdout);
    }

    let message = if response.is_timeout() {
        format!("script timed out after {}s", response.timeout_seconds.unwrap_or_default())
    } else if response.is_resource_exceeded() {
        "script exceeded its cpu or memory ceiling".to_string()
    } else {
        match (&response.error, response.return_code) {
            (Some(error), _) => format!("script failed: {}", error),
            (None, Some(code)) => format!("script exited with code {}", code),
            (None, None) => "script failed".to_string(),
        }
    };
    let mut error = NodeError::new(message).with_detail("trace", response.stderr);
    if let Some(code) = response.return_code {
        error = error.with_detail("return_code", code);
    }
    if response.truncated {
        error = error.with_detail("truncated", true);
    }
    let printed = match &response.stdout {
        Value::Null => false,
        Value::String(text) => !text.is_empty(),
        _ => true,
    };
    if printed {
        error = error.with_detail("stdout", response.stdout);
    }
    Err(error)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
