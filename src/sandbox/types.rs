/// Sandbox wire types
///
/// The same shapes travel over stdin to the child process and over HTTP to the
/// remote sandbox service.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// `error` value reported when the wall-clock bound fired
pub const TIMEOUT_ERROR: &str = "timeout";

/// `error` value reported when the CPU or memory ceiling fired
pub const RESOURCE_EXCEEDED_ERROR: &str = "resource_exceeded";

/// How the child treats the program it is given
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Run the program top to bottom; a returned value is emitted
    #[default]
    Inline,
    /// Run the program, then call its entry point and emit the return value
    Entry,
}

/// A request to run one program
///
/// `code` accepts any JSON on the wire; anything that is not a non-empty string
/// ends up as an empty program and is rejected before a child is spawned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRequest {
    #[serde(default, deserialize_with = "code_or_empty")]
    pub code: String,
    #[serde(default)]
    pub prev: Value,
    #[serde(default = "empty_object")]
    pub params: Value,
    #[serde(default = "empty_object")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub mode: SandboxMode,
}

impl SandboxRequest {
    pub fn inline(code: impl Into<String>, prev: Value, params: Value, payload: Value) -> Self {
        Self {
            code: code.into(),
            prev,
            params,
            payload,
            timeout_seconds: None,
            mode: SandboxMode::Inline,
        }
    }

    pub fn entry(code: impl Into<String>, prev: Value, params: Value, payload: Value) -> Self {
        Self {
            mode: SandboxMode::Entry,
            ..Self::inline(code, prev, params, payload)
        }
    }

    pub fn with_timeout_seconds(mut self, seconds: Option<f64>) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn has_code(&self) -> bool {
        !self.code.trim().is_empty()
    }

    /// Requested wall-clock bound, or `default` when absent or not a positive
    /// finite number of seconds
    pub fn timeout_or(&self, default: Duration) -> Duration {
        match self.timeout_seconds {
            Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
            _ => default,
        }
    }
}

/// What came back from the child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxResponse {
    /// True iff the child exited with the success code
    pub ok: bool,
    /// Exit code; negative signal number when killed by a signal; absent on timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    /// Parsed JSON if stdout held one value, the raw text otherwise
    #[serde(default)]
    pub stdout: Value,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    /// Set when stdout or stderr outgrew the capture limit and was cut off
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl SandboxResponse {
    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(TIMEOUT_ERROR)
    }

    pub fn is_resource_exceeded(&self) -> bool {
        self.error.as_deref() == Some(RESOURCE_EXCEEDED_ERROR)
    }
}

/// Input written to the child's stdin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildInput {
    #[serde(default)]
    pub prev: Value,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub mode: SandboxMode,
    /// Interpreter allocation ceiling, complementing the process limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_bytes: Option<usize>,
}

/// Parse captured stdout as one JSON value (surrounding whitespace ignored),
/// else keep the text exactly as printed
pub fn parse_output(bytes: &[u8]) -> Value {
    let text = String::from_utf8_lossy(bytes);
    serde_json::from_str(text.trim()).unwrap_or_else(|_| Value::String(text.into_owned()))
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn code_or_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(code) => code,
        _ => String::new(),
    })
}
