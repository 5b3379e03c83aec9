//! Sandbox executor against the real child process (this crate's binary in
//! sandbox child mode).

use pipewright::config::{SandboxConfig, SANDBOX_CHILD_ARG};
use pipewright::sandbox::{SandboxError, SandboxExecutor, SandboxRequest, RESOURCE_EXCEEDED_ERROR, TIMEOUT_ERROR};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::{Duration, Instant};

fn config(scratch_dir: Option<PathBuf>) -> SandboxConfig {
    SandboxConfig {
        timeout_seconds: 5,
        cpu_seconds: 2,
        memory_mb: 256,
        program: PathBuf::from(env!("CARGO_BIN_EXE_pipewright")),
        program_args: vec![SANDBOX_CHILD_ARG.to_string()],
        scratch_dir,
        remote_url: None,
        request_slack_seconds: 5,
        max_output_bytes: 1024 * 1024,
    }
}

fn inline(code: &str, prev: Value) -> SandboxRequest {
    SandboxRequest::inline(code, prev, json!({}), json!({}))
}

#[tokio::test]
async fn test_inline_return_value_is_json_stdout() {
    let executor = SandboxExecutor::new(config(None));
    let response = executor
        .execute(&inline("return { value = prev.value * 2 }", json!({"value": 21})))
        .await
        .unwrap();

    assert!(response.ok, "stderr: {}", response.stderr);
    assert_eq!(response.return_code, Some(0));
    assert_eq!(response.stdout, json!({"value": 42}));
    assert!(response.error.is_none());
}

#[tokio::test]
async fn test_non_json_output_is_raw_text() {
    let executor = SandboxExecutor::new(config(None));
    let response = executor.execute(&inline("print('hello', 'world')", Value::Null)).await.unwrap();

    assert!(response.ok);
    assert_eq!(response.stdout, json!("hello\tworld\n"));

    let silent = executor.execute(&inline("local x = 1", Value::Null)).await.unwrap();
    assert!(silent.ok);
    assert_eq!(silent.stdout, json!(""));
}

#[tokio::test]
async fn test_oversized_output_is_capped() {
    let mut config = config(None);
    config.max_output_bytes = 1000;
    let executor = SandboxExecutor::new(config);

    let response = executor
        .execute(&inline("print(string.rep('x', 200000))", Value::Null))
        .await
        .unwrap();

    assert!(response.ok, "stderr: {}", response.stderr);
    assert!(response.truncated);
    assert_eq!(response.stdout.as_str().map(str::len), Some(1000));

    let small = executor.execute(&inline("return 7", Value::Null)).await.unwrap();
    assert!(!small.truncated);
    assert_eq!(small.stdout, json!(7));
}

#[tokio::test]
async fn test_runtime_error_is_nonzero_exit_with_stderr() {
    let executor = SandboxExecutor::new(config(None));
    let response = executor
        .execute(&inline("emit({ partial = true })\nerror('boom')", Value::Null))
        .await
        .unwrap();

    assert!(!response.ok);
    assert_eq!(response.return_code, Some(1));
    assert!(response.stderr.contains("boom"), "stderr: {}", response.stderr);
    assert_eq!(response.stdout, json!({"partial": true}));
}

#[tokio::test]
async fn test_restricted_globals() {
    let executor = SandboxExecutor::new(config(None));
    let code = "return { os = os == nil, io = io == nil, require = require == nil, debug = debug == nil, \
                load_file = loadfile == nil, roundtrip = json.decode(json.encode({ a = 1 })).a }";
    let response = executor.execute(&inline(code, Value::Null)).await.unwrap();

    assert!(response.ok, "stderr: {}", response.stderr);
    assert_eq!(
        response.stdout,
        json!({"os": true, "io": true, "require": true, "debug": true, "load_file": true, "roundtrip": 1})
    );
}

#[tokio::test]
async fn test_timeout_kills_child_within_bound() {
    let scratch = tempfile::TempDir::new().unwrap();
    let executor = SandboxExecutor::new(config(Some(scratch.path().to_path_buf())));

    let started = Instant::now();
    let response = executor
        .execute(&inline("while true do end", Value::Null).with_timeout_seconds(Some(0.5)))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    assert!(!response.ok);
    assert_eq!(response.error.as_deref(), Some(TIMEOUT_ERROR));
    assert!(response.is_timeout());
    assert_eq!(response.timeout_seconds, Some(0.5));
    assert!(response.return_code.is_none());
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_cpu_ceiling_reports_resource_exceeded() {
    let mut config = config(None);
    config.cpu_seconds = 1;
    config.timeout_seconds = 10;
    let executor = SandboxExecutor::new(config);

    let started = Instant::now();
    let response = executor.execute(&inline("while true do end", Value::Null)).await.unwrap();

    // The CPU ceiling fires well before the wall-clock timeout
    assert!(started.elapsed() < Duration::from_secs(6), "took {:?}", started.elapsed());
    assert!(!response.ok);
    assert_eq!(response.error.as_deref(), Some(RESOURCE_EXCEEDED_ERROR));
    assert!(response.is_resource_exceeded());
    assert!(response.return_code.is_some_and(|code| code < 0), "{:?}", response.return_code);
}

#[tokio::test]
async fn test_program_artifact_removed_after_run() {
    let scratch = tempfile::TempDir::new().unwrap();
    let executor = SandboxExecutor::new(config(Some(scratch.path().to_path_buf())));

    executor.execute(&inline("return 1", Value::Null)).await.unwrap();
    executor.execute(&inline("error('x')", Value::Null)).await.unwrap();

    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_empty_code_rejected_before_spawn() {
    let scratch = tempfile::TempDir::new().unwrap();
    let executor = SandboxExecutor::new(config(Some(scratch.path().to_path_buf())));

    let err = executor.execute(&inline(" \n\t", Value::Null)).await.unwrap_err();
    assert!(matches!(err, SandboxError::EmptyCode));
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_entry_point_receives_declared_arguments() {
    let executor = SandboxExecutor::new(config(None));
    let prev = json!({"p": 1});
    let params = json!({"k": 2});
    let payload = json!({"b": 3});

    let cases = [
        ("function run(prev, params, payload) return { prev.p, params.k, payload.b } end", json!([1, 2, 3])),
        ("function handler(params, payload) return { params.k, payload.b } end", json!([2, 3])),
        ("function main(payload) return payload.b end", json!(3)),
        ("function run() return 'none' end", json!("none")),
        ("function run(...) local a = { ... } return #a end", json!(3)),
    ];

    for (code, expected) in cases {
        let request = SandboxRequest::entry(code, prev.clone(), params.clone(), payload.clone());
        let response = executor.execute(&request).await.unwrap();
        assert!(response.ok, "{}: {}", code, response.stderr);
        assert_eq!(response.stdout, expected, "{}", code);
    }

    let missing = executor
        .execute(&SandboxRequest::entry("local x = 1", prev, params, payload))
        .await
        .unwrap();
    assert!(!missing.ok);
    assert!(missing.stderr.contains("no entry point"));
}
