/// Sandbox Executor
///
/// Runs one program in a fresh child process:
/// - the program is written to a temporary artifact that is removed on every exit path
/// - CPU-time and virtual-memory ceilings are applied by the shell wrapper before
///   the child execs (best-effort: skipped silently where `ulimit` refuses them)
/// - the parent waits at most the wall-clock timeout, then kills the child and
///   reports `error = "timeout"` with whatever output was captured
/// - stdout is parsed as one JSON value, falling back to the raw text
/// - each stream keeps at most `max_output_bytes`; the rest is read and discarded

use crate::config::SandboxConfig;
use crate::sandbox::error::SandboxError;
use crate::sandbox::types::{
    parse_output, ChildInput, SandboxRequest, SandboxResponse, RESOURCE_EXCEEDED_ERROR, TIMEOUT_ERROR,
};
use std::{
    io::Write,
    path::Path,
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};
use tempfile::NamedTempFile;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::Command,
    task::JoinHandle,
};

/// Signal delivered by the kernel when the CPU-time ceiling is hit
const SIGXCPU: i32 = 24;

/// Signal delivered when the hard CPU-time ceiling is hit
const SIGKILL: i32 = 9;

/// How long to keep draining pipes after the child is gone
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Interpreter message for a refused allocation
const OUT_OF_MEMORY: &str = "not enough memory";

#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    config: SandboxConfig,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Run `request.code` in a bounded child process
    pub async fn execute(&self, request: &SandboxRequest) -> Result<SandboxResponse, SandboxError> {
        if !request.has_code() {
            return Err(SandboxError::EmptyCode);
        }

        let timeout = request.timeout_or(self.config.timeout());
        let input = serde_json::to_vec(&ChildInput {
            prev: request.prev.clone(),
            params: request.params.clone(),
            payload: request.payload.clone(),
            mode: request.mode,
            memory_limit_bytes: Some(self.memory_limit_bytes()),
        })?;

        // Removed when dropped, whichever way this function returns
        let artifact = self.write_artifact(&request.code)?;

        let mut child = self
            .command(artifact.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxError::Spawn)?;

        let started = Instant::now();
        tracing::debug!("🧪 Sandbox child spawned (pid {:?}, timeout {:?})", child.id(), timeout);

        // Written from a task so a child that never reads stdin cannot stall the parent
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            });
        }

        let limit = self.config.max_output_bytes;
        let stdout_task = child.stdout.take().map(|out| tokio::spawn(drain(out, limit)));
        let stderr_task = child.stderr.take().map(|err| tokio::spawn(drain(err, limit)));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(SandboxError::Wait(e));
            }
            Err(_) => {
                tracing::warn!("⏱️ Sandbox child exceeded {:?}, killing", timeout);
                let _ = child.kill().await;
                None
            }
        };

        let stdout = collect(stdout_task).await;
        let stderr = collect(stderr_task).await;
        let truncated = stdout.truncated || stderr.truncated;
        if truncated {
            tracing::warn!("✂️ Sandbox output exceeded {} bytes and was truncated", limit);
        }
        let stdout = stdout.bytes;
        let stderr = String::from_utf8_lossy(&stderr.bytes).into_owned();
        drop(artifact);

        let response = match status {
            None => SandboxResponse {
                ok: false,
                return_code: None,
                stdout: parse_output(&stdout),
                stderr,
                error: Some(TIMEOUT_ERROR.to_string()),
                timeout_seconds: Some(timeout.as_secs_f64()),
                truncated,
            },
            Some(status) => {
                let return_code = exit_code(&status);
                let error = (!status.success() && resource_exceeded(return_code, &stderr))
                    .then(|| RESOURCE_EXCEEDED_ERROR.to_string());
                SandboxResponse {
                    ok: status.success(),
                    return_code,
                    stdout: parse_output(&stdout),
                    stderr,
                    error,
                    timeout_seconds: None,
                    truncated,
                }
            }
        };

        tracing::debug!(
            "🧪 Sandbox child finished in {:?}: ok={} code={:?} error={:?}",
            started.elapsed(),
            response.ok,
            response.return_code,
            response.error
        );
        Ok(response)
    }

    fn memory_limit_bytes(&self) -> usize {
        (self.config.memory_mb as usize).saturating_mul(1024 * 1024)
    }

    fn write_artifact(&self, code: &str) -> Result<NamedTempFile, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pipewright-").suffix(".lua");

        let mut file = match &self.config.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(SandboxError::Artifact)?;

        file.write_all(code.as_bytes()).map_err(SandboxError::Artifact)?;
        file.flush().map_err(SandboxError::Artifact)?;
        Ok(file)
    }

    #[cfg(unix)]
    fn command(&self, artifact: &Path) -> Command {
        let limits = format!(
            "ulimit -t {} 2>/dev/null; ulimit -v {} 2>/dev/null; exec \"$@\"",
            self.config.cpu_seconds,
            self.config.memory_mb.saturating_mul(1024)
        );
        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(limits)
            .arg("sh")
            .arg(&self.config.program)
            .args(&self.config.program_args)
            .arg(artifact);
        command
    }

    #[cfg(not(unix))]
    fn command(&self, artifact: &Path) -> Command {
        let mut command = Command::new(&self.config.program);
        command.args(&self.config.program_args).arg(artifact);
        command
    }
}

/// Bytes captured from one child stream
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Keep the first `limit` bytes, then read the pipe dry so the child never
/// blocks on a full pipe
async fn drain<R: AsyncRead + Unpin>(reader: R, limit: usize) -> Captured {
    let mut bytes = Vec::new();
    let mut head = reader.take(limit as u64);
    let _ = head.read_to_end(&mut bytes).await;

    let mut rest = head.into_inner();
    let discarded = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await.unwrap_or(0);
    Captured {
        bytes,
        truncated: discarded > 0,
    }
}

async fn collect(task: Option<JoinHandle<Captured>>) -> Captured {
    let Some(task) = task else {
        return Captured::default();
    };
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(Ok(captured)) => captured,
        _ => Captured::default(),
    }
}

/// Exit code, or the negated signal number when the child was killed
fn exit_code(status: &ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(-signal);
        }
    }
    None
}

fn resource_exceeded(return_code: Option<i32>, stderr: &str) -> bool {
    matches!(return_code, Some(code) if code == -SIGXCPU || code == -SIGKILL) || stderr.contains(OUT_OF_MEMORY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::{json, Value};

    fn executor_with_program(program: &str) -> SandboxExecutor {
        let mut config = Config::default().sandbox;
        config.program = program.into();
        config.program_args = Vec::new();
        SandboxExecutor::new(config)
    }

    #[tokio::test]
    async fn test_empty_code_rejected_before_spawn() {
        // A program that cannot be spawned proves no spawn was attempted
        let executor = executor_with_program("/nonexistent/pipewright-child");
        for code in ["", "   \n"] {
            let request = SandboxRequest::inline(code, Value::Null, json!({}), json!({}));
            let result = executor.execute(&request).await;
            assert!(matches!(result, Err(SandboxError::EmptyCode)));
        }
    }

    #[tokio::test]
    async fn test_drain_caps_and_discards_excess() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let feeder = tokio::spawn(async move {
            for _ in 0..100 {
                writer.write_all(&[b'x'; 100]).await.unwrap();
            }
        });

        let captured = drain(reader, 1000).await;
        feeder.await.unwrap();
        assert_eq!(captured.bytes.len(), 1000);
        assert!(captured.truncated);

        let small = drain(&b"{\"a\": 1}"[..], 1000).await;
        assert_eq!(small.bytes, b"{\"a\": 1}");
        assert!(!small.truncated);
    }

    #[test]
    fn test_resource_exceeded_detection() {
        assert!(resource_exceeded(Some(-SIGXCPU), ""));
        assert!(resource_exceeded(Some(1), "lua error: not enough memory"));
        assert!(!resource_exceeded(Some(1), "attempt to call a nil value"));
        assert!(!resource_exceeded(None, ""));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_applies_limits_before_exec() {
        let executor = executor_with_program("/usr/bin/pipewright");
        let command = executor.command(Path::new("/tmp/x.lua"));
        let args: Vec<_> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "-c");
        assert!(args[1].starts_with("ulimit -t 2 "));
        assert!(args[1].contains("ulimit -v 262144"));
        assert!(args[1].ends_with("exec \"$@\""));
        assert_eq!(&args[2..], ["sh", "/usr/bin/pipewright", "/tmp/x.lua"]);
    }
}
