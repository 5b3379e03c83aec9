/// Configuration management for the Pipewright engine
///
/// Handles server binding, the queue database, logic lookup, sandbox bounds and
/// worker pool sizing. Every value can be overridden through `PIPEWRIGHT_*`
/// environment variables for container deployment.

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Argument that switches the binary into sandbox child mode
pub const SANDBOX_CHILD_ARG: &str = "__sandbox-child";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration (task queue, schedules and webhook tokens)
    pub database: DatabaseConfig,
    /// Logic resolution configuration
    pub logic: LogicConfig,
    /// Sandbox bounds and transport
    pub sandbox: SandboxConfig,
    /// Worker pool configuration
    pub worker: WorkerConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
    /// Prefix for returned webhook URLs; empty means relative paths
    pub public_base_url: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL (e.g., "sqlite://data/pipewright.db")
    pub url: String,
}

/// Where file-based logic lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicConfig {
    /// The single directory all logic files are resolved in
    pub dir: PathBuf,
    /// Name of the mapping file inside `dir`
    pub mapping_file: String,
}

impl LogicConfig {
    pub fn mapping_path(&self) -> PathBuf {
        self.dir.join(&self.mapping_file)
    }
}

/// Sandbox bounds
///
/// The CPU and memory ceilings are applied to the child before user code runs;
/// the timeout bounds the parent's wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Default wall-clock timeout when a request does not carry one
    pub timeout_seconds: u64,
    /// CPU-time ceiling for the child
    pub cpu_seconds: u64,
    /// Virtual memory ceiling for the child
    pub memory_mb: u64,
    /// Executable that hosts sandboxed scripts
    pub program: PathBuf,
    /// Arguments placed before the script path
    pub program_args: Vec<String>,
    /// Directory for temporary program artifacts (system temp dir if unset)
    pub scratch_dir: Option<PathBuf>,
    /// Remote sandbox service; the in-process executor is used when unset
    pub remote_url: Option<String>,
    /// How much longer the HTTP request may take than the code timeout
    pub request_slack_seconds: u64,
    /// Bytes kept from each of stdout and stderr; the rest is discarded
    pub max_output_bytes: usize,
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers pulling from the queue
    pub concurrency: usize,
    /// Idle poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// How long a claimed job stays leased before another worker may reclaim it
    pub lease_seconds: u64,
    /// Attempts before a failing run is marked failed
    pub max_attempts: u32,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("PIPEWRIGHT_HOST", "0.0.0.0"),
                port: env_parse("PIPEWRIGHT_PORT", 8000),
                public_base_url: env_or("PIPEWRIGHT_PUBLIC_URL", ""),
            },
            database: DatabaseConfig {
                url: env_or("PIPEWRIGHT_DATABASE_URL", "sqlite://data/pipewright.db"),
            },
            logic: LogicConfig {
                dir: PathBuf::from(env_or("PIPEWRIGHT_LOGIC_DIR", "logic")),
                mapping_file: env_or("PIPEWRIGHT_LOGIC_MAPPING", "mapping.json"),
            },
            sandbox: SandboxConfig {
                timeout_seconds: env_parse("PIPEWRIGHT_SANDBOX_TIMEOUT_SECONDS", 5),
                cpu_seconds: env_parse("PIPEWRIGHT_SANDBOX_CPU_SECONDS", 2),
                memory_mb: env_parse("PIPEWRIGHT_SANDBOX_MEMORY_MB", 256),
                program: std::env::current_exe().unwrap_or_else(|_| PathBuf::from("pipewright")),
                program_args: vec![SANDBOX_CHILD_ARG.to_string()],
                scratch_dir: std::env::var("PIPEWRIGHT_SANDBOX_SCRATCH_DIR").ok().map(PathBuf::from),
                remote_url: std::env::var("PIPEWRIGHT_SANDBOX_URL").ok().filter(|u| !u.is_empty()),
                request_slack_seconds: env_parse("PIPEWRIGHT_SANDBOX_REQUEST_SLACK_SECONDS", 5),
                max_output_bytes: env_parse("PIPEWRIGHT_SANDBOX_MAX_OUTPUT_BYTES", 1024 * 1024),
            },
            worker: WorkerConfig {
                concurrency: env_parse("PIPEWRIGHT_WORKERS", 4),
                poll_interval_ms: env_parse("PIPEWRIGHT_POLL_INTERVAL_MS", 500),
                lease_seconds: env_parse("PIPEWRIGHT_LEASE_SECONDS", 300),
                max_attempts: env_parse("PIPEWRIGHT_MAX_ATTEMPTS", 3),
            },
        }
    }
}

impl Config {
    /// Build configuration from the environment and validate it
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sandbox.timeout_seconds == 0 {
            anyhow::bail!("sandbox timeout must be greater than 0");
        }

        if self.sandbox.cpu_seconds == 0 || self.sandbox.memory_mb == 0 {
            anyhow::bail!("sandbox cpu and memory ceilings must be greater than 0");
        }

        if self.sandbox.request_slack_seconds == 0 {
            anyhow::bail!("sandbox request slack must be greater than 0");
        }

        if self.sandbox.max_output_bytes == 0 {
            anyhow::bail!("sandbox max_output_bytes must be greater than 0");
        }

        if let Some(url) = &self.sandbox.remote_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("sandbox remote_url must start with http:// or https://");
            }
        }

        if self.worker.concurrency == 0 {
            anyhow::bail!("worker concurrency must be greater than 0");
        }

        if self.worker.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }

        if self.worker.lease_seconds <= self.sandbox.timeout_seconds {
            anyhow::bail!(
                "lease ({}s) must outlast the sandbox timeout ({}s)",
                self.worker.lease_seconds,
                self.sandbox.timeout_seconds
            );
        }

        if self.logic.mapping_file.contains('/') || self.logic.mapping_file.contains('\\') {
            anyhow::bail!("mapping_file must be a bare file name");
        }

        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
