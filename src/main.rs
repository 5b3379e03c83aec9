/// Pipewright: trigger-driven sequential pipelines
///
/// Main entry point. With no subcommand (or `serve`) it starts the engine:
/// - Trigger registration at POST /triggers
/// - Webhook delivery at POST /webhook/{flow_id}/{token}
/// - Run records at GET /api/runs/{id}
/// - Health check at /healthz
///
/// `sandbox-service` starts only the sandbox endpoint (POST /run). The hidden
/// sandbox child mode is how the executor runs untrusted programs.

use clap::{Parser, Subcommand};
use pipewright::{config::Config, sandbox, server};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pipewright", version, about = "Trigger-driven sequential pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine: HTTP API plus queue workers
    Serve,
    /// Run the standalone sandbox service
    SandboxService,
    /// Execute one sandboxed program (spawned by the executor)
    #[command(name = "__sandbox-child", hide = true)]
    SandboxChild { script: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Command::Serve);
    if let Command::SandboxChild { script } = &command {
        std::process::exit(sandbox::child::run(script));
    }

    // Configuration comes from PIPEWRIGHT_* environment variables
    let config = Config::from_env()?;
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    runtime.block_on(async move {
        match command {
            Command::SandboxService => server::start_sandbox_service(config).await,
            _ => server::start_server(config).await,
        }
    })
}
