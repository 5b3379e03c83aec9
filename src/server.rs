/// Server setup and initialization
///
/// Wires together all components: storage, queue, handler registry, sandbox
/// client, runtime and HTTP routes. Also hosts the standalone sandbox service.

use crate::{
    api::{create_routes, create_sandbox_routes, AppState},
    config::Config,
    db,
    logic::{HandlerLoader, HandlerRegistry, LogicResolver},
    pipeline::store::SqliteTokenStore,
    queue::TaskQueue,
    runtime::{NodeDispatcher, PipelineRunner, TriggerScheduler, WorkerPool},
    sandbox::{client_from_config, SandboxExecutor},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// A wired application: the HTTP router plus the workers draining the queue
pub struct App {
    pub router: Router,
    pub workers: WorkerPool,
}

/// Create the engine with all routes and a running worker pool
pub async fn create_app(config: &Config) -> Result<App> {
    tracing::info!("🗄️ Connecting to database");
    let pool = db::connect(&config.database.url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;

    let queue = TaskQueue::new(pool.clone(), config.worker.lease(), config.worker.max_attempts);
    let store = Arc::new(SqliteTokenStore::new(pool));

    tracing::info!("📚 Loading handlers from {}", config.logic.dir.display());
    let registry = Arc::new(HandlerRegistry::with_builtins());
    tracing::debug!("📚 Registered handlers: {:?}", registry.names());
    let resolver = LogicResolver::new(&config.logic, Arc::clone(&registry));

    let sandbox = client_from_config(&config.sandbox);
    let loader = HandlerLoader::new(registry, Arc::clone(&sandbox));
    let dispatcher = NodeDispatcher::new(resolver, loader, sandbox);
    let runner = Arc::new(PipelineRunner::new(dispatcher, queue.clone()));

    let scheduler = Arc::new(TriggerScheduler::new(
        store,
        queue.clone(),
        config.server.public_base_url.clone(),
    ));

    tracing::info!("👷 Starting worker pool");
    let workers = WorkerPool::start(runner, queue.clone(), &config.worker);

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let router = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_routes(AppState { scheduler, queue }));

    tracing::info!("✅ Application initialized successfully");
    Ok(App { router, workers })
}

/// Start the engine's HTTP server and workers; returns after Ctrl-C once
/// in-flight runs finish
///
/// `config` is expected to be validated already (see `Config::from_env`).
pub async fn start_server(config: Config) -> Result<()> {
    init_tracing();
    tracing::info!("Starting pipewright engine...");

    let App { router, workers } = create_app(&config).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", bind_addr, e))?;
    tracing::info!("Server listening on http://{}", bind_addr);

    let shutdown = workers.cancellation_token();
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = shutdown.cancelled() => {}
            }
        })
        .await?;

    workers.shutdown().await;
    Ok(())
}

/// Serve `POST /run` so engines on other hosts can offload sandboxed code here
pub async fn start_sandbox_service(config: Config) -> Result<()> {
    init_tracing();
    tracing::info!("Starting pipewright sandbox service...");

    let executor = Arc::new(SandboxExecutor::new(config.sandbox.clone()));
    let router = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_sandbox_routes(executor));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", bind_addr, e))?;
    tracing::info!("Sandbox service listening on http://{}", bind_addr);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Initialize the tracing subscriber; `RUST_LOG` overrides the `info` default
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .try_init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown requested");
}

async fn health_check() -> &'static str {
    "ok"
}
