/// Worker Pool
///
/// A fixed number of tokio tasks poll the queue for due runs. Each worker
/// claims one job at a time and hands it to the runner; when nothing is due it
/// sleeps for the poll interval. Shutdown is cooperative: workers finish the
/// run they hold, then exit.

use crate::config::WorkerConfig;
use crate::queue::TaskQueue;
use crate::runtime::runner::PipelineRunner;
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct WorkerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.concurrency` workers
    pub fn start(runner: Arc<PipelineRunner>, queue: TaskQueue, config: &WorkerConfig) -> Self {
        let cancel = CancellationToken::new();
        let poll_interval = config.poll_interval();
        let prefix = uuid::Uuid::new_v4().simple().to_string();

        let handles = (0..config.concurrency.max(1))
            .map(|n| {
                let worker_id = format!("{}-{}", &prefix[..8], n);
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&runner),
                    queue.clone(),
                    poll_interval,
                    cancel.clone(),
                ))
            })
            .collect::<Vec<_>>();

        tracing::info!("👷 Started {} worker(s), polling every {:?}", handles.len(), poll_interval);
        Self { cancel, handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Token that stops the pool when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop polling and wait for in-flight runs to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("❌ Worker exited abnormally: {}", e);
            }
        }
        tracing::info!("👋 Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: String,
    runner: Arc<PipelineRunner>,
    queue: TaskQueue,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::debug!("👷 Worker {} polling", worker_id);

    while !cancel.is_cancelled() {
        match queue.claim(&worker_id, Utc::now()).await {
            Ok(Some(job)) => {
                tracing::info!(
                    "📦 Worker {} claimed job {} (attempt {}/{})",
                    worker_id,
                    job.id,
                    job.attempts,
                    queue.max_attempts()
                );
                // Failures are already recorded with the queue by the runner
                let _ = runner.run_job(job).await;
                continue;
            }
            Ok(None) => {}
            Err(e) => tracing::error!("❌ Worker {} failed to claim: {}", worker_id, e),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    tracing::debug!("👷 Worker {} stopped", worker_id);
}
