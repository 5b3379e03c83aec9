/// Pipeline Runner
///
/// Drives one run: nodes execute strictly in order, each node's envelope
/// decides the next node's `prev`, and a failing node does not stop the run.
/// The run log is written back to the queue when the last node finishes,
/// which is also where recurring triggers re-arm.

use crate::pipeline::types::{ExecutionContext, Node, NodeResult, RAW_OUTPUT_FIELD, RESULT_FIELD};
use crate::queue::{Job, TaskQueue};
use crate::runtime::dispatcher::NodeDispatcher;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::{any::Any, sync::Arc};

/// A failure that ends a run outright and is handed to the queue's retry policy
#[derive(Debug, thiserror::Error)]
pub enum RunFailure {
    #[error("run panicked: {0}")]
    Panicked(String),

    #[error("run aborted: {0}")]
    Aborted(String),

    #[error("failed to record run: {0}")]
    Record(#[from] anyhow::Error),
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub flow_id: String,
    pub results: Vec<NodeResult>,
    /// `prev` after the last node
    pub final_prev: Value,
}

impl RunReport {
    /// Ids of nodes whose outcome was not ok, in execution order
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.outcome.is_ok())
            .map(|r| r.node_id.as_str())
            .collect()
    }

    pub fn results_json(&self) -> Value {
        serde_json::to_value(&self.results).unwrap_or(Value::Null)
    }
}

/// Derive the next node's `prev` from an outcome envelope
///
/// Precedence: an ok envelope's `result`, then a non-null `stdout`, then the
/// envelope itself.
pub fn next_prev(envelope: &Value) -> Value {
    let ok = envelope.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if ok {
        if let Some(result) = envelope.get(RESULT_FIELD) {
            return result.clone();
        }
    }
    match envelope.get(RAW_OUTPUT_FIELD) {
        Some(raw) if !raw.is_null() => raw.clone(),
        _ => envelope.clone(),
    }
}

pub struct PipelineRunner {
    dispatcher: NodeDispatcher,
    queue: TaskQueue,
}

impl PipelineRunner {
    pub fn new(dispatcher: NodeDispatcher, queue: TaskQueue) -> Self {
        Self { dispatcher, queue }
    }

    /// Run `nodes` in order, starting from the run's payload
    pub async fn run_nodes(&self, nodes: &[Node], ctx: &ExecutionContext) -> RunReport {
        tracing::info!(
            "🚀 Run {} started for flow '{}' ({} nodes)",
            ctx.run_id,
            ctx.trigger.flow_id,
            nodes.len()
        );

        let mut prev = ctx.payload.clone();
        let mut results = Vec::with_capacity(nodes.len());

        for node in nodes {
            let outcome = self.dispatcher.dispatch(node, prev, ctx).await;
            let envelope = outcome.envelope();

            if outcome.is_ok() {
                tracing::debug!("✅ Node '{}' ({}) → {}", node.id, node.logic, envelope);
            } else {
                tracing::warn!("❌ Node '{}' ({}) failed, continuing: {}", node.id, node.logic, envelope);
            }

            prev = next_prev(&envelope);
            results.push(NodeResult {
                node_id: node.id.clone(),
                logic: node.logic.clone(),
                outcome,
            });
        }

        let report = RunReport {
            run_id: ctx.run_id.clone(),
            flow_id: ctx.trigger.flow_id.clone(),
            results,
            final_prev: prev,
        };
        tracing::info!(
            "🏁 Run {} finished: {} node(s), {} failed",
            report.run_id,
            report.results.len(),
            report.failed_nodes().len()
        );
        report
    }

    /// Run a claimed job and record the outcome; re-arms interval triggers
    pub async fn execute(&self, job: &Job) -> Result<RunReport, RunFailure> {
        let ctx = ExecutionContext {
            run_id: job.id.clone(),
            payload: job.payload.clone(),
            trigger: job.trigger.clone(),
        };

        let report = self.run_nodes(&job.nodes, &ctx).await;
        self.queue.complete(job, &report.results_json(), Utc::now()).await?;
        Ok(report)
    }

    /// `execute` on its own task, so a panic anywhere in the run becomes a
    /// `RunFailure`; failures are recorded with the queue and returned
    pub async fn run_job(self: &Arc<Self>, job: Job) -> Result<RunReport, RunFailure> {
        let runner = Arc::clone(self);
        let task_job = job.clone();
        let joined = tokio::spawn(async move { runner.execute(&task_job).await }).await;

        let outcome = match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(RunFailure::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(RunFailure::Aborted(e.to_string())),
        };

        if let Err(failure) = &outcome {
            tracing::error!("💥 Run {} failed: {}", job.id, failure);
            if let Err(e) = self.queue.fail(&job, &failure.to_string(), Utc::now()).await {
                tracing::error!("❌ Could not record failure of run {}: {}", job.id, e);
            }
        }
        outcome
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(s) => *s,
        Err(panic) => panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown panic".to_string()),
    }
}
