//! End-to-end pipeline behavior through the public API: registration,
//! delivery, claiming and running, with the real sandbox child where code runs.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use pipewright::config::{LogicConfig, SandboxConfig, SANDBOX_CHILD_ARG};
use pipewright::db;
use pipewright::logic::{HandlerLoader, HandlerRegistry, LogicResolver};
use pipewright::pipeline::{MemoryTokenStore, NodeOutcome, PipelineRegistration, Trigger};
use pipewright::queue::{JobStatus, TaskQueue};
use pipewright::runtime::{DeliveryError, NodeDispatcher, PipelineRunner, RegistrationError, TriggerScheduler};
use pipewright::sandbox::{LocalSandbox, SandboxClient, SandboxError, SandboxRequest, SandboxResponse};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

/// Real sandbox that counts how often it is asked to run code
struct CountingSandbox {
    inner: LocalSandbox,
    calls: AtomicUsize,
}

#[async_trait]
impl SandboxClient for CountingSandbox {
    async fn run(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.run(request).await
    }
}

struct Engine {
    scheduler: TriggerScheduler,
    runner: Arc<PipelineRunner>,
    queue: TaskQueue,
    sandbox: Arc<CountingSandbox>,
    logic_dir: tempfile::TempDir,
}

impl Engine {
    async fn new() -> Self {
        let logic_dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            logic_dir.path().join("times_ten.lua"),
            "function run(prev, params, payload) return { value = prev.value * 10 } end",
        )
        .unwrap();

        let sandbox = Arc::new(CountingSandbox {
            inner: LocalSandbox::new(sandbox_config()),
            calls: AtomicUsize::new(0),
        });
        let registry = Arc::new(HandlerRegistry::with_builtins());
        let logic = LogicConfig {
            dir: logic_dir.path().to_path_buf(),
            mapping_file: "mapping.json".to_string(),
        };
        let dispatcher = NodeDispatcher::new(
            LogicResolver::new(&logic, Arc::clone(&registry)),
            HandlerLoader::new(registry, sandbox.clone()),
            sandbox.clone(),
        );

        let queue = TaskQueue::new(db::connect_in_memory().await.unwrap(), Duration::from_secs(60), 3);
        let runner = Arc::new(PipelineRunner::new(dispatcher, queue.clone()));
        let scheduler = TriggerScheduler::new(Arc::new(MemoryTokenStore::new()), queue.clone(), "http://engine");

        Self {
            scheduler,
            runner,
            queue,
            sandbox,
            logic_dir,
        }
    }

    fn logic_path(&self) -> &Path {
        self.logic_dir.path()
    }

    async fn register_webhook(&self, nodes: Value) -> String {
        let registration = registration(json!({"type": "webhook"}), nodes);
        match self.scheduler.register(registration, Utc::now()).await.unwrap().trigger {
            Trigger::Webhook { token } => token,
            other => panic!("unexpected trigger {:?}", other),
        }
    }

    /// Claim the next job due by `at` and run it to completion
    async fn run_next(&self, at: chrono::DateTime<Utc>) -> pipewright::RunReport {
        let job = self.queue.claim("test-worker", at).await.unwrap().expect("a due job");
        self.runner.run_job(job).await.unwrap()
    }
}

fn sandbox_config() -> SandboxConfig {
    SandboxConfig {
        timeout_seconds: 5,
        cpu_seconds: 2,
        memory_mb: 256,
        program: PathBuf::from(env!("CARGO_BIN_EXE_pipewright")),
        program_args: vec![SANDBOX_CHILD_ARG.to_string()],
        scratch_dir: None,
        remote_url: None,
        request_slack_seconds: 5,
        max_output_bytes: 1024 * 1024,
    }
}

fn registration(trigger: Value, nodes: Value) -> PipelineRegistration {
    serde_json::from_value(json!({ "flow_id": "flow-e2e", "trigger": trigger, "nodes": nodes })).unwrap()
}

#[tokio::test]
async fn test_webhook_double_then_add_five() {
    let engine = Engine::new().await;
    let token = engine
        .register_webhook(json!([
            { "id": "n1", "logic": "double_value" },
            { "id": "n2", "logic": "add_five", "params": { "add": 5 } }
        ]))
        .await;

    let accepted = engine
        .scheduler
        .deliver_webhook("flow-e2e", &token, json!({"value": 3}))
        .await
        .unwrap();

    let report = engine.run_next(Utc::now()).await;
    assert_eq!(report.run_id, accepted.job_id);
    assert_eq!(report.final_prev["value"], json!(11));

    let record = engine.queue.get(&accepted.job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Succeeded);
    let results = record.results.unwrap();
    assert_eq!(results[0]["node_id"], json!("n1"));
    assert_eq!(results[0]["result"]["result"]["value"], json!(6));
    assert_eq!(results[1]["result"]["result"]["value"], json!(11));
}

#[tokio::test]
async fn test_inline_and_script_nodes_chain_through_sandbox() {
    let engine = Engine::new().await;
    assert!(engine.logic_path().join("times_ten.lua").exists());
    let token = engine
        .register_webhook(json!([
            { "id": "n1", "logic": "double_value" },
            { "id": "n2", "logic": "inline", "params": { "code": "return { value = prev.value + 5 }" } },
            { "id": "n3", "logic": "times_ten" }
        ]))
        .await;

    engine
        .scheduler
        .deliver_webhook("flow-e2e", &token, json!({"value": 3}))
        .await
        .unwrap();

    let report = engine.run_next(Utc::now()).await;
    assert!(report.failed_nodes().is_empty(), "{:?}", report.results_json());
    assert_eq!(report.final_prev, json!({"value": 110}));
    assert_eq!(engine.sandbox.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_webhook_body_with_nodes_is_rejected_without_enqueue() {
    let engine = Engine::new().await;
    let token = engine.register_webhook(json!([{ "id": "n1", "logic": "double_value" }])).await;

    let err = engine
        .scheduler
        .deliver_webhook("flow-e2e", &token, json!({"nodes": [{"id": "evil", "logic": "inline"}]}))
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::ForbiddenField("nodes")));

    assert!(engine.queue.jobs_for_trigger(&token).await.unwrap().is_empty());
    assert!(engine.queue.claim("w", Utc::now()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_empty_inline_code_never_spawns() {
    let engine = Engine::new().await;
    let token = engine
        .register_webhook(json!([
            { "id": "n1", "logic": "inline", "params": { "code": "   " } },
            { "id": "n2", "logic": "do_something" }
        ]))
        .await;
    engine.scheduler.deliver_webhook("flow-e2e", &token, json!({})).await.unwrap();

    let report = engine.run_next(Utc::now()).await;
    assert_eq!(report.failed_nodes(), vec!["n1"]);
    match &report.results[0].outcome {
        NodeOutcome::Err(e) => assert_eq!(e.message, "empty code"),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(engine.sandbox.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_interval_completions_each_enqueue_next_occurrence() {
    let engine = Engine::new().await;
    let result = engine
        .scheduler
        .register(
            registration(
                json!({"type": "time", "schedule": {"mode": "interval", "interval_seconds": 60}}),
                json!([{ "id": "n1", "logic": "do_something" }]),
            ),
            Utc::now(),
        )
        .await
        .unwrap();
    let schedule_id = result.trigger_id.unwrap();

    // Nothing is due before the first interval has elapsed
    assert!(engine.queue.claim("w", Utc::now()).await.unwrap().is_none());

    let completions = 3;
    for n in 1..=completions {
        let far_future = Utc::now() + ChronoDuration::hours(n);
        engine.run_next(far_future).await;
    }

    let jobs = engine.queue.jobs_for_trigger(&schedule_id).await.unwrap();
    assert_eq!(jobs.len(), completions as usize + 1);
    assert_eq!(jobs.iter().filter(|j| j.status == JobStatus::Succeeded).count(), completions as usize);
    assert_eq!(jobs.iter().filter(|j| j.status == JobStatus::Queued).count(), 1);

    let schedule = engine.queue.schedule(&schedule_id).await.unwrap().unwrap();
    assert_eq!(schedule.fire_count, completions as u64 + 1);
    assert!(schedule.active);
}

#[tokio::test]
async fn test_one_shot_in_past_rejected() {
    let engine = Engine::new().await;
    let at = (Utc::now() - ChronoDuration::seconds(5)).to_rfc3339();

    let err = engine
        .scheduler
        .register(
            registration(json!({"type": "time", "schedule": {"mode": "once", "at": at}}), json!([])),
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::PastDue { .. }));
    assert_eq!(engine.queue.count_by_status(JobStatus::Queued).await.unwrap(), 0);
}
