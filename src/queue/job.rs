/// Queue records
///
/// A job is one pending or finished run of a pipeline. Its node list and
/// trigger metadata are copied in at enqueue time, so a run never depends on
/// registration state that might change later.

use crate::pipeline::types::{Node, TriggerMeta};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// A run to be enqueued
#[derive(Debug, Clone)]
pub struct NewJob {
    pub flow_id: String,
    pub nodes: Vec<Node>,
    pub payload: Value,
    pub trigger: TriggerMeta,
    pub run_at: DateTime<Utc>,
}

/// A claimed run, leased to one worker
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub flow_id: String,
    pub nodes: Vec<Node>,
    pub payload: Value,
    pub trigger: TriggerMeta,
    pub run_at: DateTime<Utc>,
    /// Attempt number of this claim; also identifies the lease
    pub attempts: u32,
    pub worker_id: String,
}

/// Stored view of a run, as returned by the runs API
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub flow_id: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub run_at: DateTime<Utc>,
    pub trigger: TriggerMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Persisted state of a recurring trigger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schedule {
    pub id: String,
    pub flow_id: String,
    pub interval_seconds: u64,
    pub next_fire_at: DateTime<Utc>,
    /// Occurrences enqueued so far
    pub fire_count: u64,
    pub active: bool,
}
