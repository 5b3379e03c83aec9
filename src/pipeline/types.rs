/// Core pipeline type definitions
///
/// Defines nodes, pipelines, triggers and the per-run records that flow between
/// the scheduler, the queue and the runner. Everything here is plain data and is
/// serialized as JSON when it crosses the queue or the HTTP boundary.

use crate::sandbox::SandboxResponse;
use chrono::{DateTime, Datelike, TimeDelta, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Node parameters: a flat name → JSON value mapping
pub type Params = Map<String, Value>;

/// Field of an `Ok` envelope holding a handler's return value
pub const RESULT_FIELD: &str = "result";

/// Field of a sandbox envelope holding the child's stdout
pub const RAW_OUTPUT_FIELD: &str = "stdout";

/// Per-node flags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFlags {
    /// When set, the node starts from the empty value instead of the
    /// previous node's output
    #[serde(default)]
    pub pass_through: bool,
}

/// A single processing step in a pipeline
///
/// `id` is unique within its pipeline. Nodes are never mutated after
/// registration; execution only ever borrows them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier within the pipeline (e.g., "n1")
    pub id: String,
    /// Logic name resolved at dispatch time, or the inline sentinel
    pub logic: String,
    /// Node configuration handed to the logic untouched
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub flags: NodeFlags,
}

impl Node {
    pub fn new(id: impl Into<String>, logic: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            logic: logic.into(),
            params: Params::new(),
            flags: NodeFlags::default(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn pass_through(mut self) -> Self {
        self.flags.pass_through = true;
        self
    }
}

/// A materialized trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Webhook { token: String },
    TimeOnce { fire_at: DateTime<Utc> },
    TimeInterval {
        #[serde(with = "duration_secs")]
        period: Duration,
    },
}

/// A registered pipeline: ordered nodes bound to one trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub flow_id: String,
    pub nodes: Vec<Node>,
    pub trigger: Trigger,
}

/// Registration request body
///
/// POST /triggers
/// Body: { "flow_id": "...", "trigger": {...}, "nodes": [...] }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRegistration {
    pub flow_id: String,
    pub trigger: TriggerSpec,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// Trigger as supplied by the caller, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TriggerSpec {
    Webhook,
    Time {
        #[serde(default)]
        schedule: Option<TimeSchedule>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    Once,
    Interval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSchedule {
    pub mode: ScheduleMode,
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub interval_seconds: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Webhook,
    Once,
    Interval,
}

/// Trigger metadata carried by every queued run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerMeta {
    pub kind: TriggerKind,
    pub flow_id: String,
    /// Webhook token or schedule id
    pub trigger_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fire_at: Option<DateTime<Utc>>,
    /// 1-based occurrence number for time triggers
    #[serde(default)]
    pub occurrence: u64,
}

impl TriggerMeta {
    pub fn webhook(flow_id: &str, token: &str) -> Self {
        Self {
            kind: TriggerKind::Webhook,
            flow_id: flow_id.to_string(),
            trigger_id: token.to_string(),
            interval_seconds: None,
            fire_at: None,
            occurrence: 0,
        }
    }

    pub fn once(flow_id: &str, trigger_id: &str, fire_at: DateTime<Utc>) -> Self {
        Self {
            kind: TriggerKind::Once,
            flow_id: flow_id.to_string(),
            trigger_id: trigger_id.to_string(),
            interval_seconds: None,
            fire_at: Some(fire_at),
            occurrence: 1,
        }
    }

    pub fn interval(flow_id: &str, schedule_id: &str, interval_seconds: u64, fire_at: DateTime<Utc>) -> Self {
        Self {
            kind: TriggerKind::Interval,
            flow_id: flow_id.to_string(),
            trigger_id: schedule_id.to_string(),
            interval_seconds: Some(interval_seconds),
            fire_at: Some(fire_at),
            occurrence: 1,
        }
    }

    /// Metadata for the following occurrence of a recurring trigger, one
    /// interval after `from`
    pub fn next_occurrence(&self, from: DateTime<Utc>) -> Option<Self> {
        let interval = self.interval_seconds.filter(|_| self.kind == TriggerKind::Interval)?;
        let fire_at = fire_after(from, interval)?;
        Some(Self {
            fire_at: Some(fire_at),
            occurrence: self.occurrence + 1,
            ..self.clone()
        })
    }
}

/// Latest year a fire time may fall in; later instants do not round-trip
/// through RFC 3339 timestamps
pub const MAX_FIRE_YEAR: i32 = 9999;

/// `from` plus `seconds`, or `None` when the result is out of range
pub fn fire_after(from: DateTime<Utc>, seconds: u64) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::try_seconds(i64::try_from(seconds).ok()?)?;
    from.checked_add_signed(delta).filter(|at| at.year() <= MAX_FIRE_YEAR)
}

/// Per-run execution context
///
/// `payload` is the webhook body (or `{}` for time triggers) and never changes
/// during the run; it only seeds the first node's `prev`.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: String,
    pub payload: Value,
    pub trigger: TriggerMeta,
}

/// Failure detail attached to an `Err` outcome
#[derive(Debug, Clone, PartialEq)]
pub struct NodeError {
    pub message: String,
    /// Extra fields merged into the envelope (trace, path, logic, ...)
    pub detail: Map<String, Value>,
}

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }
}

/// What a single node produced
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// A registered or script handler returned a value
    Ok(Value),
    /// An inline snippet ran in the sandbox (successfully or not)
    Sandbox(SandboxResponse),
    /// Dispatch, handler, sandbox or transport failure
    Err(NodeError),
}

impl NodeOutcome {
    pub fn is_ok(&self) -> bool {
        match self {
            NodeOutcome::Ok(_) => true,
            NodeOutcome::Sandbox(response) => response.ok,
            NodeOutcome::Err(_) => false,
        }
    }

    /// JSON envelope recorded in the run log and seen by the next node
    ///
    /// - `Ok`      → `{"ok": true, "result": value}`
    /// - `Sandbox` → the sandbox response as-is
    /// - `Err`     → `{"ok": false, "error": message, ...detail}`
    pub fn envelope(&self) -> Value {
        match self {
            NodeOutcome::Ok(value) => {
                let mut envelope = Map::new();
                envelope.insert("ok".to_string(), Value::Bool(true));
                envelope.insert(RESULT_FIELD.to_string(), value.clone());
                Value::Object(envelope)
            }
            NodeOutcome::Sandbox(response) => {
                serde_json::to_value(response).unwrap_or_else(|e| json!({ "ok": false, "error": e.to_string() }))
            }
            NodeOutcome::Err(error) => {
                let mut envelope = Map::new();
                envelope.insert("ok".to_string(), Value::Bool(false));
                envelope.insert("error".to_string(), Value::String(error.message.clone()));
                for (key, value) in &error.detail {
                    envelope.entry(key.clone()).or_insert_with(|| value.clone());
                }
                Value::Object(envelope)
            }
        }
    }
}

impl Serialize for NodeOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.envelope().serialize(serializer)
    }
}

/// One entry of a run's result log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeResult {
    pub node_id: String,
    pub logic: String,
    #[serde(rename = "result")]
    pub outcome: NodeOutcome,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_parses_wire_shapes() {
        let webhook: PipelineRegistration = serde_json::from_value(json!({
            "flow_id": "test-flow-1",
            "trigger": { "type": "webhook" },
            "nodes": [
                { "id": "n1", "logic": "validate_input", "params": { "required": true } },
                { "id": "n2", "logic": "do_something", "flags": { "pass_through": true } }
            ]
        }))
        .unwrap();
        assert!(matches!(webhook.trigger, TriggerSpec::Webhook));
        assert_eq!(webhook.nodes[0].params["required"], json!(true));
        assert!(!webhook.nodes[0].flags.pass_through);
        assert!(webhook.nodes[1].flags.pass_through);
        assert!(webhook.nodes[1].params.is_empty());

        let interval: PipelineRegistration = serde_json::from_value(json!({
            "flow_id": "f",
            "trigger": { "type": "time", "schedule": { "mode": "interval", "interval_seconds": 60 } },
            "nodes": []
        }))
        .unwrap();
        match interval.trigger {
            TriggerSpec::Time { schedule: Some(schedule) } => {
                assert_eq!(schedule.mode, ScheduleMode::Interval);
                assert_eq!(schedule.interval_seconds, Some(60));
            }
            other => panic!("unexpected trigger {:?}", other),
        }
    }

    #[test]
    fn test_envelopes() {
        assert_eq!(
            NodeOutcome::Ok(json!({"value": 6})).envelope(),
            json!({"ok": true, "result": {"value": 6}})
        );

        let err = NodeOutcome::Err(
            NodeError::new("no handler for logic 'nope'")
                .with_detail("logic", "nope")
                .with_detail("error", "must not override the message"),
        );
        assert_eq!(
            err.envelope(),
            json!({"ok": false, "error": "no handler for logic 'nope'", "logic": "nope"})
        );
        assert!(!err.is_ok());
    }

    #[test]
    fn test_next_occurrence_advances_by_interval() {
        let fire_at = Utc::now();
        let completed_at = fire_at + chrono::Duration::seconds(2);
        let meta = TriggerMeta::interval("f", "s1", 30, fire_at);
        let next = meta.next_occurrence(completed_at).unwrap();
        assert_eq!(next.occurrence, 2);
        assert_eq!(next.fire_at, Some(completed_at + chrono::Duration::seconds(30)));
        assert!(TriggerMeta::webhook("f", "tok").next_occurrence(completed_at).is_none());
    }

    #[test]
    fn test_next_occurrence_out_of_range_is_none() {
        let now = Utc::now();
        assert!(fire_after(now, u64::MAX).is_none());
        assert!(fire_after(now, 10_000_000_000_000).is_none());
        assert_eq!(fire_after(now, 60), Some(now + chrono::Duration::seconds(60)));

        let meta = TriggerMeta::interval("f", "s1", 10_000_000_000_000, now);
        assert!(meta.next_occurrence(now).is_none());
    }
}
