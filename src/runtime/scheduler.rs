/// Trigger Scheduler
///
/// Turns a registration into enqueued runs:
/// - webhook: mint an unguessable token and bind it to the pipeline; each
///   delivery enqueues one run with the request body as payload
/// - one-shot: enqueue exactly one run at `at` (which must be in the future)
/// - interval: persist a schedule and enqueue the first run one interval out;
///   later occurrences are enqueued as each run completes

use crate::pipeline::store::{StoreError, TokenStore, WebhookRegistration};
use crate::pipeline::types::{
    fire_after, Node, Pipeline, PipelineRegistration, ScheduleMode, Trigger, TriggerMeta, TriggerSpec,
};
use crate::queue::{NewJob, TaskQueue};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::{collections::HashSet, sync::Arc, time::Duration};
use uuid::Uuid;

/// Top-level body fields that would redefine the pipeline
pub const FORBIDDEN_BODY_FIELDS: [&str; 3] = ["nodes", "trigger", "flow_id"];

/// Token mint attempts before giving up on collisions
const TOKEN_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("flow_id must not be empty")]
    EmptyFlowId,

    #[error("node at position {0} has an empty id")]
    EmptyNodeId(usize),

    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("time trigger requires a schedule")]
    MissingSchedule,

    #[error("one-shot schedule requires 'at'")]
    MissingAt,

    #[error("'at' must be in the future (got {at}, now {now})")]
    PastDue { at: DateTime<Utc>, now: DateTime<Utc> },

    #[error("interval schedule requires 'interval_seconds'")]
    MissingInterval,

    #[error("interval_seconds must be positive (got {0})")]
    NonPositiveInterval(i64),

    #[error("interval_seconds is too large (got {0})")]
    IntervalTooLarge(i64),

    #[error("failed to store webhook: {0}")]
    Store(#[from] StoreError),

    #[error("failed to enqueue run: {0}")]
    Queue(#[source] anyhow::Error),
}

impl RegistrationError {
    /// True for caller mistakes, false for infrastructure failures
    pub fn is_validation(&self) -> bool {
        !matches!(self, RegistrationError::Store(_) | RegistrationError::Queue(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("webhook not found")]
    NotFound,

    #[error("flow id does not match this webhook")]
    FlowMismatch,

    #[error("body must not contain top-level '{0}'")]
    ForbiddenField(&'static str),

    #[error("failed to look up webhook: {0}")]
    Store(#[from] StoreError),

    #[error("failed to enqueue run: {0}")]
    Queue(#[source] anyhow::Error),
}

/// What a registration produced
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationResult {
    pub flow_id: String,
    pub trigger: Trigger,
    /// `{public base}/webhook/{flow_id}/{token}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Trigger id for time triggers (the schedule id for intervals)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    /// First enqueued run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
}

/// Acknowledgement of a webhook delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryAccepted {
    pub status: &'static str,
    pub trigger_id: String,
    pub flow_id: String,
    pub job_id: String,
}

pub struct TriggerScheduler {
    store: Arc<dyn TokenStore>,
    queue: TaskQueue,
    public_base_url: String,
}

impl TriggerScheduler {
    pub fn new(store: Arc<dyn TokenStore>, queue: TaskQueue, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            queue,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn webhook_path(flow_id: &str, token: &str) -> String {
        format!("/webhook/{}/{}", flow_id, token)
    }

    /// Validate a registration and materialize its trigger
    ///
    /// Webhook tokens are minted here; nothing is persisted.
    pub fn materialize(&self, registration: PipelineRegistration, now: DateTime<Utc>) -> Result<Pipeline, RegistrationError> {
        if registration.flow_id.trim().is_empty() {
            return Err(RegistrationError::EmptyFlowId);
        }
        validate_nodes(&registration.nodes)?;

        let trigger = match registration.trigger {
            TriggerSpec::Webhook => Trigger::Webhook { token: mint_token() },
            TriggerSpec::Time { schedule } => {
                let schedule = schedule.ok_or(RegistrationError::MissingSchedule)?;
                match schedule.mode {
                    ScheduleMode::Once => {
                        let at = schedule.at.ok_or(RegistrationError::MissingAt)?;
                        if at <= now {
                            return Err(RegistrationError::PastDue { at, now });
                        }
                        Trigger::TimeOnce { fire_at: at }
                    }
                    ScheduleMode::Interval => {
                        let seconds = schedule.interval_seconds.ok_or(RegistrationError::MissingInterval)?;
                        if seconds <= 0 {
                            return Err(RegistrationError::NonPositiveInterval(seconds));
                        }
                        if fire_after(now, seconds as u64).is_none() {
                            return Err(RegistrationError::IntervalTooLarge(seconds));
                        }
                        Trigger::TimeInterval {
                            period: Duration::from_secs(seconds as u64),
                        }
                    }
                }
            }
        };

        Ok(Pipeline {
            flow_id: registration.flow_id,
            nodes: registration.nodes,
            trigger,
        })
    }

    pub async fn register(
        &self,
        registration: PipelineRegistration,
        now: DateTime<Utc>,
    ) -> Result<RegistrationResult, RegistrationError> {
        let mut pipeline = self.materialize(registration, now)?;

        match pipeline.trigger.clone() {
            Trigger::Webhook { token } => {
                let token = self.store_webhook(&pipeline, token, now).await?;
                pipeline.trigger = Trigger::Webhook { token: token.clone() };
                let url = format!("{}{}", self.public_base_url, Self::webhook_path(&pipeline.flow_id, &token));
                tracing::info!("🔗 Registered webhook for flow '{}': {}", pipeline.flow_id, url);

                Ok(RegistrationResult {
                    flow_id: pipeline.flow_id,
                    trigger: pipeline.trigger,
                    webhook_url: Some(url),
                    trigger_id: None,
                    job_id: None,
                    delay_seconds: None,
                    interval_seconds: None,
                })
            }
            Trigger::TimeOnce { fire_at } => {
                let trigger_id = Uuid::new_v4().simple().to_string();
                let job_id = self
                    .queue
                    .enqueue(&NewJob {
                        flow_id: pipeline.flow_id.clone(),
                        nodes: pipeline.nodes.clone(),
                        payload: Value::Object(Map::new()),
                        trigger: TriggerMeta::once(&pipeline.flow_id, &trigger_id, fire_at),
                        run_at: fire_at,
                    })
                    .await
                    .map_err(RegistrationError::Queue)?;
                let delay = (fire_at - now).num_milliseconds() as f64 / 1000.0;
                tracing::info!("⏰ Scheduled one-shot run of flow '{}' in {:.3}s", pipeline.flow_id, delay);

                Ok(RegistrationResult {
                    flow_id: pipeline.flow_id,
                    trigger: pipeline.trigger,
                    webhook_url: None,
                    trigger_id: Some(trigger_id),
                    job_id: Some(job_id),
                    delay_seconds: Some(delay),
                    interval_seconds: None,
                })
            }
            Trigger::TimeInterval { period } => {
                let schedule_id = Uuid::new_v4().simple().to_string();
                let seconds = period.as_secs();
                let first_at = fire_after(now, seconds).ok_or(RegistrationError::IntervalTooLarge(seconds as i64))?;
                let job_id = self
                    .queue
                    .arm_schedule(&NewJob {
                        flow_id: pipeline.flow_id.clone(),
                        nodes: pipeline.nodes.clone(),
                        payload: Value::Object(Map::new()),
                        trigger: TriggerMeta::interval(&pipeline.flow_id, &schedule_id, seconds, first_at),
                        run_at: first_at,
                    })
                    .await
                    .map_err(RegistrationError::Queue)?;

                Ok(RegistrationResult {
                    flow_id: pipeline.flow_id,
                    trigger: pipeline.trigger,
                    webhook_url: None,
                    trigger_id: Some(schedule_id),
                    job_id: Some(job_id),
                    delay_seconds: None,
                    interval_seconds: Some(seconds),
                })
            }
        }
    }

    /// Persist the webhook, re-minting on the rare token collision
    async fn store_webhook(&self, pipeline: &Pipeline, first: String, now: DateTime<Utc>) -> Result<String, RegistrationError> {
        let mut token = first;
        let mut attempt = 1;
        loop {
            let registration = WebhookRegistration {
                token: token.clone(),
                flow_id: pipeline.flow_id.clone(),
                nodes: pipeline.nodes.clone(),
                created_at: now,
            };
            match self.store.put(registration).await {
                Ok(()) => return Ok(token),
                Err(StoreError::Conflict(_)) if attempt < TOKEN_ATTEMPTS => {
                    attempt += 1;
                    token = mint_token();
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Accept a webhook delivery and enqueue one run
    pub async fn deliver_webhook(&self, flow_id: &str, token: &str, body: Value) -> Result<DeliveryAccepted, DeliveryError> {
        let registration = self.store.get(token).await?.ok_or(DeliveryError::NotFound)?;
        if registration.flow_id != flow_id {
            return Err(DeliveryError::FlowMismatch);
        }

        let payload = match body {
            Value::Object(fields) => {
                if let Some(field) = FORBIDDEN_BODY_FIELDS.iter().find(|f| fields.contains_key(**f)) {
                    return Err(DeliveryError::ForbiddenField(*field));
                }
                Value::Object(fields)
            }
            _ => Value::Object(Map::new()),
        };

        let job_id = self
            .queue
            .enqueue(&NewJob {
                flow_id: registration.flow_id.clone(),
                nodes: registration.nodes,
                payload,
                trigger: TriggerMeta::webhook(&registration.flow_id, token),
                run_at: Utc::now(),
            })
            .await
            .map_err(DeliveryError::Queue)?;

        tracing::info!("📥 Webhook accepted for flow '{}' → job {}", flow_id, job_id);
        Ok(DeliveryAccepted {
            status: "accepted",
            trigger_id: token.to_string(),
            flow_id: registration.flow_id,
            job_id,
        })
    }
}

fn mint_token() -> String {
    Uuid::new_v4().simple().to_string()
}

fn validate_nodes(nodes: &[Node]) -> Result<(), RegistrationError> {
    let mut seen = HashSet::new();
    for (position, node) in nodes.iter().enumerate() {
        if node.id.trim().is_empty() {
            return Err(RegistrationError::EmptyNodeId(position));
        }
        if !seen.insert(node.id.as_str()) {
            return Err(RegistrationError::DuplicateNodeId(node.id.clone()));
        }
    }
    Ok(())
}
