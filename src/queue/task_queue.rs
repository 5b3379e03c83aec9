/// SQLite task queue
///
/// Jobs move `queued → running → succeeded | failed`. A claim is an optimistic
/// UPDATE that only succeeds if the row is still claimable, so concurrent
/// workers never run the same claim twice. A claim carries a lease: a worker
/// that dies mid-run leaves its row `running`, and once the lease expires the
/// row becomes claimable again (at-least-once execution).
///
/// Recurring triggers keep a `schedules` row with the next fire time. Completing
/// an interval run and enqueuing its next occurrence commit together, so the
/// chain of occurrences survives a crash at any point.

use crate::pipeline::types::TriggerMeta;
use crate::queue::job::{Job, JobRecord, JobStatus, NewJob, Schedule};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnection, SqlitePool, SqliteRow},
    Row,
};
use std::time::Duration;
use uuid::Uuid;

/// Claim attempts before giving up on a contended poll
const CLAIM_RETRIES: usize = 3;

/// Default delay added per failed attempt before a retry
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct TaskQueue {
    pool: SqlitePool,
    lease: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl TaskQueue {
    pub fn new(pool: SqlitePool, lease: Duration, max_attempts: u32) -> Self {
        Self {
            pool,
            lease,
            max_attempts: max_attempts.max(1),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Enqueue one run; returns the job id
    pub async fn enqueue(&self, job: &NewJob) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let mut conn = self.pool.acquire().await?;
        insert_job(&mut conn, &id, job, Utc::now()).await?;
        tracing::debug!("📥 Enqueued job {} for flow '{}' at {}", id, job.flow_id, job.run_at);
        Ok(id)
    }

    /// Persist a recurring schedule together with its first occurrence
    ///
    /// The schedule id is the trigger id carried in `first.trigger`.
    pub async fn arm_schedule(&self, first: &NewJob) -> Result<String> {
        let interval = first
            .trigger
            .interval_seconds
            .ok_or_else(|| anyhow!("interval trigger without interval_seconds"))?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO schedules (id, flow_id, interval_seconds, next_fire_at, fire_count, active, created_at)
            VALUES (?, ?, ?, ?, 1, 1, ?)
            "#,
        )
        .bind(&first.trigger.trigger_id)
        .bind(&first.flow_id)
        .bind(interval as i64)
        .bind(first.run_at.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&mut *tx)
        .await?;
        insert_job(&mut tx, &id, first, now).await?;
        tx.commit().await?;

        tracing::info!(
            "⏰ Armed schedule {} for flow '{}' every {}s, first run at {}",
            first.trigger.trigger_id,
            first.flow_id,
            interval,
            first.run_at
        );
        Ok(id)
    }

    /// Lease the oldest due job to `worker_id`
    ///
    /// Due means queued with `run_at <= now`, or running with an expired lease.
    /// Expired leases that already used every attempt are marked failed instead,
    /// and their schedules stop recurring.
    pub async fn claim(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
        let now_ms = now.timestamp_millis();
        let lease_until = now_ms + self.lease.as_millis() as i64;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE schedules SET active = 0
            WHERE id IN (
                SELECT trigger_id FROM jobs
                WHERE status = 'running' AND lease_until < ? AND attempts >= ?
            )
            "#,
        )
        .bind(now_ms)
        .bind(self.max_attempts as i64)
        .execute(&mut *tx)
        .await?;
        let abandoned = sqlx::query(
            r#"
            UPDATE jobs SET status = 'failed', error = 'lease expired after final attempt',
                lease_until = NULL, finished_at = ?
            WHERE status = 'running' AND lease_until < ? AND attempts >= ?
            "#,
        )
        .bind(now_ms)
        .bind(now_ms)
        .bind(self.max_attempts as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        if abandoned.rows_affected() > 0 {
            tracing::warn!("❌ Marked {} abandoned job(s) failed", abandoned.rows_affected());
        }

        for _ in 0..CLAIM_RETRIES {
            let candidate = sqlx::query(
                r#"
                SELECT id FROM jobs
                WHERE (status = 'queued' AND run_at <= ?) OR (status = 'running' AND lease_until < ?)
                ORDER BY run_at ASC
                LIMIT 1
                "#,
            )
            .bind(now_ms)
            .bind(now_ms)
            .fetch_optional(&self.pool)
            .await?;

            let Some(candidate) = candidate else {
                return Ok(None);
            };
            let id: String = candidate.get("id");

            let claimed = sqlx::query(
                r#"
                UPDATE jobs SET status = 'running', attempts = attempts + 1, lease_until = ?, worker_id = ?
                WHERE id = ?
                  AND ((status = 'queued' AND run_at <= ?) OR (status = 'running' AND lease_until < ?))
                "#,
            )
            .bind(lease_until)
            .bind(worker_id)
            .bind(&id)
            .bind(now_ms)
            .bind(now_ms)
            .execute(&self.pool)
            .await?;

            if claimed.rows_affected() == 1 {
                let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
                    .bind(&id)
                    .fetch_one(&self.pool)
                    .await?;
                let job = job_from_row(&row)?;
                tracing::debug!("🔒 Worker {} claimed job {} (attempt {})", worker_id, job.id, job.attempts);
                return Ok(Some(job));
            }
            // Another worker won the row; look again
        }

        Ok(None)
    }

    /// Mark a claimed job succeeded and, for interval triggers, enqueue the
    /// next occurrence one interval after `now`
    ///
    /// Returns the next job's id when one was enqueued. A worker whose lease
    /// was taken over in the meantime changes nothing.
    pub async fn complete(&self, job: &Job, results: &Value, now: DateTime<Utc>) -> Result<Option<String>> {
        let now_ms = now.timestamp_millis();
        let results_json = serde_json::to_string(results)?;

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE jobs SET status = 'succeeded', results = ?, error = NULL, lease_until = NULL, finished_at = ?
            WHERE id = ? AND status = 'running' AND worker_id = ? AND attempts = ?
            "#,
        )
        .bind(&results_json)
        .bind(now_ms)
        .bind(&job.id)
        .bind(&job.worker_id)
        .bind(job.attempts as i64)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            tracing::warn!("⚠️ Job {} lost its lease before completion; result discarded", job.id);
            return Ok(None);
        }

        let mut next_id = None;
        if let Some(next) = job.trigger.next_occurrence(now) {
            let active = sqlx::query("SELECT active FROM schedules WHERE id = ?")
                .bind(&next.trigger_id)
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| row.get::<i64, _>("active") != 0)
                .unwrap_or(false);

            if active {
                let run_at = next.fire_at.unwrap_or(now);
                let id = Uuid::new_v4().to_string();
                insert_job(
                    &mut tx,
                    &id,
                    &NewJob {
                        flow_id: job.flow_id.clone(),
                        nodes: job.nodes.clone(),
                        payload: Value::Object(Default::default()),
                        trigger: next.clone(),
                        run_at,
                    },
                    now,
                )
                .await?;

                sqlx::query("UPDATE schedules SET next_fire_at = ?, fire_count = fire_count + 1 WHERE id = ?")
                    .bind(run_at.timestamp_millis())
                    .bind(&next.trigger_id)
                    .execute(&mut *tx)
                    .await?;

                tracing::info!(
                    "🔁 Re-armed schedule {} (occurrence {}) at {}",
                    next.trigger_id,
                    next.occurrence,
                    run_at
                );
                next_id = Some(id);
            }
        } else if job.trigger.interval_seconds.is_some() {
            sqlx::query("UPDATE schedules SET active = 0 WHERE id = ?")
                .bind(&job.trigger.trigger_id)
                .execute(&mut *tx)
                .await?;
            tracing::warn!(
                "⚠️ Schedule {} deactivated: next fire time is out of range",
                job.trigger.trigger_id
            );
        }

        tx.commit().await?;
        Ok(next_id)
    }

    /// Record a failed attempt: retry with linear backoff, or mark the job
    /// failed once every attempt is used
    ///
    /// A terminally failed interval run deactivates its schedule.
    pub async fn fail(&self, job: &Job, error: &str, now: DateTime<Utc>) -> Result<JobStatus> {
        let now_ms = now.timestamp_millis();

        if job.attempts < self.max_attempts {
            let retry_at = now_ms + (self.retry_backoff.as_millis() as i64) * job.attempts as i64;
            sqlx::query(
                r#"
                UPDATE jobs SET status = 'queued', run_at = ?, error = ?, lease_until = NULL
                WHERE id = ? AND status = 'running' AND worker_id = ? AND attempts = ?
                "#,
            )
            .bind(retry_at)
            .bind(error)
            .bind(&job.id)
            .bind(&job.worker_id)
            .bind(job.attempts as i64)
            .execute(&self.pool)
            .await?;

            tracing::warn!(
                "🔄 Job {} failed (attempt {}/{}), retrying: {}",
                job.id,
                job.attempts,
                self.max_attempts,
                error
            );
            return Ok(JobStatus::Queued);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE jobs SET status = 'failed', error = ?, lease_until = NULL, finished_at = ?
            WHERE id = ? AND status = 'running' AND worker_id = ? AND attempts = ?
            "#,
        )
        .bind(error)
        .bind(now_ms)
        .bind(&job.id)
        .bind(&job.worker_id)
        .bind(job.attempts as i64)
        .execute(&mut *tx)
        .await?;

        if job.trigger.interval_seconds.is_some() {
            sqlx::query("UPDATE schedules SET active = 0 WHERE id = ?")
                .bind(&job.trigger.trigger_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::error!("❌ Job {} failed after {} attempts: {}", job.id, job.attempts, error);
        Ok(JobStatus::Failed)
    }

    pub async fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| record_from_row(&row)).transpose()
    }

    /// Every run enqueued for a webhook token or schedule, oldest first
    pub async fn jobs_for_trigger(&self, trigger_id: &str) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE trigger_id = ? ORDER BY run_at ASC, created_at ASC")
            .bind(trigger_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn schedule(&self, id: &str) -> Result<Option<Schedule>> {
        let row = sqlx::query("SELECT * FROM schedules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Schedule {
            id: row.get("id"),
            flow_id: row.get("flow_id"),
            interval_seconds: row.get::<i64, _>("interval_seconds") as u64,
            next_fire_at: from_millis(row.get("next_fire_at")),
            fire_count: row.get::<i64, _>("fire_count") as u64,
            active: row.get::<i64, _>("active") != 0,
        }))
    }
}

async fn insert_job(conn: &mut SqliteConnection, id: &str, job: &NewJob, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO jobs (id, flow_id, nodes, payload, trigger_meta, trigger_id, status, run_at, attempts, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 'queued', ?, 0, ?)
        "#,
    )
    .bind(id)
    .bind(&job.flow_id)
    .bind(serde_json::to_string(&job.nodes)?)
    .bind(serde_json::to_string(&job.payload)?)
    .bind(serde_json::to_string(&job.trigger)?)
    .bind(&job.trigger.trigger_id)
    .bind(job.run_at.timestamp_millis())
    .bind(now.timestamp_millis())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_json<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.get(column);
    serde_json::from_str(&raw).map_err(|e| anyhow!("Corrupt {} column: {}", column, e))
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    Ok(Job {
        id: row.get("id"),
        flow_id: row.get("flow_id"),
        nodes: parse_json(row, "nodes")?,
        payload: parse_json(row, "payload")?,
        trigger: parse_json::<TriggerMeta>(row, "trigger_meta")?,
        run_at: from_millis(row.get("run_at")),
        attempts: row.get::<i64, _>("attempts") as u32,
        worker_id: row.get::<Option<String>, _>("worker_id").unwrap_or_default(),
    })
}

fn record_from_row(row: &SqliteRow) -> Result<JobRecord> {
    let status: String = row.get("status");
    let results = row
        .get::<Option<String>, _>("results")
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| anyhow!("Corrupt results column: {}", e))?;

    Ok(JobRecord {
        id: row.get("id"),
        flow_id: row.get("flow_id"),
        status: JobStatus::parse(&status).ok_or_else(|| anyhow!("Unknown job status '{}'", status))?,
        attempts: row.get::<i64, _>("attempts") as u32,
        run_at: from_millis(row.get("run_at")),
        trigger: parse_json(row, "trigger_meta")?,
        results,
        error: row.get("error"),
        created_at: from_millis(row.get("created_at")),
        finished_at: row.get::<Option<i64>, _>("finished_at").map(from_millis),
    })
}
