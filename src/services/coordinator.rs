use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::models::api::JobInput;
use crate::models::job::{IntervalUnit, Job, JobStatus, ScheduleType};
use crate::services::queue::{DispatchEntry, DispatchQueue, QueueError};
use crate::services::schedule;

/// Failures surfaced by coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("specific_time is in the past")]
    SpecificTimeInPast,

    #[error("Job not found")]
    NotFound,

    #[error("Job already exists")]
    Conflict,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Façade over the job store and the dispatch queue. Every multi-step
/// operation orders its writes so the store stays the source of truth and
/// the worker's authoritative re-read masks residual queue entries.
pub struct Coordinator {
    db: PgPool,
    queue: Arc<DispatchQueue>,
}

impl Coordinator {
    pub fn new(db: PgPool, queue: Arc<DispatchQueue>) -> Self {
        Self { db, queue }
    }

    /// Validate the schedule fields and build a Job record carrying only
    /// the fields its schedule type requires.
    fn build_job(&self, id: Uuid, input: &JobInput) -> Result<Job, CoordinatorError> {
        // FAILED is a worker-assigned state carrying an error message; a
        // request may only choose ACTIVE or INACTIVE.
        if input.status == Some(JobStatus::Failed) {
            return Err(CoordinatorError::Validation(
                "status must be ACTIVE or INACTIVE".to_string(),
            ));
        }

        match url::Url::parse(&input.target) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(CoordinatorError::Validation(format!(
                    "target must use http or https, got '{}'",
                    url.scheme()
                )))
            }
            Err(e) => {
                return Err(CoordinatorError::Validation(format!(
                    "target is not a valid URL: {e}"
                )))
            }
        }

        let now = Utc::now();
        let mut job = Job {
            id,
            name: input.name.clone(),
            description: input.description.clone(),
            job_type: input.job_type,
            target: input.target.clone(),
            payload: input.payload.clone(),
            schedule_type: input.schedule_type,
            cron_expression: None,
            specific_time: None,
            interval: None,
            interval_value: None,
            status: input.status.unwrap_or(JobStatus::Active),
            created_at: now,
            updated_at: now,
            last_run: None,
            next_run: None,
            error_message: None,
        };

        match input.schedule_type {
            ScheduleType::Cron => {
                let expression = input
                    .cron_expression
                    .as_deref()
                    .ok_or_else(|| {
                        CoordinatorError::InvalidSchedule(
                            "cron_expression is required for CRON schedules".to_string(),
                        )
                    })?;
                if schedule::normalize_cron(expression).is_none() {
                    return Err(CoordinatorError::InvalidSchedule(format!(
                        "'{expression}' is not a valid 5- or 6-field cron expression"
                    )));
                }
                job.cron_expression = Some(expression.to_string());
            }
            ScheduleType::SpecificTime => {
                job.specific_time = Some(input.specific_time.ok_or_else(|| {
                    CoordinatorError::InvalidSchedule(
                        "specific_time is required for SPECIFIC_TIME schedules".to_string(),
                    )
                })?);
            }
            ScheduleType::Recurring => {
                let interval = input.interval.ok_or_else(|| {
                    CoordinatorError::InvalidSchedule(
                        "interval is required for RECURRING schedules".to_string(),
                    )
                })?;
                let value = input.interval_value.ok_or_else(|| {
                    CoordinatorError::InvalidSchedule(
                        "interval_value is required for RECURRING schedules".to_string(),
                    )
                })?;
                if value <= 0 {
                    return Err(CoordinatorError::InvalidSchedule(
                        "interval_value must be a positive integer".to_string(),
                    ));
                }
                job.interval = Some(interval);
                job.interval_value = Some(value);
            }
        }

        job.next_run = schedule::next_run(&job, now);
        if job.schedule_type != ScheduleType::SpecificTime && job.next_run.is_none() {
            return Err(CoordinatorError::InvalidSchedule(
                "schedule yields no future run".to_string(),
            ));
        }
        Ok(job)
    }

    fn dispatch_entry(job: &Job) -> DispatchEntry {
        DispatchEntry {
            job_id: job.id,
            target: job.target.clone(),
            job_type: job.job_type,
            payload: job.payload.clone(),
            attempt: 0,
        }
    }

    /// Reflect a job's schedule into the queue: a repeating registration,
    /// or a delayed one-shot for SPECIFIC_TIME and the plan-less
    /// MONTH/YEAR recurrences. Fails with SpecificTimeInPast for one-shots
    /// whose instant has already passed.
    async fn register_schedule(&self, job: &Job) -> Result<(), CoordinatorError> {
        let key = job.id.to_string();
        let entry = Self::dispatch_entry(job);

        if job.schedule_type == ScheduleType::SpecificTime {
            let delay = schedule::initial_delay(job, Utc::now())
                .ok_or(CoordinatorError::SpecificTimeInPast)?;
            self.queue.enqueue_delayed(&key, &entry, delay).await?;
            return Ok(());
        }

        match schedule::repeat_plan(job) {
            Some(plan) => {
                self.queue.enqueue_repeating(&key, &entry, plan).await?;
                Ok(())
            }
            None if Self::is_calendar_recurrence(job) => {
                let next = job
                    .next_run
                    .ok_or_else(|| {
                        CoordinatorError::InvalidSchedule(
                            "schedule yields no future run".to_string(),
                        )
                    })?;
                let delay = (next - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                self.queue.enqueue_delayed(&key, &entry, delay).await?;
                Ok(())
            }
            None => Err(CoordinatorError::InvalidSchedule(
                "schedule has no repeat plan".to_string(),
            )),
        }
    }

    fn is_calendar_recurrence(job: &Job) -> bool {
        job.schedule_type == ScheduleType::Recurring
            && matches!(
                job.interval,
                Some(IntervalUnit::Month) | Some(IntervalUnit::Year)
            )
    }

    /// Create a job and reflect it into the queue. A SPECIFIC_TIME job
    /// whose instant already passed keeps its store row (dormant, null
    /// next_run) but surfaces SpecificTimeInPast.
    pub async fn create(&self, input: &JobInput) -> Result<Job, CoordinatorError> {
        let id = Uuid::new_v4();
        let job = self.build_job(id, input)?;

        let inserted = queries::insert_job(&self.db, &job).await.map_err(|e| {
            if queries::is_unique_violation(&e) {
                CoordinatorError::Conflict
            } else {
                CoordinatorError::Database(e)
            }
        })?;

        match self.register_schedule(&inserted).await {
            Ok(()) => {}
            Err(CoordinatorError::SpecificTimeInPast) => {
                return Err(CoordinatorError::SpecificTimeInPast);
            }
            Err(err @ CoordinatorError::InvalidSchedule(_)) => {
                // Roll the insert back; an active row with no queue entry
                // would leak.
                let _ = queries::delete_job(&self.db, inserted.id).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        metrics::counter!("jobs_created_total").increment(1);
        tracing::info!(job_id = %inserted.id, name = %inserted.name, "Job created and scheduled");
        Ok(inserted)
    }

    pub async fn get(&self, id: Uuid) -> Result<Job, CoordinatorError> {
        queries::get_job(&self.db, id)
            .await?
            .ok_or(CoordinatorError::NotFound)
    }

    pub async fn list(&self, status: Option<JobStatus>) -> Result<Vec<Job>, CoordinatorError> {
        Ok(queries::list_jobs(&self.db, status).await?)
    }

    /// Replace a job's definition and rewire its queue registration.
    /// Equivalent to delete+create but preserving id, created_at, and
    /// last_run.
    pub async fn update(&self, id: Uuid, input: &JobInput) -> Result<Job, CoordinatorError> {
        self.get(id).await?;
        let replacement = self.build_job(id, input)?;

        let updated = queries::update_job(&self.db, id, &replacement)
            .await?
            .ok_or(CoordinatorError::NotFound)?;

        self.queue.remove(&id.to_string()).await?;
        // Same semantics as create: a past one-shot leaves the updated row
        // dormant and surfaces the error.
        self.register_schedule(&updated).await?;

        tracing::info!(job_id = %id, "Job updated and rescheduled");
        Ok(updated)
    }

    /// Delete a job and clear every queue trace of it, the DLQ included.
    pub async fn delete(&self, id: Uuid) -> Result<Job, CoordinatorError> {
        let deleted = queries::delete_job(&self.db, id)
            .await?
            .ok_or(CoordinatorError::NotFound)?;
        let key = id.to_string();
        self.queue.remove(&key).await?;
        self.queue.remove_dlq(&key).await?;
        tracing::info!(job_id = %id, "Job deleted");
        Ok(deleted)
    }

    /// Enqueue an immediate manual dispatch, keyed so it never collides
    /// with the scheduled registration. The worker's re-read still applies,
    /// so an INACTIVE job will not deliver.
    pub async fn run_now(&self, id: Uuid) -> Result<(), CoordinatorError> {
        let job = self.get(id).await?;
        let key = format!("{}-manual-{}", id, Utc::now().timestamp_millis());
        let entry = Self::dispatch_entry(&job);
        self.queue
            .enqueue_delayed(&key, &entry, Duration::ZERO)
            .await?;
        tracing::info!(job_id = %id, dispatch_key = %key, "Manual run enqueued");
        Ok(())
    }

    /// Operator toggle between ACTIVE and INACTIVE. Store-only: the queue
    /// registration stays and the worker enforces the INACTIVE skip.
    pub async fn toggle_status(
        &self,
        id: Uuid,
        status: JobStatus,
    ) -> Result<Job, CoordinatorError> {
        if status == JobStatus::Failed {
            return Err(CoordinatorError::Validation(
                "status can only be toggled to ACTIVE or INACTIVE".to_string(),
            ));
        }
        queries::set_status(&self.db, id, status)
            .await?
            .ok_or(CoordinatorError::NotFound)
    }

    /// Jobs awaiting operator action in the dead-letter queue.
    pub async fn list_dlq(&self) -> Result<Vec<Job>, CoordinatorError> {
        Ok(queries::list_jobs(&self.db, Some(JobStatus::Failed)).await?)
    }

    /// Return a dead-lettered job to active scheduling.
    pub async fn reactivate(&self, id: Uuid) -> Result<Job, CoordinatorError> {
        let job = self.get(id).await?;
        let next = schedule::next_run(&job, Utc::now());
        let reactivated = queries::reactivate_job(&self.db, id, next)
            .await?
            .ok_or(CoordinatorError::NotFound)?;

        match self.register_schedule(&reactivated).await {
            // A one-shot whose instant passed stays dormant.
            Ok(()) | Err(CoordinatorError::SpecificTimeInPast) => {}
            Err(err) => return Err(err),
        }
        self.queue.remove_dlq(&id.to_string()).await?;
        tracing::info!(job_id = %id, "Job reactivated from DLQ");
        Ok(reactivated)
    }

    /// Resolve a dead-lettered job as if it had succeeded once. Does not
    /// re-register a schedule that is already present in the queue.
    pub async fn complete(&self, id: Uuid) -> Result<Job, CoordinatorError> {
        let job = self.get(id).await?;
        let now = Utc::now();
        let next = schedule::next_run(&job, now);
        let completed = queries::complete_job(&self.db, id, now, next)
            .await?
            .ok_or(CoordinatorError::NotFound)?;

        let key = id.to_string();
        if !self.queue.contains(&key).await? {
            match self.register_schedule(&completed).await {
                Ok(()) | Err(CoordinatorError::SpecificTimeInPast) => {}
                Err(err) => return Err(err),
            }
        }
        self.queue.remove_dlq(&key).await?;
        tracing::info!(job_id = %id, "DLQ job marked complete");
        Ok(completed)
    }
}
