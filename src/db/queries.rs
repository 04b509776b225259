use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus};

const JOB_COLUMNS: &str = r#"id, name, description, job_type, target, payload, schedule_type,
       cron_expression, specific_time, "interval", interval_value, status,
       created_at, updated_at, last_run, next_run, error_message"#;

/// Whether a store error is a primary-key conflict on insert.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// Insert a new job record. Fails on duplicate id.
pub async fn insert_job(pool: &PgPool, job: &Job) -> Result<Job, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO jobs (id, name, description, job_type, target, payload, schedule_type,
                          cron_expression, specific_time, "interval", interval_value, status,
                          created_at, updated_at, last_run, next_run, error_message)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        RETURNING {JOB_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Job>(&sql)
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.description)
        .bind(job.job_type)
        .bind(&job.target)
        .bind(&job.payload)
        .bind(job.schedule_type)
        .bind(&job.cron_expression)
        .bind(job.specific_time)
        .bind(job.interval)
        .bind(job.interval_value)
        .bind(job.status)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.last_run)
        .bind(job.next_run)
        .bind(&job.error_message)
        .fetch_one(pool)
        .await
}

/// Fetch a job by id.
pub async fn get_job(pool: &PgPool, id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
    sqlx::query_as::<_, Job>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// List jobs, optionally filtered by status, newest first.
pub async fn list_jobs(pool: &PgPool, status: Option<JobStatus>) -> Result<Vec<Job>, sqlx::Error> {
    match status {
        Some(status) => {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE status = $1 ORDER BY created_at DESC"
            );
            sqlx::query_as::<_, Job>(&sql)
                .bind(status)
                .fetch_all(pool)
                .await
        }
        None => {
            let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC");
            sqlx::query_as::<_, Job>(&sql).fetch_all(pool).await
        }
    }
}

/// Replace the mutable fields of a job, preserving id, created_at, and
/// last_run. Touches updated_at.
pub async fn update_job(pool: &PgPool, id: Uuid, job: &Job) -> Result<Option<Job>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE jobs
        SET name = $2, description = $3, job_type = $4, target = $5, payload = $6,
            schedule_type = $7, cron_expression = $8, specific_time = $9, "interval" = $10,
            interval_value = $11, status = $12, next_run = $13, error_message = $14,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {JOB_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Job>(&sql)
        .bind(id)
        .bind(&job.name)
        .bind(&job.description)
        .bind(job.job_type)
        .bind(&job.target)
        .bind(&job.payload)
        .bind(job.schedule_type)
        .bind(&job.cron_expression)
        .bind(job.specific_time)
        .bind(job.interval)
        .bind(job.interval_value)
        .bind(job.status)
        .bind(job.next_run)
        .bind(&job.error_message)
        .fetch_optional(pool)
        .await
}

/// Worker-side status transition, writing the error message alongside.
pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    status: JobStatus,
    error_message: Option<&str>,
) -> Result<Option<Job>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE jobs
        SET status = $2, error_message = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING {JOB_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Job>(&sql)
        .bind(id)
        .bind(status)
        .bind(error_message)
        .fetch_optional(pool)
        .await
}

/// Operator-side status toggle; leaves error_message untouched.
pub async fn set_status(
    pool: &PgPool,
    id: Uuid,
    status: JobStatus,
) -> Result<Option<Job>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE jobs
        SET status = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING {JOB_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Job>(&sql)
        .bind(id)
        .bind(status)
        .fetch_optional(pool)
        .await
}

/// Record a successful delivery: last_run, the recomputed next_run, and a
/// cleared error message. Status is not touched.
pub async fn record_run(
    pool: &PgPool,
    id: Uuid,
    last_run: DateTime<Utc>,
    next_run: Option<DateTime<Utc>>,
) -> Result<Option<Job>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE jobs
        SET last_run = $2, next_run = $3, error_message = NULL, updated_at = NOW()
        WHERE id = $1
        RETURNING {JOB_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Job>(&sql)
        .bind(id)
        .bind(last_run)
        .bind(next_run)
        .fetch_optional(pool)
        .await
}

/// Reactivate a failed job: ACTIVE status, cleared error, fresh next_run.
pub async fn reactivate_job(
    pool: &PgPool,
    id: Uuid,
    next_run: Option<DateTime<Utc>>,
) -> Result<Option<Job>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE jobs
        SET status = 'ACTIVE', error_message = NULL, next_run = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING {JOB_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Job>(&sql)
        .bind(id)
        .bind(next_run)
        .fetch_optional(pool)
        .await
}

/// Mark a dead-lettered job as if it had succeeded once: ACTIVE status,
/// cleared error, last_run = now, recomputed next_run.
pub async fn complete_job(
    pool: &PgPool,
    id: Uuid,
    last_run: DateTime<Utc>,
    next_run: Option<DateTime<Utc>>,
) -> Result<Option<Job>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE jobs
        SET status = 'ACTIVE', error_message = NULL, last_run = $2, next_run = $3,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {JOB_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Job>(&sql)
        .bind(id)
        .bind(last_run)
        .bind(next_run)
        .fetch_optional(pool)
        .await
}

/// Delete a job, returning the removed record.
pub async fn delete_job(pool: &PgPool, id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let sql = format!("DELETE FROM jobs WHERE id = $1 RETURNING {JOB_COLUMNS}");
    sqlx::query_as::<_, Job>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
}
