use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE", type_name = "text")]
pub enum JobStatus {
    Active,
    Inactive,
    Failed,
}

/// Kind of work a job performs. Only HTTP delivery is supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE", type_name = "text")]
pub enum JobType {
    #[default]
    Http,
}

/// How the job's dispatch instants are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE", type_name = "text")]
pub enum ScheduleType {
    Cron,
    SpecificTime,
    Recurring,
}

/// Calendar unit for `RECURRING` schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE", type_name = "text")]
pub enum IntervalUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

/// A scheduled HTTP delivery job.
///
/// Exactly the schedule fields required by `schedule_type` are populated;
/// the rest stay null. `next_run` is null once a one-shot has fired.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub target: String,
    pub payload: Option<serde_json::Value>,
    pub schedule_type: ScheduleType,
    pub cron_expression: Option<String>,
    pub specific_time: Option<DateTime<Utc>>,
    pub interval: Option<IntervalUnit>,
    pub interval_value: Option<i32>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}
