use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{IntervalUnit, Job, JobStatus, JobType, ScheduleType};

/// Request body for creating or replacing a job.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct JobInput {
    #[garde(length(min = 1, max = 200))]
    pub name: String,

    #[garde(length(max = 2000))]
    pub description: Option<String>,

    #[serde(rename = "type", default)]
    #[garde(skip)]
    pub job_type: JobType,

    #[garde(length(min = 1, max = 2000))]
    pub target: String,

    #[garde(skip)]
    pub payload: Option<serde_json::Value>,

    #[garde(skip)]
    pub schedule_type: ScheduleType,

    #[garde(length(min = 1, max = 200))]
    pub cron_expression: Option<String>,

    #[garde(skip)]
    pub specific_time: Option<DateTime<Utc>>,

    #[garde(skip)]
    pub interval: Option<IntervalUnit>,

    #[garde(range(min = 1))]
    pub interval_value: Option<i32>,

    #[garde(skip)]
    pub status: Option<JobStatus>,
}

/// Request body for PATCH /jobs/:id/status.
#[derive(Debug, Deserialize)]
pub struct ToggleStatusRequest {
    pub status: JobStatus,
}

/// Query parameters for GET /jobs.
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
}

/// Response carrying a message and the affected job.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub message: String,
    pub job: Job,
}

/// Response carrying only a confirmation message.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Error body returned by the REST surface.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
