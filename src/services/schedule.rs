use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Months, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::models::job::{IntervalUnit, Job, ScheduleType};

/// How a repeating registration re-emits dispatches: a cron expression
/// evaluated per occurrence, or a fixed period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatPlan {
    Cron(String),
    Every(StdDuration),
}

/// Normalize a 5- or 6-field cron expression to the 6-field form the parser
/// expects (seconds first). Returns None for any other field count or a
/// parse failure.
pub fn normalize_cron(expression: &str) -> Option<String> {
    let normalized = match expression.split_whitespace().count() {
        5 => format!("0 {}", expression.trim()),
        6 => expression.trim().to_string(),
        _ => return None,
    };
    Schedule::from_str(&normalized).ok()?;
    Some(normalized)
}

/// Delay until the single dispatch of a `SPECIFIC_TIME` job, measured from
/// `now`. None when the instant is not strictly in the future, or for any
/// other schedule type (those dispatch through a repeat plan).
pub fn initial_delay(job: &Job, now: DateTime<Utc>) -> Option<StdDuration> {
    if job.schedule_type != ScheduleType::SpecificTime {
        return None;
    }
    let at = job.specific_time?;
    (at - now).to_std().ok().filter(|d| !d.is_zero())
}

/// The repeating registration for a job, if its schedule has one.
///
/// MONTH and YEAR intervals have no fixed-duration representation, so they
/// return None and are re-seeded per dispatch from the computed `next_run`.
pub fn repeat_plan(job: &Job) -> Option<RepeatPlan> {
    match job.schedule_type {
        ScheduleType::Cron => {
            let expression = job.cron_expression.as_deref()?;
            normalize_cron(expression).map(RepeatPlan::Cron)
        }
        ScheduleType::Recurring => {
            let value = job.interval_value.filter(|v| *v > 0)? as u64;
            let seconds = match job.interval? {
                IntervalUnit::Minute => value * 60,
                IntervalUnit::Hour => value * 3600,
                IntervalUnit::Day => value * 86_400,
                IntervalUnit::Week => value * 7 * 86_400,
                IntervalUnit::Month | IntervalUnit::Year => return None,
            };
            Some(RepeatPlan::Every(StdDuration::from_secs(seconds)))
        }
        ScheduleType::SpecificTime => None,
    }
}

/// First dispatch instant strictly after `from` consistent with the job's
/// schedule. None when no future dispatch exists (a one-shot in the past)
/// or when the schedule fields are unusable.
pub fn next_run(job: &Job, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match job.schedule_type {
        ScheduleType::Cron => {
            let normalized = normalize_cron(job.cron_expression.as_deref()?)?;
            let schedule = Schedule::from_str(&normalized).ok()?;
            schedule.after(&from).next()
        }
        ScheduleType::SpecificTime => job.specific_time.filter(|at| *at > from),
        ScheduleType::Recurring => {
            let value = job.interval_value.filter(|v| *v > 0)?;
            match job.interval? {
                IntervalUnit::Minute => from.checked_add_signed(Duration::minutes(value as i64)),
                IntervalUnit::Hour => from.checked_add_signed(Duration::hours(value as i64)),
                IntervalUnit::Day => from.checked_add_signed(Duration::days(value as i64)),
                IntervalUnit::Week => from.checked_add_signed(Duration::weeks(value as i64)),
                IntervalUnit::Month => from.checked_add_months(Months::new(value as u32)),
                IntervalUnit::Year => from.checked_add_months(Months::new(value as u32 * 12)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobStatus, JobType};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn job(schedule_type: ScheduleType) -> Job {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        Job {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            description: None,
            job_type: JobType::Http,
            target: "http://localhost:9999/hook".to_string(),
            payload: None,
            schedule_type,
            cron_expression: None,
            specific_time: None,
            interval: None,
            interval_value: None,
            status: JobStatus::Active,
            created_at: now,
            updated_at: now,
            last_run: None,
            next_run: None,
            error_message: None,
        }
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn five_field_cron_is_normalized() {
        assert_eq!(normalize_cron("* * * * *").as_deref(), Some("0 * * * * *"));
        assert_eq!(
            normalize_cron("*/5 0 * * *").as_deref(),
            Some("0 */5 0 * * *")
        );
    }

    #[test]
    fn six_field_cron_is_kept() {
        assert_eq!(
            normalize_cron("30 * * * * *").as_deref(),
            Some("30 * * * * *")
        );
    }

    #[test]
    fn wrong_field_counts_are_rejected() {
        assert!(normalize_cron("* * * *").is_none());
        assert!(normalize_cron("* * * * * * *").is_none());
        assert!(normalize_cron("").is_none());
        assert!(normalize_cron("not a cron").is_none());
    }

    #[test]
    fn specific_time_in_future_has_delay() {
        let now = at(2025, 1, 15, 12, 0, 0);
        let mut j = job(ScheduleType::SpecificTime);
        j.specific_time = Some(at(2025, 1, 15, 12, 0, 30));
        assert_eq!(initial_delay(&j, now), Some(StdDuration::from_secs(30)));
    }

    #[test]
    fn specific_time_at_now_counts_as_past() {
        let now = at(2025, 1, 15, 12, 0, 0);
        let mut j = job(ScheduleType::SpecificTime);
        j.specific_time = Some(now);
        assert_eq!(initial_delay(&j, now), None);
        assert_eq!(next_run(&j, now), None);
    }

    #[test]
    fn recurring_has_no_initial_delay() {
        let now = at(2025, 1, 15, 12, 0, 0);
        let mut j = job(ScheduleType::Recurring);
        j.interval = Some(IntervalUnit::Minute);
        j.interval_value = Some(1);
        assert_eq!(initial_delay(&j, now), None);
    }

    #[test]
    fn recurring_fixed_units_map_to_durations() {
        let mut j = job(ScheduleType::Recurring);
        j.interval = Some(IntervalUnit::Hour);
        j.interval_value = Some(2);
        assert_eq!(
            repeat_plan(&j),
            Some(RepeatPlan::Every(StdDuration::from_secs(7200)))
        );

        j.interval = Some(IntervalUnit::Week);
        j.interval_value = Some(1);
        assert_eq!(
            repeat_plan(&j),
            Some(RepeatPlan::Every(StdDuration::from_secs(7 * 86_400)))
        );
    }

    #[test]
    fn month_and_year_have_no_repeat_plan() {
        let mut j = job(ScheduleType::Recurring);
        j.interval = Some(IntervalUnit::Month);
        j.interval_value = Some(1);
        assert_eq!(repeat_plan(&j), None);

        j.interval = Some(IntervalUnit::Year);
        assert_eq!(repeat_plan(&j), None);
    }

    #[test]
    fn nonpositive_interval_value_has_no_plan() {
        let mut j = job(ScheduleType::Recurring);
        j.interval = Some(IntervalUnit::Minute);
        j.interval_value = Some(0);
        assert_eq!(repeat_plan(&j), None);
        j.interval_value = Some(-5);
        assert_eq!(repeat_plan(&j), None);
    }

    #[test]
    fn cron_next_run_is_strictly_after_reference() {
        let mut j = job(ScheduleType::Cron);
        j.cron_expression = Some("* * * * *".to_string());
        let from = at(2025, 1, 15, 12, 0, 0);
        let next = next_run(&j, from).unwrap();
        assert_eq!(next, at(2025, 1, 15, 12, 1, 0));
        assert!(next > from);
    }

    #[test]
    fn month_arithmetic_respects_month_lengths() {
        let mut j = job(ScheduleType::Recurring);
        j.interval = Some(IntervalUnit::Month);
        j.interval_value = Some(1);
        // Jan 31 + 1 month clamps to Feb 28.
        let from = at(2025, 1, 31, 9, 0, 0);
        assert_eq!(next_run(&j, from), Some(at(2025, 2, 28, 9, 0, 0)));
    }

    #[test]
    fn year_arithmetic_crosses_year_boundary() {
        let mut j = job(ScheduleType::Recurring);
        j.interval = Some(IntervalUnit::Year);
        j.interval_value = Some(2);
        let from = at(2025, 3, 10, 0, 0, 0);
        assert_eq!(next_run(&j, from), Some(at(2027, 3, 10, 0, 0, 0)));
    }

    #[test]
    fn week_is_seven_calendar_days() {
        let mut j = job(ScheduleType::Recurring);
        j.interval = Some(IntervalUnit::Week);
        j.interval_value = Some(1);
        let from = at(2025, 1, 28, 6, 30, 0);
        assert_eq!(next_run(&j, from), Some(at(2025, 2, 4, 6, 30, 0)));
    }
}
