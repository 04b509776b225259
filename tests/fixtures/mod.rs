//! Request-body fixtures for scheduler API tests.

use serde_json::{json, Value};

/// A one-shot job firing `seconds_from_now` seconds in the future.
pub fn specific_time_job(name: &str, target: &str, seconds_from_now: i64) -> Value {
    let at = chrono::Utc::now() + chrono::Duration::seconds(seconds_from_now);
    json!({
        "name": name,
        "type": "HTTP",
        "target": target,
        "payload": {"m": "hi"},
        "schedule_type": "SPECIFIC_TIME",
        "specific_time": at.to_rfc3339(),
    })
}

/// A fixed-interval recurring job.
pub fn recurring_job(name: &str, target: &str, interval: &str, value: i32) -> Value {
    json!({
        "name": name,
        "type": "HTTP",
        "target": target,
        "payload": {"tick": true},
        "schedule_type": "RECURRING",
        "interval": interval,
        "interval_value": value,
    })
}

/// A cron-scheduled job.
pub fn cron_job(name: &str, target: &str, expression: &str) -> Value {
    json!({
        "name": name,
        "type": "HTTP",
        "target": target,
        "payload": {"cron": true},
        "schedule_type": "CRON",
        "cron_expression": expression,
    })
}
