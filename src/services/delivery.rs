use std::time::Duration;

use chrono::Utc;
use reqwest::redirect::Policy;
use reqwest::Client;
use serde_json::Value;
use sqlx::PgPool;
use url::Url;
use uuid::Uuid;

use crate::db::queries;
use crate::models::job::{IntervalUnit, Job, JobStatus, ScheduleType};
use crate::services::queue::{DispatchEntry, DispatchQueue};
use crate::services::schedule;

/// Maximum serialized payload size accepted for delivery.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Keys stripped from payloads before serialization, at any depth.
const FORBIDDEN_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: usize = 5;

/// Inner retry bounds around a single dispatch.
const MAX_ATTEMPTS: u32 = 3;
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Limit applied to error text before it is stored or logged.
const ERROR_TRUNCATE_LEN: usize = 500;

/// A delivery failure, classified for the retry decision.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Target responded with status {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Target responded with status {status}: {body}")]
    Client { status: u16, body: String },

    #[error("Target host not allowed: {0}")]
    UnauthorizedTarget(String),

    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("Payload of {0} bytes exceeds the 1 MiB limit")]
    PayloadTooLarge(usize),

    #[error("{0}")]
    Unknown(String),
}

impl DeliveryError {
    /// Transient failures are retried; everything else dead-letters.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::Network(_) | DeliveryError::Timeout(_) | DeliveryError::Server { .. }
        )
    }
}

/// Truncate error text to the stored/logged limit.
pub fn truncate_error(message: &str) -> String {
    if message.len() <= ERROR_TRUNCATE_LEN {
        return message.to_string();
    }
    let mut end = ERROR_TRUNCATE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

/// Outbound host allow-list parsed from `ALLOWED_TARGET_HOSTS`. An empty
/// list permits every host; `*.domain` entries match the domain and all of
/// its subdomains.
#[derive(Debug, Clone, Default)]
pub struct AllowedHosts {
    entries: Vec<String>,
}

impl AllowedHosts {
    pub fn parse(raw: &str) -> Self {
        let entries = raw
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { entries }
    }

    pub fn permits(&self, host: &str) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        let host = host.to_ascii_lowercase();
        self.entries.iter().any(|entry| {
            if let Some(domain) = entry.strip_prefix("*.") {
                host == domain || host.ends_with(&format!(".{domain}"))
            } else {
                host == *entry
            }
        })
    }
}

/// Strip forbidden keys from a payload, recursing through nested objects
/// and arrays. This is a security boundary, not a convenience.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !FORBIDDEN_KEYS.contains(&key.as_str()))
                .map(|(key, nested)| (key.clone(), sanitize_payload(nested)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_payload).collect()),
        other => other.clone(),
    }
}

/// HTTP delivery client enforcing the outbound contract: JSON POST, fixed
/// timeout, bounded redirects, host allow-list.
pub struct DeliveryClient {
    http: Client,
    allowed_hosts: AllowedHosts,
}

impl DeliveryClient {
    pub fn new(allowed_hosts: AllowedHosts) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("cronpost/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            allowed_hosts,
        })
    }

    /// Parse and authorize a target URL: http(s) scheme and an allow-listed
    /// host.
    pub fn validate_target(&self, target: &str) -> Result<Url, DeliveryError> {
        let url =
            Url::parse(target).map_err(|e| DeliveryError::InvalidTarget(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeliveryError::InvalidTarget(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| DeliveryError::InvalidTarget("missing host".to_string()))?;
        if !self.allowed_hosts.permits(host) {
            return Err(DeliveryError::UnauthorizedTarget(host.to_string()));
        }
        Ok(url)
    }

    /// Size-check and sanitize a payload for delivery.
    pub fn prepare_payload(payload: &Option<Value>) -> Result<Value, DeliveryError> {
        let value = match payload {
            Some(value) => value,
            None => return Ok(Value::Object(Default::default())),
        };
        let serialized = serde_json::to_vec(value)
            .map_err(|e| DeliveryError::Unknown(e.to_string()))?;
        if serialized.len() > MAX_PAYLOAD_BYTES {
            return Err(DeliveryError::PayloadTooLarge(serialized.len()));
        }
        Ok(sanitize_payload(value))
    }

    async fn post_once(&self, url: &Url, body: &Value) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(e.to_string())
                } else if e.is_connect() || e.is_request() {
                    DeliveryError::Network(e.to_string())
                } else {
                    DeliveryError::Unknown(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(());
        }
        let body = truncate_error(&response.text().await.unwrap_or_default());
        if status >= 500 {
            Err(DeliveryError::Server { status, body })
        } else {
            Err(DeliveryError::Client { status, body })
        }
    }

    /// POST the payload with bounded exponential backoff. Non-retryable
    /// errors short-circuit.
    pub async fn deliver(&self, url: &Url, body: &Value) -> Result<(), DeliveryError> {
        let mut backoff = MIN_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.post_once(url, body).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        url = %url,
                        attempt,
                        error = %truncate_error(&err.to_string()),
                        "Delivery attempt failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Follow-up scheduling the caller must perform after acknowledging a
/// successful dispatch. MONTH/YEAR recurrences have no repeating
/// registration and reuse the job id as their one-shot key, so the fresh
/// entry must be enqueued after `ack_success` has cleared the finished
/// one — enqueueing it first would leave the new pending payload to be
/// deleted by the acknowledge.
#[derive(Debug, Clone)]
pub struct Reseed {
    pub key: String,
    pub entry: DispatchEntry,
    pub delay: Duration,
}

/// Execute one claimed dispatch end to end: authoritative re-read, target
/// and payload checks, delivery, and the job-state write-back. Errors
/// returned here drive the queue's outer retry; a returned [`Reseed`] is
/// applied by the caller once the dispatch is acknowledged.
pub async fn execute_dispatch(
    pool: &PgPool,
    queue: &DispatchQueue,
    client: &DeliveryClient,
    entry: &DispatchEntry,
) -> Result<Option<Reseed>, DeliveryError> {
    let job = match fetch_job(pool, entry.job_id).await? {
        Some(job) => job,
        None => {
            tracing::warn!(job_id = %entry.job_id, "Dispatched job no longer exists, skipping");
            return Ok(None);
        }
    };

    if job.status == JobStatus::Inactive {
        tracing::debug!(job_id = %job.id, "Job is inactive, skipping delivery");
        return Ok(None);
    }

    let outcome = attempt_delivery(client, &job).await;

    match outcome {
        Ok(()) => {
            let now = Utc::now();
            let next = schedule::next_run(&job, now);
            queries::record_run(pool, job.id, now, next)
                .await
                .map_err(|e| DeliveryError::Unknown(e.to_string()))?;

            let reseed = match next {
                Some(next) if needs_reseed(&job) => {
                    let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                    Some(Reseed {
                        key: job.id.to_string(),
                        entry: DispatchEntry {
                            job_id: job.id,
                            target: job.target.clone(),
                            job_type: job.job_type,
                            payload: job.payload.clone(),
                            attempt: 0,
                        },
                        delay,
                    })
                }
                _ => None,
            };

            metrics::counter!("deliveries_total").increment(1);
            tracing::info!(job_id = %job.id, next_run = ?next, "Delivery succeeded");
            Ok(reseed)
        }
        Err(err) => {
            let message = truncate_error(&err.to_string());
            metrics::counter!("deliveries_failed_total").increment(1);
            if err.is_retryable() {
                let note = format!("Temporary failure: {message}. The job will be retried.");
                if let Err(db_err) =
                    queries::update_status(pool, job.id, JobStatus::Active, Some(&note)).await
                {
                    tracing::error!(job_id = %job.id, error = %db_err, "Failed to record transient failure");
                }
                tracing::warn!(job_id = %job.id, error = %message, "Transient delivery failure");
            } else {
                if let Err(db_err) =
                    queries::update_status(pool, job.id, JobStatus::Failed, Some(&message)).await
                {
                    tracing::error!(job_id = %job.id, error = %db_err, "Failed to record terminal failure");
                }
                if let Err(dlq_err) = queue.enqueue_dlq(&job.id.to_string(), entry).await {
                    tracing::error!(job_id = %job.id, error = %dlq_err, "Failed to dead-letter job");
                }
                metrics::counter!("deliveries_dead_lettered_total").increment(1);
                tracing::error!(job_id = %job.id, error = %message, "Terminal delivery failure, job dead-lettered");
            }
            Err(err)
        }
    }
}

async fn fetch_job(pool: &PgPool, id: Uuid) -> Result<Option<Job>, DeliveryError> {
    queries::get_job(pool, id)
        .await
        .map_err(|e| DeliveryError::Unknown(e.to_string()))
}

async fn attempt_delivery(client: &DeliveryClient, job: &Job) -> Result<(), DeliveryError> {
    let url = client.validate_target(&job.target)?;
    let body = DeliveryClient::prepare_payload(&job.payload)?;
    client.deliver(&url, &body).await
}

/// Recurring MONTH/YEAR schedules carry no repeating registration and are
/// re-seeded per dispatch.
fn needs_reseed(job: &Job) -> bool {
    job.schedule_type == ScheduleType::Recurring
        && matches!(job.interval, Some(IntervalUnit::Month) | Some(IntervalUnit::Year))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_strips_forbidden_keys_at_depth() {
        let dirty = json!({
            "__proto__": {"polluted": true},
            "constructor": "bad",
            "ok": {
                "prototype": 1,
                "nested": [{"__proto__": 2, "keep": 3}]
            }
        });
        let clean = sanitize_payload(&dirty);
        assert_eq!(
            clean,
            json!({"ok": {"nested": [{"keep": 3}]}})
        );
    }

    #[test]
    fn sanitize_preserves_scalars_and_order_free_content() {
        let value = json!({"m": "hi", "n": [1, 2, {"k": null}]});
        assert_eq!(sanitize_payload(&value), value);
    }

    #[test]
    fn payload_at_limit_is_accepted_one_byte_over_is_not() {
        // {"d":"<filler>"} serializes to filler.len() + 8 bytes.
        let filler = "x".repeat(MAX_PAYLOAD_BYTES - 8);
        let at_limit = Some(json!({ "d": filler }));
        assert!(DeliveryClient::prepare_payload(&at_limit).is_ok());

        let filler = "x".repeat(MAX_PAYLOAD_BYTES - 7);
        let over = Some(json!({ "d": filler }));
        assert!(matches!(
            DeliveryClient::prepare_payload(&over),
            Err(DeliveryError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn absent_payload_becomes_empty_object() {
        assert_eq!(
            DeliveryClient::prepare_payload(&None).unwrap(),
            json!({})
        );
    }

    #[test]
    fn allow_list_empty_permits_all() {
        let hosts = AllowedHosts::parse("");
        assert!(hosts.permits("anything.example.com"));
    }

    #[test]
    fn allow_list_exact_and_wildcard_matching() {
        let hosts = AllowedHosts::parse("api.internal, *.example.com");
        assert!(hosts.permits("api.internal"));
        assert!(hosts.permits("example.com"));
        assert!(hosts.permits("deep.sub.example.com"));
        assert!(!hosts.permits("example.com.evil.net"));
        assert!(!hosts.permits("other.internal"));
        assert!(!hosts.permits("notexample.com"));
    }

    #[test]
    fn allow_list_is_case_insensitive() {
        let hosts = AllowedHosts::parse("*.Example.COM");
        assert!(hosts.permits("API.example.com"));
    }

    #[test]
    fn target_validation_rejects_non_http_schemes() {
        let client = DeliveryClient::new(AllowedHosts::default()).unwrap();
        assert!(matches!(
            client.validate_target("ftp://files.example.com/x"),
            Err(DeliveryError::InvalidTarget(_))
        ));
        assert!(matches!(
            client.validate_target("not a url"),
            Err(DeliveryError::InvalidTarget(_))
        ));
        assert!(client.validate_target("https://hooks.example.com/y").is_ok());
    }

    #[test]
    fn target_validation_enforces_allow_list() {
        let client = DeliveryClient::new(AllowedHosts::parse("*.trusted.io")).unwrap();
        assert!(client.validate_target("http://api.trusted.io/hook").is_ok());
        assert!(matches!(
            client.validate_target("http://attacker.net/hook"),
            Err(DeliveryError::UnauthorizedTarget(_))
        ));
    }

    #[test]
    fn retryable_classification() {
        assert!(DeliveryError::Network("refused".into()).is_retryable());
        assert!(DeliveryError::Timeout("30s".into()).is_retryable());
        assert!(DeliveryError::Server { status: 503, body: String::new() }.is_retryable());
        assert!(!DeliveryError::Client { status: 404, body: String::new() }.is_retryable());
        assert!(!DeliveryError::Client { status: 300, body: String::new() }.is_retryable());
        assert!(!DeliveryError::UnauthorizedTarget("x".into()).is_retryable());
        assert!(!DeliveryError::PayloadTooLarge(0).is_retryable());
        assert!(!DeliveryError::Unknown("x".into()).is_retryable());
    }

    #[test]
    fn error_text_is_truncated_to_limit() {
        let long = "e".repeat(2000);
        assert_eq!(truncate_error(&long).len(), 500);
        assert_eq!(truncate_error("short"), "short");
    }
}
