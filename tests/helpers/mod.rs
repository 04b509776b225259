//! Test helper utilities for driving the scheduler REST API.

use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;

/// Base URL of a running API server (override with API_BASE_URL).
pub fn base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

/// Delivery target the e2e jobs POST to (override with TARGET_URL). Any
/// endpoint answering 2xx to JSON POSTs works.
pub fn target_url() -> String {
    std::env::var("TARGET_URL").unwrap_or_else(|_| "http://localhost:9090/hook".to_string())
}

/// Delivery target that always answers 404 (override with TARGET_URL_404).
pub fn failing_target_url() -> String {
    std::env::var("TARGET_URL_404").unwrap_or_else(|_| "http://localhost:9090/missing".to_string())
}

/// POST /jobs and return the created job document.
pub async fn create_job(
    client: &reqwest::Client,
    body: &Value,
) -> Result<Value, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/jobs", base_url()))
        .json(body)
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;
    if status.as_u16() != 201 {
        return Err(format!("Create failed with status {}: {}", status, text).into());
    }
    let body: Value = serde_json::from_str(&text)?;
    Ok(body["job"].clone())
}

/// GET /jobs/:id.
pub async fn get_job(
    client: &reqwest::Client,
    id: &str,
) -> Result<Value, Box<dyn std::error::Error>> {
    let response = client
        .get(format!("{}/jobs/{}", base_url(), id))
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(format!("Get failed with status {}", response.status()).into());
    }
    Ok(response.json().await?)
}

/// DELETE /jobs/:id, tolerating 404 so tests can clean up unconditionally.
pub async fn delete_job(client: &reqwest::Client, id: &str) {
    let _ = client
        .delete(format!("{}/jobs/{}", base_url(), id))
        .send()
        .await;
}

/// Poll a job until `predicate` holds or `timeout_secs` elapses.
pub async fn wait_for_job<F>(
    client: &reqwest::Client,
    id: &str,
    timeout_secs: u64,
    predicate: F,
) -> Result<Value, Box<dyn std::error::Error>>
where
    F: Fn(&Value) -> bool,
{
    let max_attempts = timeout_secs * 2; // Poll every 500ms
    for _ in 0..max_attempts {
        let job = get_job(client, id).await?;
        if predicate(&job) {
            return Ok(job);
        }
        sleep(Duration::from_millis(500)).await;
    }
    Err(format!("Job {} did not reach the expected state in {}s", id, timeout_secs).into())
}
