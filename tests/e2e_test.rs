//! End-to-end scenarios against a running scheduler deployment.
//!
//! These tests require:
//! 1. PostgreSQL and Redis running
//! 2. The API server (`cronpost`) running on API_BASE_URL
//! 3. The delivery worker (`worker`) running against the same store+queue
//! 4. A delivery target answering 2xx at TARGET_URL and 404 at
//!    TARGET_URL_404
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture

mod fixtures;
mod helpers;

use fixtures::*;
use helpers::*;

#[tokio::test]
#[ignore] // Requires running API server, worker, and infrastructure
async fn test_e2e_health_check() {
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", base_url()))
        .send()
        .await
        .expect("Health check failed");

    assert!(
        response.status().is_success(),
        "Health check returned non-success status: {}",
        response.status()
    );
    let body: serde_json::Value = response.json().await.expect("Invalid health body");
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and infrastructure
async fn test_e2e_specific_time_delivers_once() {
    let client = reqwest::Client::new();

    let job = create_job(&client, &specific_time_job("e2e-oneshot", &target_url(), 1))
        .await
        .expect("Failed to create job");
    let id = job["id"].as_str().expect("Job has no id").to_string();

    // After the instant passes the one-shot must have delivered exactly
    // once: last_run set, next_run cleared, status still ACTIVE.
    let done = wait_for_job(&client, &id, 10, |j| !j["last_run"].is_null())
        .await
        .expect("One-shot never delivered");
    assert!(done["next_run"].is_null());
    assert_eq!(done["status"], "ACTIVE");
    assert!(done["error_message"].is_null());

    delete_job(&client, &id).await;
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and infrastructure
async fn test_e2e_recurring_minute_advances() {
    let client = reqwest::Client::new();

    let job = create_job(
        &client,
        &recurring_job("e2e-recurring", &target_url(), "MINUTE", 1),
    )
    .await
    .expect("Failed to create job");
    let id = job["id"].as_str().expect("Job has no id").to_string();
    let first_next = job["next_run"].as_str().expect("No next_run").to_string();

    // Within ~2 minutes at least one delivery lands and next_run advances.
    let advanced = wait_for_job(&client, &id, 125, |j| {
        !j["last_run"].is_null() && j["next_run"].as_str() != Some(first_next.as_str())
    })
    .await
    .expect("Recurring job never advanced");
    assert_eq!(advanced["status"], "ACTIVE");
    assert!(!advanced["next_run"].is_null());

    delete_job(&client, &id).await;
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and infrastructure
async fn test_e2e_cron_every_minute_fires() {
    let client = reqwest::Client::new();

    let job = create_job(&client, &cron_job("e2e-cron", &target_url(), "* * * * *"))
        .await
        .expect("Failed to create job");
    let id = job["id"].as_str().expect("Job has no id").to_string();

    let fired = wait_for_job(&client, &id, 70, |j| !j["last_run"].is_null())
        .await
        .expect("Cron job never fired");
    assert_eq!(fired["status"], "ACTIVE");

    delete_job(&client, &id).await;
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and infrastructure
async fn test_e2e_non_retryable_failure_dead_letters() {
    let client = reqwest::Client::new();

    let job = create_job(
        &client,
        &specific_time_job("e2e-dead-letter", &failing_target_url(), 1),
    )
    .await
    .expect("Failed to create job");
    let id = job["id"].as_str().expect("Job has no id").to_string();

    // A 404 target classifies as a client error: FAILED + DLQ entry.
    let failed = wait_for_job(&client, &id, 30, |j| j["status"] == "FAILED")
        .await
        .expect("Job never failed");
    assert!(!failed["error_message"].is_null());

    let dlq: serde_json::Value = client
        .get(format!("{}/dlq", base_url()))
        .send()
        .await
        .expect("Failed to list DLQ")
        .json()
        .await
        .expect("Invalid DLQ body");
    assert!(
        dlq.as_array()
            .expect("DLQ is not an array")
            .iter()
            .any(|j| j["id"].as_str() == Some(id.as_str())),
        "DLQ does not contain the failed job"
    );

    // Reactivating clears the failure
    let response = client
        .post(format!("{}/dlq/{}/reactivate", base_url(), id))
        .send()
        .await
        .expect("Failed to reactivate");
    assert!(response.status().is_success());

    let reactivated = get_job(&client, &id).await.expect("Failed to fetch job");
    assert_eq!(reactivated["status"], "ACTIVE");
    assert!(reactivated["error_message"].is_null());

    delete_job(&client, &id).await;
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and infrastructure
async fn test_e2e_update_rewires_schedule() {
    let client = reqwest::Client::new();

    let job = create_job(
        &client,
        &recurring_job("e2e-rewire", &target_url(), "HOUR", 1),
    )
    .await
    .expect("Failed to create job");
    let id = job["id"].as_str().expect("Job has no id").to_string();

    // Rewire to a one-shot a second from now
    let response = client
        .put(format!("{}/jobs/{}", base_url(), id))
        .json(&specific_time_job("e2e-rewire", &target_url(), 1))
        .send()
        .await
        .expect("Failed to update job");
    assert!(response.status().is_success());

    let done = wait_for_job(&client, &id, 10, |j| !j["last_run"].is_null())
        .await
        .expect("Rewired one-shot never delivered");
    assert!(done["next_run"].is_null());

    // The old hourly registration must not fire again
    let last_run = done["last_run"].as_str().expect("No last_run").to_string();
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    let settled = get_job(&client, &id).await.expect("Failed to fetch job");
    assert_eq!(settled["last_run"].as_str(), Some(last_run.as_str()));

    delete_job(&client, &id).await;
}

#[tokio::test]
#[ignore] // Requires running API server, worker, and infrastructure
async fn test_e2e_inactive_job_never_delivers() {
    let client = reqwest::Client::new();

    let job = create_job(
        &client,
        &recurring_job("e2e-inactive", &target_url(), "MINUTE", 1),
    )
    .await
    .expect("Failed to create job");
    let id = job["id"].as_str().expect("Job has no id").to_string();

    let response = client
        .patch(format!("{}/jobs/{}/status", base_url(), id))
        .json(&serde_json::json!({"status": "INACTIVE"}))
        .send()
        .await
        .expect("Failed to toggle status");
    assert!(response.status().is_success());

    // Even a manual run must be skipped by the worker's re-read.
    let response = client
        .post(format!("{}/jobs/{}/run", base_url(), id))
        .send()
        .await
        .expect("Failed to run now");
    assert!(response.status().is_success());

    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    let settled = get_job(&client, &id).await.expect("Failed to fetch job");
    assert!(settled["last_run"].is_null());
    assert_eq!(settled["status"], "INACTIVE");

    delete_job(&client, &id).await;
}
