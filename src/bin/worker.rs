use cronpost::{
    config::AppConfig,
    db,
    services::{
        delivery::{self, AllowedHosts, DeliveryClient},
        queue::DispatchQueue,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

/// In-flight deliveries per worker process.
const WORKER_CONCURRENCY: usize = 5;
const POLL_INTERVAL_MS: u64 = 500;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting cronpost delivery worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL job store");
    let db_pool = db::init_pool(&config.postgres_url)
        .await
        .expect("Failed to connect to database");

    // Initialize dispatch queue and delivery client
    let queue = Arc::new(
        DispatchQueue::new(&config.redis_url()).expect("Failed to initialize dispatch queue"),
    );
    let client = Arc::new(
        DeliveryClient::new(AllowedHosts::parse(&config.allowed_target_hosts))
            .expect("Failed to build delivery client"),
    );

    let semaphore = Arc::new(Semaphore::new(WORKER_CONCURRENCY));
    let mut in_flight: JoinSet<()> = JoinSet::new();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    tracing::info!(concurrency = WORKER_CONCURRENCY, "Worker ready, consuming dispatch queue");

    loop {
        // Reap finished delivery tasks
        while let Some(result) = in_flight.try_join_next() {
            if let Err(e) = result {
                tracing::error!(error = %e, "Delivery task panicked");
            }
        }

        if let Err(e) = queue.reclaim_expired().await {
            tracing::error!(error = %e, "Failed to reclaim expired leases");
            tokio::select! {
                _ = sleep(Duration::from_millis(POLL_INTERVAL_MS)) => continue,
                _ = &mut shutdown => break,
            }
        }

        let capacity = semaphore.available_permits();
        let claimed = match queue.claim_due(capacity).await {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim due dispatches");
                tokio::select! {
                    _ = sleep(Duration::from_millis(POLL_INTERVAL_MS)) => continue,
                    _ = &mut shutdown => break,
                }
            }
        };

        if claimed.is_empty() {
            tokio::select! {
                _ = sleep(Duration::from_millis(POLL_INTERVAL_MS)) => continue,
                _ = &mut shutdown => break,
            }
        }

        for dispatch in claimed {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("Semaphore closed");
            let pool = db_pool.clone();
            let queue = queue.clone();
            let client = client.clone();

            in_flight.spawn(async move {
                let _permit = permit;
                tracing::info!(
                    job_id = %dispatch.entry.job_id,
                    dispatch_key = %dispatch.key,
                    attempt = dispatch.entry.attempt,
                    "Processing dispatch"
                );

                match delivery::execute_dispatch(&pool, &queue, &client, &dispatch.entry).await {
                    Ok(reseed) => {
                        if let Err(e) = queue.ack_success(&dispatch.key).await {
                            tracing::error!(
                                dispatch_key = %dispatch.key,
                                error = %e,
                                "Failed to acknowledge successful dispatch"
                            );
                        }
                        // Reseed strictly after the acknowledge: both use
                        // the same dispatch key, and ack_success clears the
                        // pending payload under it.
                        if let Some(reseed) = reseed {
                            if let Err(e) = queue
                                .enqueue_delayed(&reseed.key, &reseed.entry, reseed.delay)
                                .await
                            {
                                tracing::error!(
                                    dispatch_key = %reseed.key,
                                    error = %e,
                                    "Failed to reseed next occurrence"
                                );
                            }
                        }
                    }
                    Err(_) => match queue.ack_failure(&dispatch.key, &dispatch.entry).await {
                        Ok(disposition) => {
                            tracing::debug!(
                                dispatch_key = %dispatch.key,
                                ?disposition,
                                "Dispatch failure recorded"
                            );
                        }
                        Err(e) => {
                            tracing::error!(
                                dispatch_key = %dispatch.key,
                                error = %e,
                                "Failed to acknowledge failed dispatch"
                            );
                        }
                    },
                }
            });
        }
    }

    // Cooperative close: stop claiming and let in-flight deliveries finish.
    tracing::info!("Shutting down, waiting for in-flight deliveries");
    while in_flight.join_next().await.is_some() {}
    tracing::info!("Worker stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
