mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::http::HeaderValue;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::queue::DispatchQueue;

/// Request bodies are capped above the 1 MiB payload limit so oversized
/// payloads reach the guard and get a classified rejection.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing cronpost scheduler API");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("jobs_created_total", "Total jobs registered");
    metrics::describe_counter!("deliveries_total", "Total successful deliveries");
    metrics::describe_counter!("deliveries_failed_total", "Total failed delivery attempts");
    metrics::describe_counter!(
        "deliveries_dead_lettered_total",
        "Total jobs moved to the dead-letter queue"
    );
    metrics::describe_gauge!("queue_depth", "Entries waiting in the dispatch queue");

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL job store");
    let db_pool = db::init_pool(&config.postgres_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize Redis dispatch queue
    tracing::info!("Connecting to Redis dispatch queue");
    let queue = DispatchQueue::new(&config.redis_url()).expect("Failed to initialize dispatch queue");

    // Create shared application state
    let state = AppState::new(db_pool, queue, config.detailed_errors());

    // Sample queue depth for the Prometheus gauge
    let depth_queue = state.queue.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            if let Ok(depth) = depth_queue.scheduled_len().await {
                metrics::gauge!("queue_depth").set(depth as f64);
            }
        }
    });

    let cors = cors_layer(&config.allowed_origins);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/jobs",
            post(routes::jobs::create_job).get(routes::jobs::list_jobs),
        )
        .route(
            "/jobs/:id",
            get(routes::jobs::get_job)
                .put(routes::jobs::update_job)
                .delete(routes::jobs::delete_job),
        )
        .route("/jobs/:id/run", post(routes::jobs::run_job_now))
        .route("/jobs/:id/status", patch(routes::jobs::toggle_job_status))
        .route("/dlq", get(routes::dlq::list_dlq))
        .route("/dlq/:id/reactivate", post(routes::dlq::reactivate_job))
        .route("/dlq/:id/complete", post(routes::dlq::complete_job))
        .route("/dlq/:id", delete(routes::dlq::delete_dlq_job))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    let bind_addr = config.bind_addr();
    tracing::info!("Starting cronpost on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

fn cors_layer(allowed_origins: &str) -> CorsLayer {
    if allowed_origins.trim() == "*" {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
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
