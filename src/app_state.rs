use sqlx::PgPool;
use std::sync::Arc;

use crate::services::coordinator::Coordinator;
use crate::services::queue::DispatchQueue;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<DispatchQueue>,
    pub coordinator: Arc<Coordinator>,
    pub detailed_errors: bool,
}

impl AppState {
    pub fn new(db: PgPool, queue: DispatchQueue, detailed_errors: bool) -> Self {
        let queue = Arc::new(queue);
        let coordinator = Arc::new(Coordinator::new(db.clone(), queue.clone()));
        Self {
            db,
            queue,
            coordinator,
            detailed_errors,
        }
    }
}
