pub mod operations;
pub mod queue;

use axum::routing::{get, post};
use axum::Router;

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Operations
        .route(
            "/api/v1/operations/{mode}/{operation}",
            post(operations::execute),
        )
        // Queue
        .route("/api/v1/queue", get(queue::list))
        .route("/api/v1/queue/tick", post(queue::tick))
        .route("/api/v1/queue/{id}", get(queue::get))
        .route("/api/v1/queue/{id}/requeue", post(queue::requeue))
}
